//! Round-trip tests for the text protocol.
//!
//! Generated trees cover every value kind except non-finite floats, which
//! have no text form.

use modelbus_core::{
    ArithOp, Command, CommandKind, CompareOp, ObjId, Query, Segment, SetOp, Value,
};
use modelbus_wire::{des, ser};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn arb_string() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z_][a-z0-9_]{0,6}",
        "[ -~]{0,8}",
        Just("GET".to_string()),
        Just("true".to_string()),
        Just("".to_string()),
    ]
}

fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e6f64..1.0e6f64).prop_map(Value::Float),
        arb_string().prop_map(Value::Str),
        any::<u64>().prop_map(|n| Value::Obj(ObjId(n))),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    arb_leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
            arb_query(inner).prop_map(Value::Qry),
        ]
    })
}

fn arb_compare_op() -> impl Strategy<Value = CompareOp> {
    prop_oneof![
        Just(CompareOp::Equ),
        Just(CompareOp::Neq),
        Just(CompareOp::Les),
        Just(CompareOp::Gre),
        Just(CompareOp::Rgx),
    ]
}

fn arb_arith_op() -> impl Strategy<Value = ArithOp> {
    prop_oneof![
        Just(ArithOp::Add),
        Just(ArithOp::Sub),
        Just(ArithOp::Mul),
        Just(ArithOp::Div),
        Just(ArithOp::Orr),
        Just(ArithOp::Xor),
        Just(ArithOp::And),
        Just(ArithOp::Nad),
    ]
}

fn arb_set_op() -> impl Strategy<Value = SetOp> {
    prop_oneof![
        Just(SetOp::Csp),
        Just(SetOp::Its),
        Just(SetOp::Dif),
        Just(SetOp::Uni),
        Just(SetOp::Con),
    ]
}

/// Segments whose arguments are drawn from `value`. Nested pipelines reuse
/// `value` through `Value::Qry`, which keeps the recursion bounded.
fn arb_segment(value: BoxedStrategy<Value>) -> BoxedStrategy<Segment> {
    let items = prop::collection::vec(value.clone(), 0..3).boxed();
    let sub = prop::collection::vec(arb_flat_segment(value.clone()), 0..3)
        .prop_map(Query::from_segments)
        .boxed();
    prop_oneof![
        arb_flat_segment(value.clone()),
        (
            "[A-Z]{3}",
            prop::collection::vec(value.clone(), 0..3)
        )
            .prop_map(|(name, args)| Segment::Met { name, args }),
        (value.clone(), value.clone()).prop_map(|(cond, default)| Segment::Trm { cond, default }),
        Just(Segment::Trm {
            cond: Value::Null,
            default: Value::Null
        }),
        items.clone().prop_map(Segment::Arr),
        items.clone().prop_map(Segment::Zip),
        items.prop_map(Segment::Eqa),
        sub.clone().prop_map(Segment::Sel),
        sub.prop_map(Segment::Qry),
    ]
    .boxed()
}

fn arb_flat_segment(value: BoxedStrategy<Value>) -> BoxedStrategy<Segment> {
    prop_oneof![
        value.clone().prop_map(Segment::Obj),
        value.clone().prop_map(Segment::His),
        value.clone().prop_map(Segment::Pth),
        value.clone().prop_map(Segment::Cls),
        value.clone().prop_map(Segment::Ino),
        value.clone().prop_map(Segment::Idx),
        value.clone().prop_map(Segment::Any),
        value.clone().prop_map(Segment::All),
        Just(Segment::Not),
        (arb_compare_op(), value.clone()).prop_map(|(op, v)| Segment::Compare(op, v)),
        (arb_arith_op(), value.clone()).prop_map(|(op, v)| Segment::Arith(op, v)),
        (arb_set_op(), value).prop_map(|(op, v)| Segment::Set(op, v)),
    ]
    .boxed()
}

fn arb_query(value: BoxedStrategy<Value>) -> BoxedStrategy<Query> {
    prop::collection::vec(arb_segment(value), 0..4)
        .prop_map(Query::from_segments)
        .boxed()
}

fn arb_command() -> impl Strategy<Value = Command> {
    let kinds: Vec<CommandKind> = CommandKind::ALL
        .iter()
        .copied()
        .filter(|k| *k != CommandKind::Cmp)
        .collect();
    (prop::sample::select(kinds), prop::collection::vec(arb_value(), 4)).prop_map(
        |(kind, mut args)| {
            let (_, max) = kind.arity();
            args.truncate(max);
            Command::from_parts(kind, args).expect("arguments within arity")
        },
    )
}

fn arb_compound() -> BoxedStrategy<Command> {
    prop::collection::vec(arb_command(), 0..4)
        .prop_map(Command::cmp)
        .boxed()
}

/// Compounds may hold compounds; construction splices them.
fn arb_program() -> impl Strategy<Value = Command> {
    prop_oneof![
        4 => arb_command(),
        1 => arb_compound(),
        1 => (arb_compound(), arb_command(), arb_compound())
            .prop_map(|(inner, cmd, tail)| Command::cmp(vec![inner, cmd, tail])),
    ]
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    /// des(ser(x)) == x
    #[test]
    fn prop_des_inverts_ser(cmd in arb_program()) {
        let text = ser(&cmd);
        let back = des(&text);
        prop_assert!(back.is_ok(), "failed to decode {:?}: {:?}", text, back);
        prop_assert_eq!(back.unwrap(), cmd, "text was {:?}", text);
    }

    /// ser is stable across a second pass
    #[test]
    fn prop_ser_is_canonical(cmd in arb_program()) {
        let text = ser(&cmd);
        let again = ser(&des(&text).unwrap());
        prop_assert_eq!(again, text);
    }
}

// =============================================================================
// Canonical text
// =============================================================================

#[test]
fn test_canonical_text_survives_roundtrip() {
    let cases = [
        "GET #1/name",
        "GET #1/children:0/name",
        "SET #1 name 'bar baz'",
        "GET !Node{/size>3}",
        "GET #0@LEN",
        "GET #0@IDX(2)",
        "GET #0/items:(0,2,1)",
        "GET [(#1/a),(#2/b)]",
        "GET #0/children&ZIP((/name),(/size))",
        "GET #1/flag&NOT",
        "GET #1/x&TRM(null,0)/y",
        "CHG 3 10",
        "CAL hello (1,) ((timeout,0.5),)",
        "OBS * *",
        "STS;CHG 0",
        "CMP STS",
    ];
    for text in cases {
        let cmd = des(text).unwrap_or_else(|e| panic!("{text}: {e}"));
        assert_eq!(ser(&cmd), text);
    }
}

#[test]
fn test_object_handle_roundtrip() {
    let cmd = Command::set(Value::Obj(ObjId(3)), "label", "x");
    assert_eq!(ser(&cmd), "SET #3 label x");
    assert_eq!(des(&ser(&cmd)).unwrap(), cmd);

    let listed = Command::get(Value::List(vec![Value::Obj(ObjId(1)), Value::Obj(ObjId(2))]));
    assert_eq!(des(&ser(&listed)).unwrap(), listed);

    let path = Command::get(Query::new().obj(Value::Obj(ObjId(4))).pth("name"));
    assert_eq!(ser(&path), "GET ##4/name");
    assert_eq!(des(&ser(&path)).unwrap(), path);
}

#[test]
fn test_nested_compound_roundtrip() {
    let cmd = Command::cmp(vec![Command::cmp(vec![Command::Sts]), Command::Gaa]);
    assert_eq!(ser(&cmd), "STS;GAA");
    assert_eq!(des(&ser(&cmd)).unwrap(), cmd);

    let lone = Command::cmp(vec![Command::cmp(vec![Command::Sts])]);
    assert_eq!(ser(&lone), "CMP STS");
    assert_eq!(des(&ser(&lone)).unwrap(), lone);
}

#[test]
fn test_empty_query_roundtrip() {
    for cmd in [
        Command::get(Query::new()),
        Command::get(Query::new().qry(Query::new())),
        Command::get(Query::new().obj(1).sel(Query::new())),
        Command::get(Value::List(vec![Query::new().into()])),
    ] {
        let text = ser(&cmd);
        assert_eq!(des(&text).unwrap(), cmd, "text was {text:?}");
    }
    assert_eq!(ser(&Command::get(Query::new())), "GET (())");
}

#[test]
fn test_whitespace_is_insignificant() {
    let loose = des("  SET   #1 name\t'bar'  ").unwrap();
    assert_eq!(ser(&loose), "SET #1 name bar");
    let list = des("GET (1 , 2 ,3)").unwrap();
    assert_eq!(ser(&list), "GET (1,2,3)");
}

#[test]
fn test_unbracketed_array_items() {
    assert_eq!(
        des("GET [#1/a,#2/b]").unwrap(),
        des("GET [(#1/a),(#2/b)]").unwrap()
    );
}

#[test]
fn test_optional_outer_parentheses() {
    assert_eq!(des("GET (#1/name)").unwrap(), des("GET #1/name").unwrap());
}
