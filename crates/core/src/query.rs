//! Query segment algebra
//!
//! A [`Query`] is a pipeline: an ordered sequence of [`Segment`]s, each one
//! transforming the context produced by the previous one. Queries are plain
//! data. Building one never touches the database; the evaluator resolves them
//! at execution time against transaction history and the MDB.
//!
//! ```
//! use modelbus_core::{Query, Value};
//!
//! // #20/name
//! let q = Query::new().obj(20).pth("name");
//! assert_eq!(q.segments().len(), 2);
//!
//! // #1/children{/name=foo}
//! let sel = Query::new().pth("name").equ("foo");
//! let q = Query::new().obj(1).pth("children").sel(sel);
//! assert_eq!(q.segments().len(), 3);
//! # let _ = Value::Null;
//! ```

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Comparison operators applied element-wise against the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// Equal
    Equ,
    /// Not equal
    Neq,
    /// Less than
    Les,
    /// Greater than
    Gre,
    /// Regular expression match
    Rgx,
}

/// Arithmetic operators and their boolean synonyms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    /// Addition, string concatenation
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
    /// Boolean or
    Orr,
    /// Boolean exclusive or
    Xor,
    /// Boolean and
    And,
    /// Boolean not-and
    Nad,
}

/// Operators combining two lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOp {
    /// Cross product
    Csp,
    /// Intersection
    Its,
    /// Difference
    Dif,
    /// Union
    Uni,
    /// Concatenation
    Con,
}

/// One step of a query pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Segment {
    /// Object reference by id
    Obj(Value),
    /// Result of an earlier command in the same transaction
    His(Value),
    /// Feature navigation
    Pth(Value),
    /// All contained objects of exactly the given class
    Cls(Value),
    /// All contained objects that are instances of the given class
    Ino(Value),
    /// Meta operation such as `LEN` or `PAR`
    Met {
        /// Operation name
        name: String,
        /// Additional arguments
        args: Vec<Value>,
    },
    /// Boolean negation
    Not,
    /// Stop the pipeline where `cond` holds and yield `default`
    Trm {
        /// Termination condition
        cond: Value,
        /// Value yielded for terminated elements
        default: Value,
    },
    /// Index, slice, sort, flatten or length
    Idx(Value),
    /// Keep the elements for which the sub-query is truthy
    Sel(Query),
    /// Array of independently evaluated values
    Arr(Vec<Value>),
    /// Element-wise zip of independently evaluated values
    Zip(Vec<Value>),
    /// Nested pipeline restarting from the current context
    Qry(Query),
    /// True if any of the argument elements is contained
    Any(Value),
    /// True if all of the argument elements are contained
    All(Value),
    /// Comparison
    Compare(CompareOp, Value),
    /// Equal to any of the listed values
    Eqa(Vec<Value>),
    /// Arithmetic or boolean operation
    Arith(ArithOp, Value),
    /// List operation
    Set(SetOp, Value),
}

/// Fieldless discriminant of [`Segment`], used by the wire symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum SegmentKind {
    Obj,
    His,
    Pth,
    Cls,
    Ino,
    Met,
    Not,
    Trm,
    Idx,
    Sel,
    Arr,
    Zip,
    Qry,
    Any,
    All,
    Equ,
    Eqa,
    Neq,
    Les,
    Gre,
    Rgx,
    Add,
    Sub,
    Mul,
    Div,
    Orr,
    Xor,
    And,
    Nad,
    Csp,
    Its,
    Dif,
    Uni,
    Con,
}

impl SegmentKind {
    /// Every segment kind, in symbol-table order.
    pub const ALL: [SegmentKind; 34] = [
        SegmentKind::Obj,
        SegmentKind::His,
        SegmentKind::Pth,
        SegmentKind::Cls,
        SegmentKind::Ino,
        SegmentKind::Met,
        SegmentKind::Not,
        SegmentKind::Trm,
        SegmentKind::Idx,
        SegmentKind::Sel,
        SegmentKind::Arr,
        SegmentKind::Zip,
        SegmentKind::Qry,
        SegmentKind::Any,
        SegmentKind::All,
        SegmentKind::Equ,
        SegmentKind::Eqa,
        SegmentKind::Neq,
        SegmentKind::Les,
        SegmentKind::Gre,
        SegmentKind::Rgx,
        SegmentKind::Add,
        SegmentKind::Sub,
        SegmentKind::Mul,
        SegmentKind::Div,
        SegmentKind::Orr,
        SegmentKind::Xor,
        SegmentKind::And,
        SegmentKind::Nad,
        SegmentKind::Csp,
        SegmentKind::Its,
        SegmentKind::Dif,
        SegmentKind::Uni,
        SegmentKind::Con,
    ];

    /// Three-letter name of the kind.
    pub fn name(self) -> &'static str {
        match self {
            SegmentKind::Obj => "OBJ",
            SegmentKind::His => "HIS",
            SegmentKind::Pth => "PTH",
            SegmentKind::Cls => "CLS",
            SegmentKind::Ino => "INO",
            SegmentKind::Met => "MET",
            SegmentKind::Not => "NOT",
            SegmentKind::Trm => "TRM",
            SegmentKind::Idx => "IDX",
            SegmentKind::Sel => "SEL",
            SegmentKind::Arr => "ARR",
            SegmentKind::Zip => "ZIP",
            SegmentKind::Qry => "QRY",
            SegmentKind::Any => "ANY",
            SegmentKind::All => "ALL",
            SegmentKind::Equ => "EQU",
            SegmentKind::Eqa => "EQA",
            SegmentKind::Neq => "NEQ",
            SegmentKind::Les => "LES",
            SegmentKind::Gre => "GRE",
            SegmentKind::Rgx => "RGX",
            SegmentKind::Add => "ADD",
            SegmentKind::Sub => "SUB",
            SegmentKind::Mul => "MUL",
            SegmentKind::Div => "DIV",
            SegmentKind::Orr => "ORR",
            SegmentKind::Xor => "XOR",
            SegmentKind::And => "AND",
            SegmentKind::Nad => "NAD",
            SegmentKind::Csp => "CSP",
            SegmentKind::Its => "ITS",
            SegmentKind::Dif => "DIF",
            SegmentKind::Uni => "UNI",
            SegmentKind::Con => "CON",
        }
    }

    /// Canonical wire symbol: one character or an `&`-escaped code.
    pub fn symbol(self) -> &'static str {
        match self {
            SegmentKind::Obj => "#",
            SegmentKind::His => "$",
            SegmentKind::Pth => "/",
            SegmentKind::Cls => "!",
            SegmentKind::Ino => "?",
            SegmentKind::Met => "@",
            SegmentKind::Not => "&NOT",
            SegmentKind::Trm => "&TRM",
            SegmentKind::Idx => ":",
            SegmentKind::Sel => "{",
            SegmentKind::Arr => "[",
            SegmentKind::Zip => "&ZIP",
            SegmentKind::Qry => "(",
            SegmentKind::Any => "&ANY",
            SegmentKind::All => "&ALL",
            SegmentKind::Equ => "=",
            SegmentKind::Eqa => "&EQA",
            SegmentKind::Neq => "~",
            SegmentKind::Les => "<",
            SegmentKind::Gre => ">",
            SegmentKind::Rgx => "&RGX",
            SegmentKind::Add => "&ADD",
            SegmentKind::Sub => "&SUB",
            SegmentKind::Mul => "&MUL",
            SegmentKind::Div => "&DIV",
            SegmentKind::Orr => "&ORR",
            SegmentKind::Xor => "&XOR",
            SegmentKind::And => "&AND",
            SegmentKind::Nad => "&NAD",
            SegmentKind::Csp => "&CSP",
            SegmentKind::Its => "&ITS",
            SegmentKind::Dif => "&DIF",
            SegmentKind::Uni => "&UNI",
            SegmentKind::Con => "&CON",
        }
    }

    /// Look up a kind by its three-letter name (case-insensitive).
    pub fn from_name(name: &str) -> Option<SegmentKind> {
        let upper = name.to_ascii_uppercase();
        SegmentKind::ALL.iter().copied().find(|k| k.name() == upper)
    }

    /// Look up a kind by a single-character symbol.
    pub fn from_char(c: char) -> Option<SegmentKind> {
        match c {
            '#' => Some(SegmentKind::Obj),
            '$' => Some(SegmentKind::His),
            '/' => Some(SegmentKind::Pth),
            '!' => Some(SegmentKind::Cls),
            '?' => Some(SegmentKind::Ino),
            '@' => Some(SegmentKind::Met),
            ':' => Some(SegmentKind::Idx),
            '=' => Some(SegmentKind::Equ),
            '~' => Some(SegmentKind::Neq),
            '<' => Some(SegmentKind::Les),
            '>' => Some(SegmentKind::Gre),
            _ => None,
        }
    }

    /// Kinds whose argument is always a list of values.
    pub fn takes_list(self) -> bool {
        matches!(self, SegmentKind::Arr | SegmentKind::Zip | SegmentKind::Eqa)
    }

    /// Kinds that carry no argument at all.
    pub fn takes_nothing(self) -> bool {
        matches!(self, SegmentKind::Not)
    }
}

impl CompareOp {
    fn kind(self) -> SegmentKind {
        match self {
            CompareOp::Equ => SegmentKind::Equ,
            CompareOp::Neq => SegmentKind::Neq,
            CompareOp::Les => SegmentKind::Les,
            CompareOp::Gre => SegmentKind::Gre,
            CompareOp::Rgx => SegmentKind::Rgx,
        }
    }
}

impl ArithOp {
    fn kind(self) -> SegmentKind {
        match self {
            ArithOp::Add => SegmentKind::Add,
            ArithOp::Sub => SegmentKind::Sub,
            ArithOp::Mul => SegmentKind::Mul,
            ArithOp::Div => SegmentKind::Div,
            ArithOp::Orr => SegmentKind::Orr,
            ArithOp::Xor => SegmentKind::Xor,
            ArithOp::And => SegmentKind::And,
            ArithOp::Nad => SegmentKind::Nad,
        }
    }
}

impl SetOp {
    fn kind(self) -> SegmentKind {
        match self {
            SetOp::Csp => SegmentKind::Csp,
            SetOp::Its => SegmentKind::Its,
            SetOp::Dif => SegmentKind::Dif,
            SetOp::Uni => SegmentKind::Uni,
            SetOp::Con => SegmentKind::Con,
        }
    }
}

impl Segment {
    /// Discriminant of this segment.
    pub fn kind(&self) -> SegmentKind {
        match self {
            Segment::Obj(_) => SegmentKind::Obj,
            Segment::His(_) => SegmentKind::His,
            Segment::Pth(_) => SegmentKind::Pth,
            Segment::Cls(_) => SegmentKind::Cls,
            Segment::Ino(_) => SegmentKind::Ino,
            Segment::Met { .. } => SegmentKind::Met,
            Segment::Not => SegmentKind::Not,
            Segment::Trm { .. } => SegmentKind::Trm,
            Segment::Idx(_) => SegmentKind::Idx,
            Segment::Sel(_) => SegmentKind::Sel,
            Segment::Arr(_) => SegmentKind::Arr,
            Segment::Zip(_) => SegmentKind::Zip,
            Segment::Qry(_) => SegmentKind::Qry,
            Segment::Any(_) => SegmentKind::Any,
            Segment::All(_) => SegmentKind::All,
            Segment::Compare(op, _) => op.kind(),
            Segment::Eqa(_) => SegmentKind::Eqa,
            Segment::Arith(op, _) => op.kind(),
            Segment::Set(op, _) => op.kind(),
        }
    }

    /// Build a segment of a kind that takes a single value argument.
    ///
    /// Returns `None` for kinds with a structured argument (MET, TRM, SEL,
    /// ARR, ZIP, QRY, EQA, NOT).
    pub fn with_value(kind: SegmentKind, v: Value) -> Option<Segment> {
        let seg = match kind {
            SegmentKind::Obj => Segment::Obj(v),
            SegmentKind::His => Segment::His(v),
            SegmentKind::Pth => Segment::Pth(v),
            SegmentKind::Cls => Segment::Cls(v),
            SegmentKind::Ino => Segment::Ino(v),
            SegmentKind::Idx => Segment::Idx(v),
            SegmentKind::Any => Segment::Any(v),
            SegmentKind::All => Segment::All(v),
            SegmentKind::Equ => Segment::Compare(CompareOp::Equ, v),
            SegmentKind::Neq => Segment::Compare(CompareOp::Neq, v),
            SegmentKind::Les => Segment::Compare(CompareOp::Les, v),
            SegmentKind::Gre => Segment::Compare(CompareOp::Gre, v),
            SegmentKind::Rgx => Segment::Compare(CompareOp::Rgx, v),
            SegmentKind::Add => Segment::Arith(ArithOp::Add, v),
            SegmentKind::Sub => Segment::Arith(ArithOp::Sub, v),
            SegmentKind::Mul => Segment::Arith(ArithOp::Mul, v),
            SegmentKind::Div => Segment::Arith(ArithOp::Div, v),
            SegmentKind::Orr => Segment::Arith(ArithOp::Orr, v),
            SegmentKind::Xor => Segment::Arith(ArithOp::Xor, v),
            SegmentKind::And => Segment::Arith(ArithOp::And, v),
            SegmentKind::Nad => Segment::Arith(ArithOp::Nad, v),
            SegmentKind::Csp => Segment::Set(SetOp::Csp, v),
            SegmentKind::Its => Segment::Set(SetOp::Its, v),
            SegmentKind::Dif => Segment::Set(SetOp::Dif, v),
            SegmentKind::Uni => Segment::Set(SetOp::Uni, v),
            SegmentKind::Con => Segment::Set(SetOp::Con, v),
            SegmentKind::Met
            | SegmentKind::Not
            | SegmentKind::Trm
            | SegmentKind::Sel
            | SegmentKind::Arr
            | SegmentKind::Zip
            | SegmentKind::Qry
            | SegmentKind::Eqa => return None,
        };
        Some(seg)
    }
}

/// An ordered pipeline of segments.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    segments: Vec<Segment>,
}

impl Query {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pipeline from segments.
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// The segments of this pipeline.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Consume into the segment list.
    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the pipeline has no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append a segment in place.
    pub fn push(&mut self, seg: Segment) {
        self.segments.push(seg);
    }

    /// Append a segment (chaining).
    pub fn then(mut self, seg: Segment) -> Self {
        self.segments.push(seg);
        self
    }

    /// If this pipeline is a lone object reference with an integer id, return it.
    pub fn as_object_ref(&self) -> Option<i64> {
        match self.segments.as_slice() {
            [Segment::Obj(Value::Int(id))] => Some(*id),
            _ => None,
        }
    }

    // ---- chaining constructors ----

    /// `#id`
    pub fn obj(self, id: impl Into<Value>) -> Self {
        self.then(Segment::Obj(id.into()))
    }

    /// `$n`
    pub fn his(self, n: impl Into<Value>) -> Self {
        self.then(Segment::His(n.into()))
    }

    /// `/feature`
    pub fn pth(self, feature: impl Into<Value>) -> Self {
        self.then(Segment::Pth(feature.into()))
    }

    /// `!Class`
    pub fn cls(self, class: impl Into<Value>) -> Self {
        self.then(Segment::Cls(class.into()))
    }

    /// `?Class`
    pub fn ino(self, class: impl Into<Value>) -> Self {
        self.then(Segment::Ino(class.into()))
    }

    /// `@NAME`
    pub fn met(self, name: &str, args: Vec<Value>) -> Self {
        self.then(Segment::Met {
            name: name.to_string(),
            args,
        })
    }

    /// `&NOT`
    pub fn not(self) -> Self {
        self.then(Segment::Not)
    }

    /// `&TRM(cond,default)`
    pub fn trm(self, cond: impl Into<Value>, default: impl Into<Value>) -> Self {
        self.then(Segment::Trm {
            cond: cond.into(),
            default: default.into(),
        })
    }

    /// `:n`
    pub fn idx(self, n: impl Into<Value>) -> Self {
        self.then(Segment::Idx(n.into()))
    }

    /// `{sub-query}`
    pub fn sel(self, q: Query) -> Self {
        self.then(Segment::Sel(q))
    }

    /// `[a,b,...]`
    pub fn arr(self, items: Vec<Value>) -> Self {
        self.then(Segment::Arr(items))
    }

    /// `&ZIP(a,b,...)`
    pub fn zip(self, items: Vec<Value>) -> Self {
        self.then(Segment::Zip(items))
    }

    /// `(nested)`
    pub fn qry(self, q: Query) -> Self {
        self.then(Segment::Qry(q))
    }

    /// `&ANY v`
    pub fn any(self, v: impl Into<Value>) -> Self {
        self.then(Segment::Any(v.into()))
    }

    /// `&ALL v`
    pub fn all(self, v: impl Into<Value>) -> Self {
        self.then(Segment::All(v.into()))
    }

    /// `=v`
    pub fn equ(self, v: impl Into<Value>) -> Self {
        self.then(Segment::Compare(CompareOp::Equ, v.into()))
    }

    /// `~v`
    pub fn neq(self, v: impl Into<Value>) -> Self {
        self.then(Segment::Compare(CompareOp::Neq, v.into()))
    }

    /// `<v`
    pub fn les(self, v: impl Into<Value>) -> Self {
        self.then(Segment::Compare(CompareOp::Les, v.into()))
    }

    /// `>v`
    pub fn gre(self, v: impl Into<Value>) -> Self {
        self.then(Segment::Compare(CompareOp::Gre, v.into()))
    }

    /// `&RGX pattern`
    pub fn rgx(self, pattern: impl Into<Value>) -> Self {
        self.then(Segment::Compare(CompareOp::Rgx, pattern.into()))
    }

    /// `&EQA(a,b,...)`
    pub fn eqa(self, items: Vec<Value>) -> Self {
        self.then(Segment::Eqa(items))
    }

    /// Arithmetic or boolean operator segment.
    pub fn arith(self, op: ArithOp, v: impl Into<Value>) -> Self {
        self.then(Segment::Arith(op, v.into()))
    }

    /// List operator segment.
    pub fn set_op(self, op: SetOp, v: impl Into<Value>) -> Self {
        self.then(Segment::Set(op, v.into()))
    }
}
