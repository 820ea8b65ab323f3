//! Command enum defining all modelbus operations.
//!
//! Commands are the instruction set of the protocol. Every operation a client
//! can request is a variant of [`Command`]. Arguments are plain [`Value`]s and
//! may embed unevaluated queries; the engine resolves them against the
//! transaction history when the command runs, never when it is built.
//!
//! Commands are:
//! - **Self-contained**: all parameters needed for execution are in the variant
//! - **Serializable**: JSON via serde, text via the wire codec
//! - **Pure data**: no closures or executable code

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

/// Fieldless discriminant of [`Command`] carrying the wire mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum CommandKind {
    Get,
    Set,
    Add,
    Rem,
    Mov,
    Del,
    Clo,
    Crt,
    Crn,
    Qrf,
    Gmm,
    Rmm,
    Umm,
    Hel,
    Gby,
    Ses,
    Sts,
    Chg,
    Obs,
    Ubs,
    Gaa,
    Cal,
    Asc,
    Abc,
    Cst,
    Cmp,
}

impl CommandKind {
    /// Every command kind.
    pub const ALL: [CommandKind; 26] = [
        CommandKind::Get,
        CommandKind::Set,
        CommandKind::Add,
        CommandKind::Rem,
        CommandKind::Mov,
        CommandKind::Del,
        CommandKind::Clo,
        CommandKind::Crt,
        CommandKind::Crn,
        CommandKind::Qrf,
        CommandKind::Gmm,
        CommandKind::Rmm,
        CommandKind::Umm,
        CommandKind::Hel,
        CommandKind::Gby,
        CommandKind::Ses,
        CommandKind::Sts,
        CommandKind::Chg,
        CommandKind::Obs,
        CommandKind::Ubs,
        CommandKind::Gaa,
        CommandKind::Cal,
        CommandKind::Asc,
        CommandKind::Abc,
        CommandKind::Cst,
        CommandKind::Cmp,
    ];

    /// Three-letter wire mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            CommandKind::Get => "GET",
            CommandKind::Set => "SET",
            CommandKind::Add => "ADD",
            CommandKind::Rem => "REM",
            CommandKind::Mov => "MOV",
            CommandKind::Del => "DEL",
            CommandKind::Clo => "CLO",
            CommandKind::Crt => "CRT",
            CommandKind::Crn => "CRN",
            CommandKind::Qrf => "QRF",
            CommandKind::Gmm => "GMM",
            CommandKind::Rmm => "RMM",
            CommandKind::Umm => "UMM",
            CommandKind::Hel => "HEL",
            CommandKind::Gby => "GBY",
            CommandKind::Ses => "SES",
            CommandKind::Sts => "STS",
            CommandKind::Chg => "CHG",
            CommandKind::Obs => "OBS",
            CommandKind::Ubs => "UBS",
            CommandKind::Gaa => "GAA",
            CommandKind::Cal => "CAL",
            CommandKind::Asc => "ASC",
            CommandKind::Abc => "ABC",
            CommandKind::Cst => "CST",
            CommandKind::Cmp => "CMP",
        }
    }

    /// Look up a kind by mnemonic (case-insensitive).
    pub fn from_mnemonic(s: &str) -> Option<CommandKind> {
        let upper = s.to_ascii_uppercase();
        CommandKind::ALL
            .iter()
            .copied()
            .find(|k| k.mnemonic() == upper)
    }

    /// Minimum and maximum number of positional arguments.
    ///
    /// CMP is variadic and reports `(0, usize::MAX)`.
    pub fn arity(self) -> (usize, usize) {
        match self {
            CommandKind::Gmm | CommandKind::Sts | CommandKind::Gaa => (0, 0),
            CommandKind::Get
            | CommandKind::Del
            | CommandKind::Qrf
            | CommandKind::Rmm
            | CommandKind::Umm
            | CommandKind::Gby
            | CommandKind::Ses
            | CommandKind::Abc
            | CommandKind::Cst => (1, 1),
            CommandKind::Mov | CommandKind::Clo | CommandKind::Hel => (2, 2),
            CommandKind::Obs | CommandKind::Ubs => (2, 2),
            CommandKind::Set | CommandKind::Add | CommandKind::Rem => (3, 3),
            CommandKind::Crt => (2, 3),
            CommandKind::Crn => (3, 4),
            CommandKind::Chg => (1, 2),
            CommandKind::Cal | CommandKind::Asc => (1, 3),
            CommandKind::Cmp => (0, usize::MAX),
        }
    }

    /// Whether commands of this kind may record changes.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            CommandKind::Set
                | CommandKind::Add
                | CommandKind::Rem
                | CommandKind::Mov
                | CommandKind::Del
        )
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A command is a self-contained, serializable operation.
///
/// # Command Categories
///
/// | Category | Count | Description |
/// |----------|-------|-------------|
/// | Read | 2 | GET, QRF |
/// | Mutation | 5 | SET, ADD, REM, MOV, DEL |
/// | Creation | 3 | CLO, CRT, CRN |
/// | Metamodel | 3 | GMM, RMM, UMM |
/// | Session | 3 | HEL, GBY, SES |
/// | Changes | 2 | STS, CHG |
/// | Events | 2 | OBS, UBS |
/// | Actions | 5 | GAA, CAL, ASC, ABC, CST |
/// | Compound | 1 | CMP |
///
/// # Example
///
/// ```
/// use modelbus_core::{Command, Query, Value};
///
/// let cmd = Command::Set {
///     target: Query::new().obj(1).into(),
///     feature: "name".into(),
///     value: Value::from("bar"),
/// };
/// assert_eq!(cmd.kind().mnemonic(), "SET");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub enum Command {
    // ==================== Read (2) ====================
    /// Evaluate a query.
    /// Returns: the evaluated value
    Get {
        /// Value or query to evaluate
        target: Value,
    },

    /// Build the path query locating each target from the root.
    /// Returns: a query, or a list of queries
    Qrf {
        /// Object(s) to locate
        target: Value,
    },

    // ==================== Mutation (5) ====================
    /// Set a feature value.
    /// Returns: `[target, feature, value]`
    Set {
        /// Object(s) to modify
        target: Value,
        /// Feature name(s)
        feature: Value,
        /// New value(s)
        value: Value,
    },

    /// Add to a many-valued feature.
    /// Returns: `[target, feature, value]`
    Add {
        /// Object(s) to modify
        target: Value,
        /// Feature name(s)
        feature: Value,
        /// Value(s) to append
        value: Value,
    },

    /// Remove from a many-valued feature.
    /// Returns: `[target, feature, value]`
    Rem {
        /// Object(s) to modify
        target: Value,
        /// Feature name(s)
        feature: Value,
        /// Value(s) to remove
        value: Value,
    },

    /// Move an element within its containing list.
    /// Returns: `[target, index]`
    Mov {
        /// Contained object(s)
        target: Value,
        /// New position(s)
        index: Value,
    },

    /// Detach objects from their containers.
    /// Returns: the detached target(s)
    Del {
        /// Object(s) to detach
        target: Value,
    },

    // ==================== Creation (3) ====================
    /// Clone objects.
    /// Returns: the clone(s)
    Clo {
        /// Object(s) to clone
        target: Value,
        /// Clone mode: `CLS`, `ATT`, `FLT`, `DEP` or `FUL`
        mode: Value,
    },

    /// Create `n` instances of a class (given as class object or name).
    /// Returns: the object if `n == 1`, otherwise a list
    Crt {
        /// Class object or class name
        class: Value,
        /// Instance count
        n: Value,
        /// `(feature,value)` pairs applied to each instance
        args: Value,
    },

    /// Create `n` instances of a class named within a package.
    /// Returns: the object if `n == 1`, otherwise a list
    Crn {
        /// Package name
        package: Value,
        /// Class name
        class: Value,
        /// Instance count
        n: Value,
        /// `(feature,value)` pairs applied to each instance
        args: Value,
    },

    // ==================== Metamodel (3) ====================
    /// List registered metamodels.
    /// Returns: list of metamodel roots
    Gmm,

    /// Register a metamodel.
    /// Returns: accessor result
    Rmm {
        /// Metamodel root package
        metamodel: Value,
    },

    /// Unregister a metamodel.
    /// Returns: accessor result
    Umm {
        /// Metamodel root package
        metamodel: Value,
    },

    // ==================== Session (3) ====================
    /// Log in: bind or create a session and record the user.
    /// Returns: the session id
    Hel {
        /// User name
        user: Value,
        /// Opaque password
        password: Value,
    },

    /// Log out: delete a session.
    /// Returns: `true`
    Gby {
        /// Session id
        session: Value,
    },

    /// Bind the transaction to an existing session.
    /// Returns: `true`
    Ses {
        /// Session id
        session: Value,
    },

    // ==================== Changes (2) ====================
    /// Last committed change id.
    /// Returns: int (-1 when none)
    Sts,

    /// Changes since `change_id`, at most `n` of them (`0` means all).
    /// Returns: list of change records
    Chg {
        /// First change id of the window
        change_id: Value,
        /// Maximum number of records
        n: Value,
    },

    // ==================== Events (2) ====================
    /// Subscribe the bound session to events.
    /// Returns: `true`
    Obs {
        /// Event type or `*`
        event_type: Value,
        /// Event key or `*`
        key: Value,
    },

    /// Unsubscribe the bound session from events.
    /// Returns: `true`
    Ubs {
        /// Event type or `*`
        event_type: Value,
        /// Event key or `*`
        key: Value,
    },

    // ==================== Actions (5) ====================
    /// List registered actions with their schemas.
    /// Returns: list of action descriptors
    Gaa,

    /// Call an action synchronously inside the current transaction.
    /// Returns: the action result
    Cal {
        /// Action name
        name: Value,
        /// Positional arguments
        args: Value,
        /// `(name,value)` call options
        opts: Value,
    },

    /// Start an action asynchronously.
    /// Returns: the call id
    Asc {
        /// Action name
        name: Value,
        /// Positional arguments
        args: Value,
        /// `(name,value)` call options
        opts: Value,
    },

    /// Abort a running async call.
    /// Returns: `true`
    Abc {
        /// Call id
        call_id: Value,
    },

    /// Report the state of a call.
    /// Returns: `[callId, status, info, value, outputs]`
    Cst {
        /// Call id
        call_id: Value,
    },

    // ==================== Compound (1) ====================
    /// Run sub-commands in order inside one transaction.
    /// Returns: list of sub-results
    Cmp(Compound),
}

/// Sub-commands of a CMP.
///
/// Nested compounds are spliced into their parent on construction, so a
/// compound never directly contains another compound.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Command>", into = "Vec<Command>")]
pub struct Compound(Vec<Command>);

impl Compound {
    /// Compound of `commands`, flattening nested compounds.
    pub fn new(commands: Vec<Command>) -> Self {
        let mut flat = Vec::with_capacity(commands.len());
        for cmd in commands {
            match cmd {
                Command::Cmp(Compound(children)) => flat.extend(children),
                other => flat.push(other),
            }
        }
        Compound(flat)
    }

    /// Sub-commands in execution order.
    pub fn commands(&self) -> &[Command] {
        &self.0
    }

    /// Number of sub-commands.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no sub-commands.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Take the sub-commands.
    pub fn into_commands(self) -> Vec<Command> {
        self.0
    }
}

impl From<Vec<Command>> for Compound {
    fn from(commands: Vec<Command>) -> Self {
        Compound::new(commands)
    }
}

impl From<Compound> for Vec<Command> {
    fn from(compound: Compound) -> Self {
        compound.0
    }
}

impl std::ops::Deref for Compound {
    type Target = [Command];

    fn deref(&self) -> &[Command] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a Compound {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

fn null() -> Value {
    Value::Null
}

fn empty_list() -> Value {
    Value::List(Vec::new())
}

impl Command {
    /// The kind of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Get { .. } => CommandKind::Get,
            Command::Qrf { .. } => CommandKind::Qrf,
            Command::Set { .. } => CommandKind::Set,
            Command::Add { .. } => CommandKind::Add,
            Command::Rem { .. } => CommandKind::Rem,
            Command::Mov { .. } => CommandKind::Mov,
            Command::Del { .. } => CommandKind::Del,
            Command::Clo { .. } => CommandKind::Clo,
            Command::Crt { .. } => CommandKind::Crt,
            Command::Crn { .. } => CommandKind::Crn,
            Command::Gmm => CommandKind::Gmm,
            Command::Rmm { .. } => CommandKind::Rmm,
            Command::Umm { .. } => CommandKind::Umm,
            Command::Hel { .. } => CommandKind::Hel,
            Command::Gby { .. } => CommandKind::Gby,
            Command::Ses { .. } => CommandKind::Ses,
            Command::Sts => CommandKind::Sts,
            Command::Chg { .. } => CommandKind::Chg,
            Command::Obs { .. } => CommandKind::Obs,
            Command::Ubs { .. } => CommandKind::Ubs,
            Command::Gaa => CommandKind::Gaa,
            Command::Cal { .. } => CommandKind::Cal,
            Command::Asc { .. } => CommandKind::Asc,
            Command::Abc { .. } => CommandKind::Abc,
            Command::Cst { .. } => CommandKind::Cst,
            Command::Cmp(_) => CommandKind::Cmp,
        }
    }

    /// Compound of `commands`; nested compounds are flattened.
    pub fn cmp(commands: Vec<Command>) -> Self {
        Command::Cmp(Compound::new(commands))
    }

    /// Shorthand for a GET of `target`.
    pub fn get(target: impl Into<Value>) -> Self {
        Command::Get {
            target: target.into(),
        }
    }

    /// Shorthand for a SET.
    pub fn set(target: impl Into<Value>, feature: impl Into<Value>, value: impl Into<Value>) -> Self {
        Command::Set {
            target: target.into(),
            feature: feature.into(),
            value: value.into(),
        }
    }

    /// Shorthand for a changes-since query returning everything after `change_id`.
    pub fn chg(change_id: i64) -> Self {
        Command::Chg {
            change_id: Value::Int(change_id),
            n: Value::Int(0),
        }
    }

    /// Build a non-compound command from positional arguments.
    ///
    /// Missing optional trailing arguments are filled with their defaults:
    /// CRT/CRN `args` and CAL/ASC `args`/`opts` become empty lists, CHG `n`
    /// becomes `0`. Too few or too many arguments is [`Error::Arity`].
    pub fn from_parts(kind: CommandKind, args: Vec<Value>) -> Result<Command> {
        let (min, max) = kind.arity();
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{min}..{max}")
            };
            return Err(Error::Arity {
                command: kind.mnemonic().to_string(),
                expected,
                actual: args.len(),
            });
        }

        let mut it = args.into_iter();
        let mut next = |default: fn() -> Value| it.next().unwrap_or_else(default);
        let cmd = match kind {
            CommandKind::Get => Command::Get {
                target: next(null),
            },
            CommandKind::Qrf => Command::Qrf {
                target: next(null),
            },
            CommandKind::Set => Command::Set {
                target: next(null),
                feature: next(null),
                value: next(null),
            },
            CommandKind::Add => Command::Add {
                target: next(null),
                feature: next(null),
                value: next(null),
            },
            CommandKind::Rem => Command::Rem {
                target: next(null),
                feature: next(null),
                value: next(null),
            },
            CommandKind::Mov => Command::Mov {
                target: next(null),
                index: next(null),
            },
            CommandKind::Del => Command::Del {
                target: next(null),
            },
            CommandKind::Clo => Command::Clo {
                target: next(null),
                mode: next(null),
            },
            CommandKind::Crt => Command::Crt {
                class: next(null),
                n: next(null),
                args: next(empty_list),
            },
            CommandKind::Crn => Command::Crn {
                package: next(null),
                class: next(null),
                n: next(null),
                args: next(empty_list),
            },
            CommandKind::Gmm => Command::Gmm,
            CommandKind::Rmm => Command::Rmm {
                metamodel: next(null),
            },
            CommandKind::Umm => Command::Umm {
                metamodel: next(null),
            },
            CommandKind::Hel => Command::Hel {
                user: next(null),
                password: next(null),
            },
            CommandKind::Gby => Command::Gby {
                session: next(null),
            },
            CommandKind::Ses => Command::Ses {
                session: next(null),
            },
            CommandKind::Sts => Command::Sts,
            CommandKind::Chg => Command::Chg {
                change_id: next(null),
                n: next(|| Value::Int(0)),
            },
            CommandKind::Obs => Command::Obs {
                event_type: next(null),
                key: next(null),
            },
            CommandKind::Ubs => Command::Ubs {
                event_type: next(null),
                key: next(null),
            },
            CommandKind::Gaa => Command::Gaa,
            CommandKind::Cal => Command::Cal {
                name: next(null),
                args: next(empty_list),
                opts: next(empty_list),
            },
            CommandKind::Asc => Command::Asc {
                name: next(null),
                args: next(empty_list),
                opts: next(empty_list),
            },
            CommandKind::Abc => Command::Abc {
                call_id: next(null),
            },
            CommandKind::Cst => Command::Cst {
                call_id: next(null),
            },
            CommandKind::Cmp => {
                return Err(Error::invalid_argument(
                    "CMP is built from sub-commands, not positional arguments",
                ))
            }
        };
        Ok(cmd)
    }

    /// Positional arguments of a non-compound command.
    ///
    /// Optional trailing arguments equal to their default are omitted, so
    /// `from_parts(kind, cmd.to_parts())` reproduces `cmd`. Returns an empty
    /// vector for CMP.
    pub fn to_parts(&self) -> Vec<Value> {
        let mut parts = match self {
            Command::Get { target }
            | Command::Qrf { target }
            | Command::Del { target } => vec![target.clone()],
            Command::Set {
                target,
                feature,
                value,
            }
            | Command::Add {
                target,
                feature,
                value,
            }
            | Command::Rem {
                target,
                feature,
                value,
            } => vec![target.clone(), feature.clone(), value.clone()],
            Command::Mov { target, index } => vec![target.clone(), index.clone()],
            Command::Clo { target, mode } => vec![target.clone(), mode.clone()],
            Command::Crt { class, n, args } => vec![class.clone(), n.clone(), args.clone()],
            Command::Crn {
                package,
                class,
                n,
                args,
            } => vec![package.clone(), class.clone(), n.clone(), args.clone()],
            Command::Gmm | Command::Sts | Command::Gaa | Command::Cmp(_) => Vec::new(),
            Command::Rmm { metamodel } | Command::Umm { metamodel } => vec![metamodel.clone()],
            Command::Hel { user, password } => vec![user.clone(), password.clone()],
            Command::Gby { session } | Command::Ses { session } => vec![session.clone()],
            Command::Chg { change_id, n } => vec![change_id.clone(), n.clone()],
            Command::Obs { event_type, key } | Command::Ubs { event_type, key } => {
                vec![event_type.clone(), key.clone()]
            }
            Command::Cal { name, args, opts } | Command::Asc { name, args, opts } => {
                vec![name.clone(), args.clone(), opts.clone()]
            }
            Command::Abc { call_id } | Command::Cst { call_id } => vec![call_id.clone()],
        };

        // Drop optional trailing arguments that hold their defaults.
        let (min, _) = self.kind().arity();
        while parts.len() > min {
            let is_default = match (self.kind(), parts.last()) {
                (CommandKind::Chg, Some(Value::Int(0))) => true,
                (
                    CommandKind::Crt | CommandKind::Crn | CommandKind::Cal | CommandKind::Asc,
                    Some(Value::List(items)),
                ) => items.is_empty(),
                _ => false,
            };
            if !is_default {
                break;
            }
            parts.pop();
        }
        parts
    }
}
