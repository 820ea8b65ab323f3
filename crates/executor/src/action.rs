//! Action manifests and the action registry
//!
//! An action is an entry point plus a manifest describing its parameters and
//! results. Manifests are the source of GAA descriptors:
//!
//! ```text
//! [name, [[arg, type, min, max, default, description, [[choice, description]]]],
//!  results, description, tags]
//! ```
//!
//! Entry points are either native closures or scripts found by the legacy
//! importer and run through an embedder-supplied [`ScriptRunner`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use modelbus_core::{Error, Result, Value};
use modelbus_engine::Domain;

/// Upper multiplicity bound meaning "unbounded".
pub const UNBOUNDED: i64 = -1;

/// One allowed value of a parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Value as written in the manifest
    pub value: String,
    /// Optional description
    #[serde(default)]
    pub description: String,
}

impl Choice {
    /// Choice without description.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            description: String::new(),
        }
    }
}

/// Description of one parameter or result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name
    pub name: String,
    /// Type name, `*` for any
    #[serde(rename = "type")]
    pub type_name: String,
    /// Lower multiplicity bound
    #[serde(default = "one")]
    pub min: i64,
    /// Upper multiplicity bound, [`UNBOUNDED`] for none
    #[serde(default = "one")]
    pub max: i64,
    /// Default value as text
    #[serde(default)]
    pub default: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Allowed values
    #[serde(default)]
    pub choices: Vec<Choice>,
}

fn one() -> i64 {
    1
}

impl ParamSpec {
    /// Single-valued parameter of `type_name`.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            min: 1,
            max: 1,
            default: String::new(),
            description: String::new(),
            choices: Vec::new(),
        }
    }

    /// Set the multiplicity.
    pub fn multiplicity(mut self, min: i64, max: i64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Set the description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the default.
    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = default.into();
        self
    }

    /// Add an allowed value.
    pub fn choice(mut self, choice: Choice) -> Self {
        self.choices.push(choice);
        self
    }

    /// `[name, type, min, max, default, description, [[choice, description]]]`
    pub fn to_value(&self) -> Value {
        Value::List(vec![
            Value::from(self.name.as_str()),
            Value::from(self.type_name.as_str()),
            Value::Int(self.min),
            Value::Int(self.max),
            Value::from(self.default.as_str()),
            Value::from(self.description.as_str()),
            Value::List(
                self.choices
                    .iter()
                    .map(|c| {
                        Value::List(vec![
                            Value::from(c.value.as_str()),
                            Value::from(c.description.as_str()),
                        ])
                    })
                    .collect(),
            ),
        ])
    }
}

/// Name, description, tags and signature of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionManifest {
    /// Unique action name, `/`-separated for nested script trees
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Tags used by clients to group actions
    #[serde(default)]
    pub tags: Vec<String>,
    /// Parameters after the implicit domain handle
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Results
    #[serde(default)]
    pub results: Vec<ParamSpec>,
}

impl ActionManifest {
    /// Manifest with no parameters or results.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            params: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Set the description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add a parameter.
    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Add a result.
    pub fn result(mut self, result: ParamSpec) -> Self {
        self.results.push(result);
        self
    }

    /// GAA descriptor.
    pub fn to_value(&self) -> Value {
        Value::List(vec![
            Value::from(self.name.as_str()),
            Value::List(self.params.iter().map(ParamSpec::to_value).collect()),
            Value::List(self.results.iter().map(ParamSpec::to_value).collect()),
            Value::from(self.description.as_str()),
            Value::List(self.tags.iter().map(|t| Value::from(t.as_str())).collect()),
        ])
    }
}

/// Callable body of an action.
pub trait ActionEntry: Send + Sync {
    /// Run the action. `args` excludes the domain handle.
    fn invoke(&self, domain: &mut dyn Domain, args: &[Value]) -> Result<Value>;
}

impl<F> ActionEntry for F
where
    F: Fn(&mut dyn Domain, &[Value]) -> Result<Value> + Send + Sync,
{
    fn invoke(&self, domain: &mut dyn Domain, args: &[Value]) -> Result<Value> {
        self(domain, args)
    }
}

/// Wrap a closure as an entry point.
pub fn native<F>(f: F) -> Arc<dyn ActionEntry>
where
    F: Fn(&mut dyn Domain, &[Value]) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Runs imported action scripts.
///
/// The runtime does not embed an interpreter; applications importing a
/// script tree supply one.
pub trait ScriptRunner: Send + Sync {
    /// Call `function` defined in `script` with the domain and arguments.
    fn run(
        &self,
        script: &Path,
        function: &str,
        domain: &mut dyn Domain,
        args: &[Value],
    ) -> Result<Value>;
}

/// Entry point of an imported script.
pub struct ScriptAction {
    path: PathBuf,
    function: String,
    runner: Arc<dyn ScriptRunner>,
}

impl ScriptAction {
    /// Script entry calling `function` in `path` through `runner`.
    pub fn new(path: PathBuf, function: String, runner: Arc<dyn ScriptRunner>) -> Self {
        Self {
            path,
            function,
            runner,
        }
    }

    /// Script file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ActionEntry for ScriptAction {
    fn invoke(&self, domain: &mut dyn Domain, args: &[Value]) -> Result<Value> {
        self.runner.run(&self.path, &self.function, domain, args)
    }
}

/// A registered action.
#[derive(Clone)]
pub struct RegisteredAction {
    /// Manifest
    pub manifest: ActionManifest,
    /// Entry point
    pub entry: Arc<dyn ActionEntry>,
    /// Script the action was imported from, if any
    pub source: Option<PathBuf>,
}

impl std::fmt::Debug for RegisteredAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredAction")
            .field("name", &self.manifest.name)
            .field("source", &self.source)
            .finish()
    }
}

/// Actions by name.
#[derive(Debug, Default)]
pub struct ActionRegistry {
    actions: RwLock<BTreeMap<String, RegisteredAction>>,
}

impl ActionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native action.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the name is taken.
    pub fn register(&self, manifest: ActionManifest, entry: Arc<dyn ActionEntry>) -> Result<()> {
        self.insert(RegisteredAction {
            manifest,
            entry,
            source: None,
        })
    }

    /// Register an action with full metadata.
    pub fn insert(&self, action: RegisteredAction) -> Result<()> {
        let mut actions = self.actions.write();
        let name = action.manifest.name.clone();
        if let Some(existing) = actions.get(&name) {
            warn!(
                target: "modelbus::actions",
                action = %name,
                source = ?action.source,
                existing = ?existing.source,
                "Duplicate action name, skipped"
            );
            return Err(Error::invalid_argument(format!(
                "action {} is already registered",
                name
            )));
        }
        info!(target: "modelbus::actions", action = %name, "Action registered");
        actions.insert(name, action);
        Ok(())
    }

    /// Remove an action. Returns `false` if it was not registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.actions.write().remove(name).is_some()
    }

    /// Look up an action.
    pub fn get(&self, name: &str) -> Result<RegisteredAction> {
        self.actions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownAction {
                name: name.to_string(),
            })
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.actions.read().contains_key(name)
    }

    /// GAA descriptors, ordered by name.
    pub fn descriptors(&self) -> Vec<Value> {
        self.actions
            .read()
            .values()
            .map(|a| a.manifest.to_value())
            .collect()
    }

    /// Registered names, ordered.
    pub fn names(&self) -> Vec<String> {
        self.actions.read().keys().cloned().collect()
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.read().len()
    }

    /// Whether no action is registered.
    pub fn is_empty(&self) -> bool {
        self.actions.read().is_empty()
    }
}
