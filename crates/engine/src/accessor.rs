//! Model database accessor contract
//!
//! The engine never touches an object graph directly. Everything it needs,
//! from feature reads and element-wise mutations to the class and feature
//! introspection behind meta segments, goes through [`MdbAccessor`].
//!
//! Every element-wise mutation returns a [`Prior`]: the value it replaced and,
//! for contained values, where that value lived before. The engine turns each
//! `Prior` into one change record and uses it verbatim for rollback.

use std::sync::Arc;

use modelbus_core::{Error, Event, ObjId, Prior, Result, Value};

/// Callback receiving backend-originated events.
pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

/// Clone depth for CLO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloneMode {
    /// Fresh instance of the same class, no values
    Cls,
    /// Attributes only
    Att,
    /// Attributes and references; contained objects are not copied
    Flt,
    /// Attributes and deep copies of contained objects; references dropped
    Dep,
    /// Deep copy; references into the copied tree point at the copies
    Ful,
}

impl CloneMode {
    /// Every clone mode.
    pub const ALL: [CloneMode; 5] = [
        CloneMode::Cls,
        CloneMode::Att,
        CloneMode::Flt,
        CloneMode::Dep,
        CloneMode::Ful,
    ];

    /// Three-letter wire name.
    pub fn name(self) -> &'static str {
        match self {
            CloneMode::Cls => "CLS",
            CloneMode::Att => "ATT",
            CloneMode::Flt => "FLT",
            CloneMode::Dep => "DEP",
            CloneMode::Ful => "FUL",
        }
    }

    /// Look up a clone mode by name (case-insensitive).
    pub fn from_name(name: &str) -> Option<CloneMode> {
        let upper = name.to_ascii_uppercase();
        CloneMode::ALL.iter().copied().find(|m| m.name() == upper)
    }

    /// Parse a clone mode argument.
    pub fn from_value(v: &Value) -> Result<CloneMode> {
        v.as_str()
            .and_then(CloneMode::from_name)
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "clone mode must be one of CLS, ATT, FLT, DEP, FUL, got {}",
                    v.type_name()
                ))
            })
    }
}

/// Subset of a class's features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureFilter {
    /// Every structural feature
    All,
    /// Attributes
    Attributes,
    /// Non-containment references
    References,
    /// Containment references
    Containments,
}

/// Access to an object graph and its metamodel.
///
/// Implementations do not lock; the engine serializes every call behind its
/// own mutex. Object, class, feature and package handles share one id space.
pub trait MdbAccessor: Send {
    // ==================== Graph ====================

    /// Root object queries start from.
    fn root(&self) -> Value;

    /// Whether `id` names a live element.
    fn contains(&self, id: ObjId) -> bool;

    /// Read a feature value. Many-valued features read as lists.
    fn get(&self, obj: ObjId, feature: &str) -> Result<Value>;

    /// Replace a feature value.
    fn set(&mut self, obj: ObjId, feature: &str, value: Value) -> Result<Prior>;

    /// Append to a many-valued feature.
    fn add(&mut self, obj: ObjId, feature: &str, value: Value) -> Result<Prior>;

    /// Insert into a many-valued feature at `index` (clamped to the length).
    fn insert(&mut self, obj: ObjId, feature: &str, index: usize, value: Value) -> Result<Prior>;

    /// Remove a value from a feature. Single-valued features are cleared when
    /// they hold `value`.
    fn remove(&mut self, obj: ObjId, feature: &str, value: &Value) -> Result<Prior>;

    /// Move a contained object to `index` within its containing list.
    ///
    /// The prior's `old_value` is the previous index.
    fn move_to(&mut self, obj: ObjId, index: usize) -> Result<Prior>;

    /// Clone an object. The clone is not contained anywhere.
    fn clone_object(&mut self, obj: ObjId, mode: CloneMode) -> Result<ObjId>;

    /// Create `n` uncontained instances of `class`.
    ///
    /// `args` is a list of `(feature, value)` pairs applied to every instance.
    fn create(&mut self, class: ObjId, n: usize, args: &[Value]) -> Result<Vec<ObjId>>;

    /// Create instances of a class looked up by package and class name.
    fn create_by_name(
        &mut self,
        package: &str,
        class: &str,
        n: usize,
        args: &[Value],
    ) -> Result<Vec<ObjId>> {
        let class = self.class_by_name(package, class)?;
        self.create(class, n, args)
    }

    // ==================== Containment ====================

    /// Container of an element.
    fn parent(&self, obj: ObjId) -> Result<Option<ObjId>>;

    /// Every container up to the top, outermost first.
    fn all_parents(&self, obj: ObjId) -> Result<Vec<ObjId>> {
        let mut parents = Vec::new();
        let mut current = obj;
        while let Some(parent) = self.parent(current)? {
            if parent == obj || parents.contains(&parent) {
                return Err(Error::mdb(format!("containment cycle at {}", parent)));
            }
            parents.push(parent);
            current = parent;
        }
        parents.reverse();
        Ok(parents)
    }

    /// Position within the containing list; `None` for single-valued
    /// containment or uncontained objects.
    fn index(&self, obj: ObjId) -> Result<Option<usize>>;

    /// Handle of the feature holding `obj`.
    fn containing_feature(&self, obj: ObjId) -> Result<Option<ObjId>>;

    /// Objects below `root` (default: the accessor root) referencing `obj`.
    fn associates(&self, obj: ObjId, root: Option<ObjId>) -> Result<Vec<ObjId>>;

    /// Every transitively contained object whose class is named `class`, or
    /// with `include_subclasses`, derives from a class of that name.
    fn children_of_class(
        &self,
        obj: ObjId,
        class: &str,
        include_subclasses: bool,
    ) -> Result<Vec<ObjId>>;

    // ==================== Metamodel ====================

    /// Class of an element.
    fn class_of(&self, obj: ObjId) -> Result<ObjId>;

    /// Class lookup by package and class name.
    fn class_by_name(&self, package: &str, class: &str) -> Result<ObjId>;

    /// Class lookup by name across the registered metamodels.
    fn find_class(&self, name: &str) -> Result<ObjId>;

    /// Package owning a class.
    fn package_of(&self, class: ObjId) -> Result<ObjId>;

    /// Direct (or with `transitive`, all) supertypes of a class.
    fn supertypes(&self, class: ObjId, transitive: bool) -> Result<Vec<ObjId>>;

    /// Direct (or with `transitive`, all) subclasses of a class.
    fn implementers(&self, class: ObjId, transitive: bool) -> Result<Vec<ObjId>>;

    /// Features of an element's class, inherited ones first.
    fn features(&self, obj: ObjId, filter: FeatureFilter) -> Result<Vec<ObjId>>;

    /// Name of a package, class or feature.
    fn name_of(&self, element: ObjId) -> Result<String>;

    // ==================== Metamodel registry ====================

    /// Registered metamodel packages.
    fn metamodels(&self) -> Vec<ObjId>;

    /// Register a metamodel package.
    fn register_metamodel(&mut self, package: ObjId) -> Result<Value>;

    /// Unregister a metamodel package.
    fn unregister_metamodel(&mut self, package: ObjId) -> Result<Value>;

    // ==================== Events ====================

    /// Install a sink for backend-originated events.
    fn observe(&mut self, sink: EventSink);
}
