//! Reference in-memory model database
//!
//! [`InMemoryMdb`] keeps a small dynamic metamodel and its instances in one
//! node table keyed by handle:
//!
//! - packages own classes
//! - classes have supertypes and features
//! - features are attributes, references or containments, single or many
//! - objects hold feature values and a back pointer to their container
//!
//! Metamodel elements are handles like any object. They are read-only and
//! expose pseudo-features (`name`, `classes`, `supertypes`, `features`,
//! `kind`, `many`, ...) typed by the built-in `mdb` package, so meta segments
//! work on them too.
//!
//! A fresh database holds the built-in package and one root object of class
//! `Workspace` with a many-valued `models` containment.

use rustc_hash::FxHashMap;
use tracing::debug;

use modelbus_core::{Error, Event, EventType, ObjId, Prior, Result, Value, WILDCARD};

use crate::accessor::{CloneMode, EventSink, FeatureFilter, MdbAccessor};

/// Name of the built-in package.
pub const BUILTIN_PACKAGE: &str = "mdb";

/// Kind of a structural feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// Plain data value
    Attribute,
    /// Non-owning link to another object
    Reference,
    /// Owning link; a contained object has exactly one container
    Containment,
}

impl FeatureKind {
    /// Lowercase name, as read through the `kind` pseudo-feature.
    pub fn name(self) -> &'static str {
        match self {
            FeatureKind::Attribute => "attribute",
            FeatureKind::Reference => "reference",
            FeatureKind::Containment => "containment",
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    parent: ObjId,
    feature: String,
}

#[derive(Debug, Clone)]
struct ObjectNode {
    class: ObjId,
    values: FxHashMap<String, Value>,
    slot: Option<Slot>,
}

#[derive(Debug, Clone)]
enum Node {
    Package {
        name: String,
        classes: Vec<ObjId>,
    },
    Class {
        name: String,
        package: ObjId,
        supertypes: Vec<ObjId>,
        features: Vec<ObjId>,
    },
    Feature {
        name: String,
        kind: FeatureKind,
        many: bool,
        owner: ObjId,
    },
    Object(ObjectNode),
}

#[derive(Debug, Clone, Copy)]
struct FeatureDef {
    id: ObjId,
    kind: FeatureKind,
    many: bool,
}

#[derive(Debug, Clone, Copy)]
struct MetaClasses {
    package: ObjId,
    class: ObjId,
    feature: ObjId,
}

/// In-memory object graph with a dynamic metamodel.
pub struct InMemoryMdb {
    nodes: FxHashMap<ObjId, Node>,
    next_id: u64,
    root: ObjId,
    builtin: ObjId,
    meta: MetaClasses,
    metamodels: Vec<ObjId>,
    sinks: Vec<EventSink>,
}

impl Default for InMemoryMdb {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryMdb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMdb")
            .field("nodes", &self.nodes.len())
            .field("root", &self.root)
            .field("metamodels", &self.metamodels)
            .finish()
    }
}

fn handles(ids: &[ObjId]) -> Value {
    Value::List(ids.iter().copied().map(Value::Obj).collect())
}

fn obj_ids(v: &Value) -> Vec<ObjId> {
    match v {
        Value::Obj(id) => vec![*id],
        Value::List(items) => items.iter().filter_map(Value::as_obj).collect(),
        _ => Vec::new(),
    }
}

impl InMemoryMdb {
    /// Create a database holding the built-in package and a workspace root.
    pub fn new() -> Self {
        let mut mdb = Self {
            nodes: FxHashMap::default(),
            next_id: 0,
            root: ObjId(0),
            builtin: ObjId(0),
            meta: MetaClasses {
                package: ObjId(0),
                class: ObjId(0),
                feature: ObjId(0),
            },
            metamodels: Vec::new(),
            sinks: Vec::new(),
        };
        mdb.bootstrap();
        mdb
    }

    fn bootstrap(&mut self) {
        let builtin = self.alloc(Node::Package {
            name: BUILTIN_PACKAGE.to_string(),
            classes: Vec::new(),
        });
        self.builtin = builtin;
        self.metamodels.push(builtin);

        let package = self.push_class(builtin, "Package", &[]);
        self.push_feature(package, "name", FeatureKind::Attribute, false);
        self.push_feature(package, "classes", FeatureKind::Reference, true);

        let class = self.push_class(builtin, "Class", &[]);
        self.push_feature(class, "name", FeatureKind::Attribute, false);
        self.push_feature(class, "package", FeatureKind::Reference, false);
        self.push_feature(class, "supertypes", FeatureKind::Reference, true);
        self.push_feature(class, "features", FeatureKind::Reference, true);

        let feature = self.push_class(builtin, "Feature", &[]);
        self.push_feature(feature, "name", FeatureKind::Attribute, false);
        self.push_feature(feature, "kind", FeatureKind::Attribute, false);
        self.push_feature(feature, "many", FeatureKind::Attribute, false);
        self.push_feature(feature, "owner", FeatureKind::Reference, false);

        self.meta = MetaClasses {
            package,
            class,
            feature,
        };

        let workspace = self.push_class(builtin, "Workspace", &[]);
        self.push_feature(workspace, "name", FeatureKind::Attribute, false);
        self.push_feature(workspace, "models", FeatureKind::Containment, true);

        let mut values = FxHashMap::default();
        values.insert("name".to_string(), Value::from("workspace"));
        self.root = self.alloc(Node::Object(ObjectNode {
            class: workspace,
            values,
            slot: None,
        }));
    }

    fn alloc(&mut self, node: Node) -> ObjId {
        let id = ObjId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, node);
        id
    }

    fn push_class(&mut self, package: ObjId, name: &str, supertypes: &[ObjId]) -> ObjId {
        let id = self.alloc(Node::Class {
            name: name.to_string(),
            package,
            supertypes: supertypes.to_vec(),
            features: Vec::new(),
        });
        if let Some(Node::Package { classes, .. }) = self.nodes.get_mut(&package) {
            classes.push(id);
        }
        id
    }

    fn push_feature(&mut self, class: ObjId, name: &str, kind: FeatureKind, many: bool) -> ObjId {
        let id = self.alloc(Node::Feature {
            name: name.to_string(),
            kind,
            many,
            owner: class,
        });
        if let Some(Node::Class { features, .. }) = self.nodes.get_mut(&class) {
            features.push(id);
        }
        id
    }

    // ==================== Metamodel definition ====================

    /// Define and register a package.
    pub fn define_package(&mut self, name: &str) -> Result<ObjId> {
        if self.package_named(name).is_some() {
            return Err(Error::mdb(format!("package {} already exists", name)));
        }
        let id = self.alloc(Node::Package {
            name: name.to_string(),
            classes: Vec::new(),
        });
        self.metamodels.push(id);
        debug!(target: "modelbus::mdb", package = name, id = %id, "Package defined");
        Ok(id)
    }

    /// Define a class in `package`.
    pub fn define_class(
        &mut self,
        package: ObjId,
        name: &str,
        supertypes: &[ObjId],
    ) -> Result<ObjId> {
        let classes = match self.nodes.get(&package) {
            Some(Node::Package { classes, .. }) => classes,
            _ => return Err(Error::mdb(format!("{} is not a package", package))),
        };
        if classes.iter().any(|c| self.class_name(*c) == Some(name)) {
            return Err(Error::mdb(format!("class {} already exists", name)));
        }
        for sup in supertypes {
            if !matches!(self.nodes.get(sup), Some(Node::Class { .. })) {
                return Err(Error::mdb(format!("supertype {} is not a class", sup)));
            }
        }
        Ok(self.push_class(package, name, supertypes))
    }

    /// Define a structural feature on `class`.
    pub fn define_feature(
        &mut self,
        class: ObjId,
        name: &str,
        kind: FeatureKind,
        many: bool,
    ) -> Result<ObjId> {
        if !matches!(self.nodes.get(&class), Some(Node::Class { .. })) {
            return Err(Error::mdb(format!("{} is not a class", class)));
        }
        if self.feature_def(class, name).is_some() {
            return Err(Error::mdb(format!("feature {} already exists", name)));
        }
        Ok(self.push_feature(class, name, kind, many))
    }

    /// Handle of the root object.
    pub fn root_id(&self) -> ObjId {
        self.root
    }

    /// Feature values of every object reachable from the root, root first.
    ///
    /// Unset features are omitted; values are sorted by feature name.
    pub fn snapshot(&self) -> Vec<(ObjId, Vec<(String, Value)>)> {
        let mut ids = vec![self.root];
        ids.extend(self.descendants(self.root));
        ids.into_iter()
            .filter_map(|id| match self.nodes.get(&id) {
                Some(Node::Object(o)) => {
                    let mut values: Vec<(String, Value)> = o
                        .values
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    values.sort_by(|a, b| a.0.cmp(&b.0));
                    Some((id, values))
                }
                _ => None,
            })
            .collect()
    }

    /// Number of model objects, root included.
    pub fn object_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| matches!(n, Node::Object(_)))
            .count()
    }

    // ==================== Lookup helpers ====================

    fn package_named(&self, name: &str) -> Option<ObjId> {
        self.metamodels.iter().copied().find(|p| {
            matches!(self.nodes.get(p), Some(Node::Package { name: n, .. }) if n == name)
        })
    }

    fn class_name(&self, class: ObjId) -> Option<&str> {
        match self.nodes.get(&class) {
            Some(Node::Class { name, .. }) => Some(name),
            _ => None,
        }
    }

    fn node(&self, id: ObjId) -> Result<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| Error::mdb(format!("unknown element {}", id)))
    }

    fn object(&self, id: ObjId) -> Result<&ObjectNode> {
        match self.node(id)? {
            Node::Object(o) => Ok(o),
            _ => Err(Error::mdb(format!("{} is a read-only metamodel element", id))),
        }
    }

    fn object_mut(&mut self, id: ObjId) -> Result<&mut ObjectNode> {
        match self.nodes.get_mut(&id) {
            Some(Node::Object(o)) => Ok(o),
            Some(_) => Err(Error::mdb(format!("{} is a read-only metamodel element", id))),
            None => Err(Error::mdb(format!("unknown element {}", id))),
        }
    }

    fn expect_class(&self, id: ObjId) -> Result<()> {
        match self.node(id)? {
            Node::Class { .. } => Ok(()),
            _ => Err(Error::mdb(format!("{} is not a class", id))),
        }
    }

    /// The class and all its transitive supertypes, breadth first.
    fn lineage(&self, class: ObjId) -> Vec<ObjId> {
        let mut out = vec![class];
        let mut i = 0;
        while i < out.len() {
            if let Some(Node::Class { supertypes, .. }) = self.nodes.get(&out[i]) {
                for sup in supertypes {
                    if !out.contains(sup) {
                        out.push(*sup);
                    }
                }
            }
            i += 1;
        }
        out
    }

    /// Feature handles of a class, inherited first.
    fn all_features(&self, class: ObjId) -> Vec<ObjId> {
        let mut out = Vec::new();
        for c in self.lineage(class).into_iter().rev() {
            if let Some(Node::Class { features, .. }) = self.nodes.get(&c) {
                out.extend(features.iter().copied());
            }
        }
        out
    }

    fn feature_def(&self, class: ObjId, name: &str) -> Option<FeatureDef> {
        self.lineage(class).into_iter().find_map(|c| {
            let features = match self.nodes.get(&c) {
                Some(Node::Class { features, .. }) => features,
                _ => return None,
            };
            features.iter().find_map(|f| match self.nodes.get(f) {
                Some(Node::Feature {
                    name: n, kind, many, ..
                }) if n == name => Some(FeatureDef {
                    id: *f,
                    kind: *kind,
                    many: *many,
                }),
                _ => None,
            })
        })
    }

    fn resolve(&self, obj: ObjId, feature: &str) -> Result<FeatureDef> {
        let class = self.object(obj)?.class;
        self.feature_def(class, feature).ok_or_else(|| {
            Error::mdb(format!(
                "class {} has no feature {}",
                self.class_name(class).unwrap_or("?"),
                feature
            ))
        })
    }

    fn read(&self, obj: &ObjectNode, feature: &str, def: FeatureDef) -> Value {
        match obj.values.get(feature) {
            Some(v) => v.clone(),
            None if def.many => Value::List(Vec::new()),
            None => Value::Null,
        }
    }

    fn get_meta(&self, node: &Node, feature: &str) -> Option<Value> {
        match (node, feature) {
            (Node::Package { name, .. }, "name")
            | (Node::Class { name, .. }, "name")
            | (Node::Feature { name, .. }, "name") => Some(Value::from(name.as_str())),
            (Node::Package { classes, .. }, "classes") => Some(handles(classes)),
            (Node::Class { package, .. }, "package") => Some(Value::Obj(*package)),
            (Node::Class { supertypes, .. }, "supertypes") => Some(handles(supertypes)),
            (Node::Class { features, .. }, "features") => Some(handles(features)),
            (Node::Feature { kind, .. }, "kind") => Some(Value::from(kind.name())),
            (Node::Feature { many, .. }, "many") => Some(Value::Bool(*many)),
            (Node::Feature { owner, .. }, "owner") => Some(Value::Obj(*owner)),
            _ => None,
        }
    }

    fn validate_element(&self, def: FeatureDef, feature: &str, v: &Value) -> Result<()> {
        if v.contains_query() {
            return Err(Error::mdb(format!(
                "unresolved query written to feature {}",
                feature
            )));
        }
        match def.kind {
            FeatureKind::Attribute => match v {
                Value::Obj(_) => Err(Error::mdb(format!(
                    "attribute {} cannot hold an object",
                    feature
                ))),
                _ => Ok(()),
            },
            FeatureKind::Reference => match v {
                Value::Null if !def.many => Ok(()),
                Value::Obj(id) if self.nodes.contains_key(id) => Ok(()),
                _ => Err(Error::mdb(format!(
                    "reference {} expects an object, got {}",
                    feature,
                    v.type_name()
                ))),
            },
            FeatureKind::Containment => match v {
                Value::Null if !def.many => Ok(()),
                Value::Obj(id) => self.object(*id).map(|_| ()),
                _ => Err(Error::mdb(format!(
                    "containment {} expects an object, got {}",
                    feature,
                    v.type_name()
                ))),
            },
        }
    }

    /// Reject containing `child` below `parent` if that would form a cycle.
    fn check_containable(&self, parent: ObjId, child: ObjId) -> Result<()> {
        let mut current = Some(parent);
        while let Some(id) = current {
            if id == child {
                return Err(Error::mdb(format!(
                    "{} cannot be contained in its own descendant {}",
                    child, parent
                )));
            }
            current = self.object(id)?.slot.as_ref().map(|s| s.parent);
        }
        Ok(())
    }

    /// Remove `child` from its container. Returns the former slot.
    fn detach(&mut self, child: ObjId) -> Result<Option<(ObjId, String, Option<usize>)>> {
        let slot = match self.object_mut(child)?.slot.take() {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let parent = self.object_mut(slot.parent)?;
        let index = match parent.values.get_mut(&slot.feature) {
            Some(Value::List(items)) => {
                let pos = items.iter().position(|v| *v == Value::Obj(child));
                if let Some(pos) = pos {
                    items.remove(pos);
                }
                pos
            }
            Some(v) => {
                *v = Value::Null;
                None
            }
            None => None,
        };
        Ok(Some((slot.parent, slot.feature, index)))
    }

    fn attach(&mut self, child: ObjId, parent: ObjId, feature: &str) -> Result<()> {
        self.object_mut(child)?.slot = Some(Slot {
            parent,
            feature: feature.to_string(),
        });
        Ok(())
    }

    fn clear_slot(&mut self, child: ObjId) {
        if let Some(Node::Object(o)) = self.nodes.get_mut(&child) {
            o.slot = None;
        }
    }

    fn prior_from_slot(old_value: Value, slot: Option<(ObjId, String, Option<usize>)>) -> Prior {
        match slot {
            Some((owner, feature, index)) => Prior {
                old_value,
                old_owner: Value::Obj(owner),
                old_feature: Value::Str(feature),
                old_index: index,
            },
            None => Prior {
                old_value,
                ..Prior::default()
            },
        }
    }

    /// Directly contained objects in feature order.
    fn contents(&self, obj: ObjId) -> Vec<ObjId> {
        let node = match self.nodes.get(&obj) {
            Some(Node::Object(o)) => o,
            _ => return Vec::new(),
        };
        let mut out = Vec::new();
        for f in self.all_features(node.class) {
            if let Some(Node::Feature {
                name,
                kind: FeatureKind::Containment,
                ..
            }) = self.nodes.get(&f)
            {
                if let Some(v) = node.values.get(name) {
                    out.extend(obj_ids(v));
                }
            }
        }
        out
    }

    /// All transitively contained objects, depth first, `obj` excluded.
    fn descendants(&self, obj: ObjId) -> Vec<ObjId> {
        let mut out = Vec::new();
        let mut stack: Vec<ObjId> = self.contents(obj).into_iter().rev().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.contents(id).into_iter().rev());
        }
        out
    }

    fn emit(&self, event: Event) {
        for sink in &self.sinks {
            sink(event.clone());
        }
    }

    fn apply_args(&mut self, obj: ObjId, args: &[Value]) -> Result<()> {
        for arg in args {
            match arg.as_list() {
                Some([Value::Str(feature), value]) => {
                    self.set(obj, feature, value.clone())?;
                }
                _ => {
                    return Err(Error::invalid_argument(
                        "creation arguments must be (feature,value) pairs",
                    ))
                }
            }
        }
        Ok(())
    }

    fn copy_object(
        &mut self,
        src: ObjId,
        mode: CloneMode,
        copies: &mut FxHashMap<ObjId, ObjId>,
    ) -> Result<ObjId> {
        let node = self.object(src)?.clone();
        let id = self.alloc(Node::Object(ObjectNode {
            class: node.class,
            values: FxHashMap::default(),
            slot: None,
        }));
        copies.insert(src, id);
        if mode == CloneMode::Cls {
            return Ok(id);
        }
        for f in self.all_features(node.class) {
            let (name, kind) = match self.nodes.get(&f) {
                Some(Node::Feature { name, kind, .. }) => (name.clone(), *kind),
                _ => continue,
            };
            let value = match node.values.get(&name) {
                Some(v) => v.clone(),
                None => continue,
            };
            let copied = match (kind, mode) {
                (FeatureKind::Attribute, _) => value,
                (FeatureKind::Reference, CloneMode::Flt | CloneMode::Ful) => value,
                (FeatureKind::Containment, CloneMode::Dep | CloneMode::Ful) => {
                    let children = match &value {
                        Value::List(items) => items.clone(),
                        other => vec![other.clone()],
                    };
                    let mut cloned = Vec::with_capacity(children.len());
                    for child in children {
                        match child {
                            Value::Obj(c) => {
                                let copy = self.copy_object(c, mode, copies)?;
                                self.attach(copy, id, &name)?;
                                cloned.push(Value::Obj(copy));
                            }
                            other => cloned.push(other),
                        }
                    }
                    match value {
                        Value::List(_) => Value::List(cloned),
                        _ => cloned.into_iter().next().unwrap_or(Value::Null),
                    }
                }
                _ => continue,
            };
            self.object_mut(id)?.values.insert(name, copied);
        }
        Ok(id)
    }

    /// Point references of the copied tree at the copies.
    fn remap_references(&mut self, copies: &FxHashMap<ObjId, ObjId>) -> Result<()> {
        let remap = |v: &Value| match v {
            Value::Obj(id) => Value::Obj(*copies.get(id).unwrap_or(id)),
            other => other.clone(),
        };
        for copy in copies.values().copied().collect::<Vec<_>>() {
            let class = self.object(copy)?.class;
            for f in self.all_features(class) {
                let name = match self.nodes.get(&f) {
                    Some(Node::Feature {
                        name,
                        kind: FeatureKind::Reference,
                        ..
                    }) => name.clone(),
                    _ => continue,
                };
                let node = self.object_mut(copy)?;
                if let Some(v) = node.values.get_mut(&name) {
                    let remapped = match &*v {
                        Value::List(items) => Value::List(items.iter().map(&remap).collect()),
                        other => remap(other),
                    };
                    *v = remapped;
                }
            }
        }
        Ok(())
    }
}

impl MdbAccessor for InMemoryMdb {
    fn root(&self) -> Value {
        Value::Obj(self.root)
    }

    fn contains(&self, id: ObjId) -> bool {
        self.nodes.contains_key(&id)
    }

    fn get(&self, obj: ObjId, feature: &str) -> Result<Value> {
        match self.node(obj)? {
            Node::Object(o) => {
                let def = self.resolve(obj, feature)?;
                Ok(self.read(o, feature, def))
            }
            meta => self.get_meta(meta, feature).ok_or_else(|| {
                Error::mdb(format!("metamodel element {} has no feature {}", obj, feature))
            }),
        }
    }

    fn set(&mut self, obj: ObjId, feature: &str, value: Value) -> Result<Prior> {
        let def = self.resolve(obj, feature)?;
        if def.many {
            let items = value.as_list().ok_or_else(|| {
                Error::mdb(format!("many-valued feature {} must be set to a list", feature))
            })?;
            for item in items {
                self.validate_element(def, feature, item)?;
            }
        } else {
            self.validate_element(def, feature, &value)?;
        }
        let old_value = self.read(self.object(obj)?, feature, def);
        let mut prior = Prior {
            old_value: old_value.clone(),
            ..Prior::default()
        };
        if def.kind == FeatureKind::Containment {
            for child in obj_ids(&value) {
                self.check_containable(obj, child)?;
            }
            for child in obj_ids(&old_value) {
                self.clear_slot(child);
            }
            if def.many {
                for child in obj_ids(&value) {
                    self.detach(child)?;
                }
            } else if let Value::Obj(child) = value {
                let slot = self.detach(child)?;
                prior = Self::prior_from_slot(old_value, slot);
            }
        }
        self.object_mut(obj)?
            .values
            .insert(feature.to_string(), value.clone());
        if def.kind == FeatureKind::Containment {
            for child in obj_ids(&value) {
                self.attach(child, obj, feature)?;
            }
        }
        Ok(prior)
    }

    fn add(&mut self, obj: ObjId, feature: &str, value: Value) -> Result<Prior> {
        let len = match self.get(obj, feature)? {
            Value::List(items) => items.len(),
            _ => 0,
        };
        self.insert(obj, feature, len, value)
    }

    fn insert(&mut self, obj: ObjId, feature: &str, index: usize, value: Value) -> Result<Prior> {
        let def = self.resolve(obj, feature)?;
        if !def.many {
            return Err(Error::mdb(format!("feature {} is single-valued", feature)));
        }
        self.validate_element(def, feature, &value)?;
        let old_value = self.read(self.object(obj)?, feature, def);
        let mut prior = Prior {
            old_value: old_value.clone(),
            ..Prior::default()
        };
        if def.kind == FeatureKind::Containment {
            if let Value::Obj(child) = value {
                self.check_containable(obj, child)?;
                let slot = self.detach(child)?;
                prior = Self::prior_from_slot(old_value, slot);
            }
        }
        let node = self.object_mut(obj)?;
        let entry = node
            .values
            .entry(feature.to_string())
            .or_insert_with(|| Value::List(Vec::new()));
        if let Value::List(items) = entry {
            let at = index.min(items.len());
            items.insert(at, value.clone());
        }
        if def.kind == FeatureKind::Containment {
            if let Value::Obj(child) = value {
                self.attach(child, obj, feature)?;
            }
        }
        Ok(prior)
    }

    fn remove(&mut self, obj: ObjId, feature: &str, value: &Value) -> Result<Prior> {
        let def = self.resolve(obj, feature)?;
        let old_value = self.read(self.object(obj)?, feature, def);
        let index = if def.many {
            let pos = old_value
                .as_list()
                .and_then(|items| items.iter().position(|v| v == value));
            match pos {
                Some(pos) => Some(pos),
                None => {
                    return Err(Error::mdb(format!(
                        "value not found in feature {}",
                        feature
                    )))
                }
            }
        } else {
            if old_value != *value {
                return Err(Error::mdb(format!(
                    "value not found in feature {}",
                    feature
                )));
            }
            None
        };
        let node = self.object_mut(obj)?;
        match (node.values.get_mut(feature), index) {
            (Some(Value::List(items)), Some(pos)) => {
                items.remove(pos);
            }
            (Some(v), None) => *v = Value::Null,
            _ => {}
        }
        let contained = def.kind == FeatureKind::Containment;
        if contained {
            if let Value::Obj(child) = value {
                self.clear_slot(*child);
            }
        }
        Ok(Prior {
            old_value,
            old_owner: if contained { Value::Obj(obj) } else { Value::Null },
            old_feature: if contained {
                Value::from(feature)
            } else {
                Value::Null
            },
            old_index: index,
        })
    }

    fn move_to(&mut self, obj: ObjId, index: usize) -> Result<Prior> {
        let slot = self
            .object(obj)?
            .slot
            .clone()
            .ok_or_else(|| Error::mdb(format!("{} is not contained", obj)))?;
        let parent = self.object_mut(slot.parent)?;
        let items = match parent.values.get_mut(&slot.feature) {
            Some(Value::List(items)) => items,
            _ => {
                return Err(Error::mdb(format!(
                    "{} is not held by a many-valued feature",
                    obj
                )))
            }
        };
        let old = items
            .iter()
            .position(|v| *v == Value::Obj(obj))
            .ok_or_else(|| Error::internal(format!("{} missing from its container", obj)))?;
        if index >= items.len() {
            return Err(Error::mdb(format!(
                "index {} out of range for {} elements",
                index,
                items.len()
            )));
        }
        if index != old {
            let v = items.remove(old);
            items.insert(index, v);
        }
        Ok(Prior {
            old_value: Value::from(old),
            old_owner: Value::Obj(slot.parent),
            old_feature: Value::Str(slot.feature),
            old_index: Some(old),
        })
    }

    fn clone_object(&mut self, obj: ObjId, mode: CloneMode) -> Result<ObjId> {
        let mut copies = FxHashMap::default();
        let id = self.copy_object(obj, mode, &mut copies)?;
        if mode == CloneMode::Ful {
            self.remap_references(&copies)?;
        }
        Ok(id)
    }

    fn create(&mut self, class: ObjId, n: usize, args: &[Value]) -> Result<Vec<ObjId>> {
        self.expect_class(class)?;
        if [self.meta.package, self.meta.class, self.meta.feature].contains(&class) {
            return Err(Error::mdb(format!(
                "cannot instantiate metaclass {}",
                self.class_name(class).unwrap_or("?")
            )));
        }
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let id = self.alloc(Node::Object(ObjectNode {
                class,
                values: FxHashMap::default(),
                slot: None,
            }));
            self.apply_args(id, args)?;
            out.push(id);
        }
        Ok(out)
    }

    fn parent(&self, obj: ObjId) -> Result<Option<ObjId>> {
        Ok(match self.node(obj)? {
            Node::Object(o) => o.slot.as_ref().map(|s| s.parent),
            Node::Class { package, .. } => Some(*package),
            Node::Feature { owner, .. } => Some(*owner),
            Node::Package { .. } => None,
        })
    }

    fn index(&self, obj: ObjId) -> Result<Option<usize>> {
        let slot = match self.node(obj)? {
            Node::Object(ObjectNode { slot: Some(s), .. }) => s,
            _ => return Ok(None),
        };
        Ok(match self.object(slot.parent)?.values.get(&slot.feature) {
            Some(Value::List(items)) => items.iter().position(|v| *v == Value::Obj(obj)),
            _ => None,
        })
    }

    fn containing_feature(&self, obj: ObjId) -> Result<Option<ObjId>> {
        let slot = match self.node(obj)? {
            Node::Object(ObjectNode { slot: Some(s), .. }) => s,
            _ => return Ok(None),
        };
        Ok(Some(self.resolve(slot.parent, &slot.feature)?.id))
    }

    fn associates(&self, obj: ObjId, root: Option<ObjId>) -> Result<Vec<ObjId>> {
        let root = root.unwrap_or(self.root);
        self.object(root)?;
        let mut scope = vec![root];
        scope.extend(self.descendants(root));
        let mut out = Vec::new();
        for candidate in scope {
            let node = self.object(candidate)?;
            let refers = self.all_features(node.class).into_iter().any(|f| {
                match self.nodes.get(&f) {
                    Some(Node::Feature {
                        name,
                        kind: FeatureKind::Reference,
                        ..
                    }) => node
                        .values
                        .get(name)
                        .map(|v| obj_ids(v).contains(&obj))
                        .unwrap_or(false),
                    _ => false,
                }
            });
            if refers {
                out.push(candidate);
            }
        }
        Ok(out)
    }

    fn children_of_class(
        &self,
        obj: ObjId,
        class: &str,
        include_subclasses: bool,
    ) -> Result<Vec<ObjId>> {
        self.object(obj)?;
        let mut out = Vec::new();
        for id in self.descendants(obj) {
            let own = self.object(id)?.class;
            let matches = if include_subclasses {
                self.lineage(own)
                    .into_iter()
                    .any(|c| self.class_name(c) == Some(class))
            } else {
                self.class_name(own) == Some(class)
            };
            if matches {
                out.push(id);
            }
        }
        Ok(out)
    }

    fn class_of(&self, obj: ObjId) -> Result<ObjId> {
        Ok(match self.node(obj)? {
            Node::Object(o) => o.class,
            Node::Package { .. } => self.meta.package,
            Node::Class { .. } => self.meta.class,
            Node::Feature { .. } => self.meta.feature,
        })
    }

    fn class_by_name(&self, package: &str, class: &str) -> Result<ObjId> {
        let pkg = self
            .package_named(package)
            .ok_or_else(|| Error::mdb(format!("unknown package {}", package)))?;
        let classes = match self.nodes.get(&pkg) {
            Some(Node::Package { classes, .. }) => classes,
            _ => return Err(Error::internal(format!("{} is not a package", pkg))),
        };
        classes
            .iter()
            .copied()
            .find(|c| self.class_name(*c) == Some(class))
            .ok_or_else(|| Error::mdb(format!("unknown class {}.{}", package, class)))
    }

    fn find_class(&self, name: &str) -> Result<ObjId> {
        for pkg in &self.metamodels {
            if let Some(Node::Package { classes, .. }) = self.nodes.get(pkg) {
                if let Some(c) = classes.iter().find(|c| self.class_name(**c) == Some(name)) {
                    return Ok(*c);
                }
            }
        }
        Err(Error::mdb(format!("unknown class {}", name)))
    }

    fn package_of(&self, class: ObjId) -> Result<ObjId> {
        match self.node(class)? {
            Node::Class { package, .. } => Ok(*package),
            _ => Err(Error::mdb(format!("{} is not a class", class))),
        }
    }

    fn supertypes(&self, class: ObjId, transitive: bool) -> Result<Vec<ObjId>> {
        match self.node(class)? {
            Node::Class { supertypes, .. } if !transitive => Ok(supertypes.clone()),
            Node::Class { .. } => Ok(self.lineage(class).into_iter().skip(1).collect()),
            _ => Err(Error::mdb(format!("{} is not a class", class))),
        }
    }

    fn implementers(&self, class: ObjId, transitive: bool) -> Result<Vec<ObjId>> {
        self.expect_class(class)?;
        let mut classes: Vec<ObjId> = self
            .nodes
            .iter()
            .filter(|(_, n)| matches!(n, Node::Class { .. }))
            .map(|(id, _)| *id)
            .filter(|id| *id != class)
            .collect();
        classes.sort();
        Ok(classes
            .into_iter()
            .filter(|c| {
                if transitive {
                    self.lineage(*c).contains(&class)
                } else {
                    matches!(self.nodes.get(c), Some(Node::Class { supertypes, .. }) if supertypes.contains(&class))
                }
            })
            .collect())
    }

    fn features(&self, obj: ObjId, filter: FeatureFilter) -> Result<Vec<ObjId>> {
        let class = self.class_of(obj)?;
        Ok(self
            .all_features(class)
            .into_iter()
            .filter(|f| match (self.nodes.get(f), filter) {
                (_, FeatureFilter::All) => true,
                (Some(Node::Feature { kind, .. }), FeatureFilter::Attributes) => {
                    *kind == FeatureKind::Attribute
                }
                (Some(Node::Feature { kind, .. }), FeatureFilter::References) => {
                    *kind == FeatureKind::Reference
                }
                (Some(Node::Feature { kind, .. }), FeatureFilter::Containments) => {
                    *kind == FeatureKind::Containment
                }
                _ => false,
            })
            .collect())
    }

    fn name_of(&self, element: ObjId) -> Result<String> {
        match self.node(element)? {
            Node::Package { name, .. } | Node::Class { name, .. } | Node::Feature { name, .. } => {
                Ok(name.clone())
            }
            Node::Object(_) => Err(Error::mdb(format!(
                "{} is not a metamodel element",
                element
            ))),
        }
    }

    fn metamodels(&self) -> Vec<ObjId> {
        self.metamodels.clone()
    }

    fn register_metamodel(&mut self, package: ObjId) -> Result<Value> {
        let name = match self.node(package)? {
            Node::Package { name, .. } => name.clone(),
            _ => return Err(Error::mdb(format!("{} is not a package", package))),
        };
        if self.metamodels.contains(&package) {
            return Ok(Value::Bool(false));
        }
        if self.package_named(&name).is_some() {
            return Err(Error::mdb(format!(
                "a metamodel named {} is already registered",
                name
            )));
        }
        self.metamodels.push(package);
        self.emit(Event::new(
            EventType::Msg,
            WILDCARD,
            Value::from(format!("metamodel {} registered", name)),
        ));
        Ok(Value::Bool(true))
    }

    fn unregister_metamodel(&mut self, package: ObjId) -> Result<Value> {
        let name = match self.node(package)? {
            Node::Package { name, .. } => name.clone(),
            _ => return Err(Error::mdb(format!("{} is not a package", package))),
        };
        if package == self.builtin {
            return Err(Error::mdb("the built-in metamodel cannot be unregistered"));
        }
        let before = self.metamodels.len();
        self.metamodels.retain(|p| *p != package);
        let removed = self.metamodels.len() != before;
        if removed {
            self.emit(Event::new(
                EventType::Msg,
                WILDCARD,
                Value::from(format!("metamodel {} unregistered", name)),
            ));
        }
        Ok(Value::Bool(removed))
    }

    fn observe(&mut self, sink: EventSink) {
        self.sinks.push(sink);
    }
}
