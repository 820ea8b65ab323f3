//! Change records
//!
//! A [`Change`] is the immutable record of one element-wise mutation. It
//! carries exactly what is needed to reverse it: the previous value and, for
//! containment features, where the value lived before (`old_owner`,
//! `old_feature`, `old_index`).

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Kind of a recorded mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Feature value replaced
    Set,
    /// Value appended to a many-valued feature
    Add,
    /// Value removed from a many-valued feature
    Rem,
    /// Element moved within its containing list
    Mov,
}

impl ChangeKind {
    /// Three-letter wire name.
    pub fn name(self) -> &'static str {
        match self {
            ChangeKind::Set => "SET",
            ChangeKind::Add => "ADD",
            ChangeKind::Rem => "REM",
            ChangeKind::Mov => "MOV",
        }
    }
}

/// Previous state returned by every element-wise accessor mutation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Prior {
    /// Value before the mutation (for MOV: the previous index)
    pub old_value: Value,
    /// Former container of the value, if it was contained elsewhere
    pub old_owner: Value,
    /// Containment feature on the former container
    pub old_feature: Value,
    /// Position within the former container
    pub old_index: Option<usize>,
}

/// One recorded mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Change id; provisional until the transaction commits
    pub id: u64,
    /// Mutation kind
    pub kind: ChangeKind,
    /// Mutated object
    pub target: Value,
    /// Mutated feature (for MOV: the containing feature)
    pub feature: Value,
    /// Value written (for MOV: the new index)
    pub new_value: Value,
    /// Value before the mutation
    pub old_value: Value,
    /// Former container of `new_value`
    pub old_owner: Value,
    /// Former containment feature of `new_value`
    pub old_feature: Value,
    /// Former position of `new_value`
    pub old_index: Option<usize>,
    /// Transaction that recorded the change
    pub transaction_id: u64,
}

impl Change {
    /// Build a change from an accessor's prior-state tuple.
    pub fn new(
        kind: ChangeKind,
        target: Value,
        feature: Value,
        new_value: Value,
        prior: Prior,
        transaction_id: u64,
    ) -> Self {
        Self {
            id: 0,
            kind,
            target,
            feature,
            new_value,
            old_value: prior.old_value,
            old_owner: prior.old_owner,
            old_feature: prior.old_feature,
            old_index: prior.old_index,
            transaction_id,
        }
    }

    /// Ten-element list form returned by CHG:
    /// `[id, kind, target, feature, new, old, oldOwner, oldFeature, oldIndex, tid]`.
    pub fn to_value(&self) -> Value {
        Value::List(vec![
            Value::Int(self.id as i64),
            Value::from(self.kind.name()),
            self.target.clone(),
            self.feature.clone(),
            self.new_value.clone(),
            self.old_value.clone(),
            self.old_owner.clone(),
            self.old_feature.clone(),
            self.old_index.map(Value::from).unwrap_or(Value::Null),
            Value::Int(self.transaction_id as i64),
        ])
    }
}
