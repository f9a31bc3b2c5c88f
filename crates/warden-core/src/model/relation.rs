use serde::{Deserialize, Serialize};

///
/// Cardinality
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

///
/// ReferentialAction
/// What happens to referencing rows when the referenced row is deleted.
///

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    Restrict,
    #[default]
    NoAction,
}

///
/// JoinColumn
/// One (local column, remote column) pair of a relation join.
///

#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct JoinColumn {
    pub local: String,
    pub remote: String,
}

///
/// RelationModel
///
/// `owner` relations hold the foreign key (`local` columns reference the
/// target's `remote` columns) and carry the referential action. Inverse
/// relations join the other way round.
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RelationModel {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub join: Vec<JoinColumn>,

    #[serde(default)]
    pub owner: bool,

    #[serde(default)]
    pub on_delete: ReferentialAction,

    /// Engine-generated delegate link (`delegate_aux_*`).
    #[serde(default)]
    pub aux: bool,

    /// Entity whose table holds the local join columns. Filled in by `Schema::build`.
    #[serde(skip)]
    pub holder: String,
}

impl RelationModel {
    /// To-one relation owning the foreign key `fk` that references `target.key`.
    #[must_use]
    pub fn belongs_to(name: &str, target: &str, fk: &str, key: &str) -> Self {
        Self::new(name, target, Cardinality::One, fk, key, true)
    }

    /// To-many inverse: rows of `target` whose `fk` equals this row's `key`.
    #[must_use]
    pub fn has_many(name: &str, target: &str, fk: &str, key: &str) -> Self {
        Self::new(name, target, Cardinality::Many, key, fk, false)
    }

    /// To-one inverse: the single row of `target` whose `fk` equals this row's `key`.
    #[must_use]
    pub fn has_one(name: &str, target: &str, fk: &str, key: &str) -> Self {
        Self::new(name, target, Cardinality::One, key, fk, false)
    }

    fn new(name: &str, target: &str, cardinality: Cardinality, local: &str, remote: &str, owner: bool) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            cardinality,
            join: vec![JoinColumn {
                local: local.to_string(),
                remote: remote.to_string(),
            }],
            owner,
            on_delete: ReferentialAction::NoAction,
            aux: false,
            holder: String::new(),
        }
    }

    #[must_use]
    pub const fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Add another join pair (composite keys).
    #[must_use]
    pub fn and_join(mut self, local: &str, remote: &str) -> Self {
        self.join.push(JoinColumn {
            local: local.to_string(),
            remote: remote.to_string(),
        });
        self
    }

    #[must_use]
    pub const fn is_to_many(&self) -> bool {
        matches!(self.cardinality, Cardinality::Many)
    }

    pub fn local_columns(&self) -> impl Iterator<Item = &str> {
        self.join.iter().map(|j| j.local.as_str())
    }

    pub fn remote_columns(&self) -> impl Iterator<Item = &str> {
        self.join.iter().map(|j| j.remote.as_str())
    }
}
