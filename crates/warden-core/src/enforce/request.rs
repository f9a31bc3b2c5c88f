use crate::{
    filter::Filter,
    value::{Row, Value},
};
use std::collections::BTreeMap;

///
/// Query
/// Read selection: a caller filter plus the relations to include.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub include: Vec<Include>,
}

impl Query {
    #[must_use]
    pub const fn all() -> Self {
        Self {
            filter: Filter::True,
            include: Vec::new(),
        }
    }

    #[must_use]
    pub const fn filter(filter: Filter) -> Self {
        Self {
            filter,
            include: Vec::new(),
        }
    }

    #[must_use]
    pub fn include(mut self, include: Include) -> Self {
        self.include.push(include);
        self
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::all()
    }
}

///
/// Include
///
/// Related rows returned under the relation's name: a list for to-many
/// relations, a record (or null) for to-one. Only readable related rows
/// are included, each redacted by its own field guards.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Include {
    pub relation: String,
    pub filter: Filter,
    pub include: Vec<Self>,
}

impl Include {
    #[must_use]
    pub fn relation(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            filter: Filter::True,
            include: Vec::new(),
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn include(mut self, include: Self) -> Self {
        self.include.push(include);
        self
    }
}

///
/// WriteData
/// Scalar field values plus nested writes keyed by relation name.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteData {
    pub fields: Row,
    pub relations: BTreeMap<String, Vec<NestedWrite>>,
}

impl WriteData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    #[must_use]
    pub fn nested(mut self, relation: impl Into<String>, write: NestedWrite) -> Self {
        self.relations.entry(relation.into()).or_default().push(write);
        self
    }
}

impl From<Row> for WriteData {
    fn from(fields: Row) -> Self {
        Self {
            fields,
            relations: BTreeMap::new(),
        }
    }
}

///
/// NestedWrite
///
/// One write on a related row, performed in the same transaction and
/// checked against the related entity's own guards. Selectors name the
/// related row by primary key.
///

#[derive(Clone, Debug, PartialEq)]
pub enum NestedWrite {
    Create(WriteData),
    Connect(Row),
    Update { selector: Row, data: WriteData },
    Delete(Row),
    Disconnect(Row),
}

impl NestedWrite {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Connect(_) => "connect",
            Self::Update { .. } => "update",
            Self::Delete(_) => "delete",
            Self::Disconnect(_) => "disconnect",
        }
    }
}
