//! Entity, field and relation models plus the resolved schema registry.

mod entity;
mod field;
mod relation;
mod schema;

#[cfg(test)]
mod tests;

// re-exports
pub use entity::EntityModel;
pub use field::{DefaultValue, FieldKind, FieldModel};
pub use relation::{Cardinality, JoinColumn, ReferentialAction, RelationModel};
pub use schema::{AUX_RELATION_PREFIX, Schema, SchemaBuilder, SchemaVersion};

pub(crate) use schema::{require_field, require_relation};
