//! Core runtime for Warden: schema model, policy expressions, guard
//! compilation, relation resolution, satisfiability checking, validation and
//! the enforcement proxy in front of a transactional store.
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod config;
pub mod enforce;
pub mod error;
pub mod expr;
pub mod filter;
pub mod guard;
pub mod model;
pub mod obs;
pub mod policy;
pub mod resolve;
pub mod sat;
pub mod store;
pub mod validate;
pub mod value;

// test
#[cfg(test)]
pub(crate) mod test_fixtures;

// re-exports
pub use error::Error;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No stores, executors or helpers are re-exported here.
///

pub mod prelude {
    pub use crate::{
        enforce::{Include, NestedWrite, Query, WriteData},
        expr::{self, Expr, Function},
        filter::Filter,
        model::{EntityModel, FieldKind, FieldModel, ReferentialAction, RelationModel, Schema},
        policy::{Operation, OperationSet, PolicyRule, ValidationRule},
        value::{Row, Value},
    };
}
