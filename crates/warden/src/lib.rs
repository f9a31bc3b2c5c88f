//! ## Crate layout
//! - `core`: schema model, policy expressions, guard compilation, relation
//!   resolution, satisfiability checking, validation and the enforcement
//!   proxy over a transactional store.
//!
//! Downstream users depend on **warden** only. The `prelude` module carries
//! the vocabulary for declaring a schema and running policy-checked
//! operations against a store.

pub use warden_core as core;

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//
// Errors
//

pub use core::{
    Error,
    error::{
        DenyReason, ErrorClass, PolicyCompilationError, PolicyDeniedError, StoreError,
        StructuralError, ValidationError,
    },
};

///
/// Prelude
/// Schema vocabulary plus the database and session types.
///

pub mod prelude {
    pub use crate::core::{
        config::{EnforcerConfig, Redaction},
        enforce::{PolicyDb, PolicySession},
        prelude::*,
        store::{Store, memory::MemoryStore},
    };
    pub use serde::{Deserialize, Serialize};
}
