//! Policy rules and the per-entity effective rule repository.

mod operation;
mod repository;
mod rule;

#[cfg(test)]
mod tests;

// re-exports
pub use operation::{Operation, OperationSet};
pub use repository::PolicyRepository;
pub use rule::{Effect, PolicyRule, ValidationRule};
