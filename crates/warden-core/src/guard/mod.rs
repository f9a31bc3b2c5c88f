//! Guard compilation, caching, in-memory evaluation and filter lowering.

mod cache;
mod check;
mod compile;
mod eval;
mod lower;


// re-exports
pub use cache::GuardCache;
pub use check::check_schema;
pub use compile::{CompiledGuard, FieldGuard, compile_guard};
pub use eval::{EvalEnv, Evaluator, Scope, VisitStack, compare_op};
pub use lower::Lowering;
