use crate::policy::Operation;
use std::{collections::BTreeMap, fmt};
use thiserror::Error as ThisError;

///
/// Error
///
/// Top-level error for every engine entry point.
/// Each variant wraps the error type owned by the failing concern.
///

#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] PolicyCompilationError),

    #[error(transparent)]
    Denied(#[from] PolicyDeniedError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Compile(_) => ErrorClass::Compile,
            Self::Denied(_) => ErrorClass::Denied,
            Self::Validation(_) => ErrorClass::Validation,
            Self::Structural(_) => ErrorClass::Structural,
            Self::Store(_) => ErrorClass::Store,
            Self::Internal(_) => ErrorClass::Internal,
        }
    }

    #[must_use]
    pub const fn is_denied(&self) -> bool {
        matches!(self, Self::Denied(_))
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

///
/// ErrorClass
/// Stable classification; callers branch on this rather than on messages.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorClass {
    Compile,
    Denied,
    Validation,
    Structural,
    Store,
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Compile => "compile",
            Self::Denied => "denied",
            Self::Validation => "validation",
            Self::Structural => "structural",
            Self::Store => "store",
            Self::Internal => "internal",
        };
        write!(f, "{label}")
    }
}

///
/// PolicyCompilationError
///
/// Raised while loading a schema. Fatal: an engine is never built over
/// a schema that produced one of these.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum PolicyCompilationError {
    #[error("unknown entity '{entity}'")]
    UnknownEntity { entity: String },

    #[error("entity '{entity}' is declared more than once")]
    DuplicateEntity { entity: String },

    #[error("entity '{entity}' declares field or relation '{field}' more than once")]
    DuplicateField { entity: String, field: String },

    #[error("entity '{entity}' has no field '{field}'")]
    UnknownField { entity: String, field: String },

    #[error("entity '{entity}' has no relation '{relation}'")]
    UnknownRelation { entity: String, relation: String },

    #[error("entity '{entity}': relation '{relation}' is to-many and cannot be used here")]
    ToManyInPath { entity: String, relation: String },

    #[error("entity '{entity}': relation '{relation}' join column '{column}' does not resolve")]
    InvalidJoin {
        entity: String,
        relation: String,
        column: String,
    },

    #[error("entity '{entity}' has no primary key")]
    MissingPrimaryKey { entity: String },

    #[error("entity '{entity}' extends unknown base '{base}'")]
    UnknownBase { entity: String, base: String },

    #[error("entity '{entity}' takes part in an inheritance cycle")]
    InheritanceCycle { entity: String },

    #[error("entity '{entity}' extends '{base}', which is neither abstract nor a delegate base")]
    InvalidBase { entity: String, base: String },

    #[error("entity '{entity}': discriminator '{field}' must be a text or enum field")]
    InvalidDiscriminator { entity: String, field: String },

    #[error("entity '{entity}': future() is only valid in update or delete rules (found in {operation})")]
    ProspectiveOutsideUpdate { entity: String, operation: String },

    #[error("entity '{entity}': future() must reference a single scalar field, found '{path}'")]
    InvalidProspectivePath { entity: String, path: String },

    #[error("entity '{entity}': function '{function}' is not allowed in {context}")]
    FunctionNotAllowed {
        entity: String,
        function: String,
        context: &'static str,
    },

    #[error("function '{function}' expects {expected} argument(s), found {found}")]
    InvalidArity {
        function: String,
        expected: String,
        found: usize,
    },

    #[error("function '{function}': {message}")]
    InvalidArgument { function: String, message: String },

    #[error("entity '{entity}': field rule on '{field}' names operation {operation}; only read and update are allowed")]
    InvalidFieldRule {
        entity: String,
        field: String,
        operation: Operation,
    },

    #[error("entity '{entity}': validation rules cannot reference {what}")]
    InvalidValidationRule { entity: String, what: &'static str },

    #[error("relation predicates form a cycle with no base case: {}", cycle.join(" -> "))]
    RelationCycle { cycle: Vec<String> },

    #[error("schema json: {0}")]
    SchemaJson(String),
}

///
/// PolicyDeniedError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
#[error("{operation} on '{entity}' denied: {reason}")]
pub struct PolicyDeniedError {
    pub entity: String,
    pub operation: Operation,
    pub reason: DenyReason,
}

impl PolicyDeniedError {
    pub(crate) fn new(entity: impl Into<String>, operation: Operation, reason: DenyReason) -> Self {
        Self {
            entity: entity.into(),
            operation,
            reason,
        }
    }
}

///
/// DenyReason
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DenyReason {
    /// The row-level guard rejected the pre-image or the created row.
    Row,

    /// The update post-check rejected the prospective row.
    PostCheck,

    /// A field-level guard rejected a written field.
    Field(String),

    /// Visibility expansion went deeper than the configured limit.
    DepthExceeded(usize),

    /// A nested connect target does not exist or is not visible.
    ConnectTarget(String),
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Row => f.write_str("row policy not satisfied"),
            Self::PostCheck => f.write_str("post-update policy not satisfied"),
            Self::Field(field) => write!(f, "field '{field}' policy not satisfied"),
            Self::DepthExceeded(depth) => write!(f, "relation depth exceeds {depth}"),
            Self::ConnectTarget(relation) => {
                write!(f, "connect target for '{relation}' not found")
            }
        }
    }
}

///
/// ValidationError
/// Aggregated validation issues keyed by field path ("" for model rules).
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
#[error("validation failed for '{entity}': {}", format_issues(issues))]
pub struct ValidationError {
    pub entity: String,
    pub issues: BTreeMap<String, Vec<String>>,
}

impl ValidationError {
    #[must_use]
    pub fn issue_count(&self) -> usize {
        self.issues.values().map(Vec::len).sum()
    }
}

fn format_issues(issues: &BTreeMap<String, Vec<String>>) -> String {
    issues
        .iter()
        .flat_map(|(path, messages)| {
            messages.iter().map(move |message| {
                if path.is_empty() {
                    message.clone()
                } else {
                    format!("{path}: {message}")
                }
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}

///
/// StructuralError
/// The request itself is malformed for the loaded schema.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum StructuralError {
    #[error("unknown entity '{entity}'")]
    UnknownEntity { entity: String },

    #[error("entity '{entity}' has no writable field or relation '{field}'")]
    UnknownField { entity: String, field: String },

    #[error("entity '{entity}': relation '{relation}' is an internal delegate relation and cannot be written")]
    AuxRelationWrite { entity: String, relation: String },

    #[error("entity '{entity}' is a delegate base and cannot be created directly")]
    DelegateBaseCreate { entity: String },

    #[error("entity '{entity}' is abstract and has no storage")]
    AbstractEntity { entity: String },

    #[error("entity '{entity}': discriminator '{field}' is managed by the engine")]
    DiscriminatorWrite { entity: String, field: String },

    #[error("entity '{entity}': primary key field '{field}' cannot be updated")]
    PrimaryKeyWrite { entity: String, field: String },

    #[error("entity '{entity}': required field '{field}' is missing")]
    MissingField { entity: String, field: String },

    #[error("entity '{entity}': selector must name every primary key field")]
    MissingPrimaryKey { entity: String },

    #[error("entity '{entity}': nested write on '{relation}': {message}")]
    InvalidNestedWrite {
        entity: String,
        relation: String,
        message: String,
    },

    #[error("filters may not contain permission checks")]
    PermissionInFilter,
}

///
/// StoreError
/// Execution-layer failure. Passed through unchanged, never retried.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum StoreError {
    #[error("row not found in '{table}' for key {key}")]
    NotFound { table: String, key: String },

    #[error("duplicate key {key} in '{table}'")]
    DuplicateKey { table: String, key: String },

    #[error("write conflict on '{table}' key {key}")]
    Conflict { table: String, key: String },

    #[error("delete restricted: '{table}' rows still reference it through '{relation}'")]
    Restricted { table: String, relation: String },

    #[error("store backend: {0}")]
    Backend(String),
}
