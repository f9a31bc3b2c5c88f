use crate::value::Value;
use serde::{Deserialize, Serialize};

///
/// FieldKind
/// Declared domain of a scalar field.
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    Text,
    Enum { variants: Vec<String> },
    List { item: Box<Self> },
    Json,
}

impl FieldKind {
    #[must_use]
    pub fn enumeration<S: Into<String>>(variants: impl IntoIterator<Item = S>) -> Self {
        Self::Enum {
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn list(item: Self) -> Self {
        Self::List {
            item: Box::new(item),
        }
    }

    /// True if `value` belongs to this domain (Null is checked by the caller).
    #[must_use]
    pub fn admits(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Bool, Value::Bool(_))
            | (Self::Int, Value::Int(_))
            | (Self::Float, Value::Float(_) | Value::Int(_))
            | (Self::Text, Value::Text(_))
            | (Self::Json, _) => true,
            (Self::Enum { variants }, Value::Text(s)) => variants.iter().any(|v| v == s),
            (Self::List { item }, Value::List(items)) => items.iter().all(|v| item.admits(v)),
            _ => false,
        }
    }
}

///
/// DefaultValue
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DefaultValue {
    Value { value: Value },
    AutoIncrement,
    Ulid,
    /// Member path of the acting principal (`@default(auth().id)`).
    Auth { path: Vec<String> },
}

///
/// FieldModel
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldModel {
    pub name: String,
    pub kind: FieldKind,

    #[serde(default)]
    pub optional: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,

    /// Entity whose table stores this field. Filled in by `Schema::build`.
    #[serde(skip)]
    pub owner: String,
}

impl FieldModel {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            default: None,
            owner: String::new(),
        }
    }

    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Value {
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.default = Some(DefaultValue::AutoIncrement);
        self
    }

    #[must_use]
    pub fn ulid(mut self) -> Self {
        self.default = Some(DefaultValue::Ulid);
        self
    }

    #[must_use]
    pub fn default_auth(mut self, path: &str) -> Self {
        self.default = Some(DefaultValue::Auth {
            path: path.split('.').map(str::to_string).collect(),
        });
        self
    }

    /// Literal default, if any.
    #[must_use]
    pub const fn literal_default(&self) -> Option<&Value> {
        match &self.default {
            Some(DefaultValue::Value { value }) => Some(value),
            _ => None,
        }
    }
}
