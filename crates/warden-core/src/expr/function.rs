use crate::value::{ListOp, TextOp, Value, eval_list, eval_text};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{ops::RangeInclusive, str::FromStr, sync::LazyLock};

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

static URL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://[^\s/?#]+[^\s]*$").ok());

static DATETIME: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^\d{4}-(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])T([01]\d|2[0-3]):[0-5]\d:[0-5]\d(\.\d+)?(Z|[+-]([01]\d|2[0-3]):[0-5]\d)$",
    )
    .ok()
});

///
/// FunctionContext
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FunctionContext {
    Policy,
    Validation,
}

impl FunctionContext {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Policy => "policy rules",
            Self::Validation => "validation rules",
        }
    }
}

///
/// Function
/// Allow-listed functions callable from conditions.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Function {
    CurrentModel,
    CurrentOperation,
    Check,
    Contains,
    StartsWith,
    EndsWith,
    Has,
    HasEvery,
    HasSome,
    IsEmpty,
    Length,
    Regex,
    Email,
    Url,
    Datetime,
}

impl Function {
    pub const ALL: [Self; 15] = [
        Self::CurrentModel,
        Self::CurrentOperation,
        Self::Check,
        Self::Contains,
        Self::StartsWith,
        Self::EndsWith,
        Self::Has,
        Self::HasEvery,
        Self::HasSome,
        Self::IsEmpty,
        Self::Length,
        Self::Regex,
        Self::Email,
        Self::Url,
        Self::Datetime,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CurrentModel => "currentModel",
            Self::CurrentOperation => "currentOperation",
            Self::Check => "check",
            Self::Contains => "contains",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::Has => "has",
            Self::HasEvery => "hasEvery",
            Self::HasSome => "hasSome",
            Self::IsEmpty => "isEmpty",
            Self::Length => "length",
            Self::Regex => "regex",
            Self::Email => "email",
            Self::Url => "url",
            Self::Datetime => "datetime",
        }
    }

    /// Accepted argument counts.
    #[must_use]
    pub const fn arity(self) -> RangeInclusive<usize> {
        match self {
            Self::CurrentModel | Self::CurrentOperation => 0..=1,
            Self::Check => 1..=2,
            Self::Contains | Self::StartsWith | Self::EndsWith => 2..=3,
            Self::Has | Self::HasEvery | Self::HasSome | Self::Regex => 2..=2,
            Self::Length => 2..=3,
            Self::IsEmpty | Self::Email | Self::Url | Self::Datetime => 1..=1,
        }
    }

    #[must_use]
    pub const fn allowed_in(self, context: FunctionContext) -> bool {
        match context {
            FunctionContext::Policy => true,
            FunctionContext::Validation => {
                !matches!(self, Self::CurrentModel | Self::CurrentOperation | Self::Check)
            }
        }
    }

    /// Functions whose result depends on more than their argument values.
    #[must_use]
    pub const fn is_contextual(self) -> bool {
        matches!(self, Self::CurrentModel | Self::CurrentOperation | Self::Check)
    }

    /// Evaluate a value-only function. Any Null or ill-typed input yields
    /// `Null`, which conditions treat as false and validation treats as a pass.
    #[must_use]
    pub fn eval_pure(self, args: &[Value]) -> Value {
        let arg = |i: usize| args.get(i).unwrap_or(&Value::Null);
        let flag = |i: usize| arg(i).as_bool().unwrap_or(false);
        let text = |op| eval_text(op, arg(0), arg(1), flag(2)).into();
        let list = |op| eval_list(op, arg(0), arg(1)).into();

        match self {
            Self::Contains => text(TextOp::Contains),
            Self::StartsWith => text(TextOp::StartsWith),
            Self::EndsWith => text(TextOp::EndsWith),
            Self::Has => list(ListOp::Has),
            Self::HasEvery => list(ListOp::HasEvery),
            Self::HasSome => list(ListOp::HasSome),
            Self::IsEmpty => list(ListOp::IsEmpty),
            Self::Length => eval_length(arg(0), arg(1), arg(2)),
            Self::Regex => match (arg(0).as_text(), arg(1).as_text()) {
                (Some(text), Some(pattern)) => Regex::new(pattern)
                    .map_or(Value::Null, |re| Value::Bool(re.is_match(text))),
                _ => Value::Null,
            },
            Self::Email => match_static(&EMAIL, arg(0)),
            Self::Url => match_static(&URL, arg(0)),
            Self::Datetime => match_static(&DATETIME, arg(0)),
            Self::CurrentModel | Self::CurrentOperation | Self::Check => Value::Null,
        }
    }
}

impl FromStr for Function {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| format!("unknown function '{s}'"))
    }
}

fn match_static(re: &LazyLock<Option<Regex>>, value: &Value) -> Value {
    match (re.as_ref(), value.as_text()) {
        (Some(re), Some(text)) => Value::Bool(re.is_match(text)),
        _ => Value::Null,
    }
}

// length(field, min, max?) over text (chars) or lists (items).
fn eval_length(value: &Value, min: &Value, max: &Value) -> Value {
    let len = match value {
        Value::Text(s) => s.chars().count(),
        Value::List(items) => items.len(),
        _ => return Value::Null,
    };
    let Ok(len) = i64::try_from(len) else {
        return Value::Null;
    };

    let above_min = min.as_int().is_none_or(|min| len >= min);
    let below_max = max.as_int().is_none_or(|max| len <= max);

    Value::Bool(above_min && below_max)
}

///
/// Casing
/// Optional argument of `currentModel` / `currentOperation`.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Casing {
    #[default]
    Original,
    Upper,
    Lower,
    Capitalize,
    Uncapitalize,
}

impl Casing {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "original" => Some(Self::Original),
            "upper" => Some(Self::Upper),
            "lower" => Some(Self::Lower),
            "capitalize" => Some(Self::Capitalize),
            "uncapitalize" => Some(Self::Uncapitalize),
            _ => None,
        }
    }

    #[must_use]
    pub fn apply(self, s: &str) -> String {
        let mut chars = s.chars();
        match self {
            Self::Original => s.to_string(),
            Self::Upper => s.to_uppercase(),
            Self::Lower => s.to_lowercase(),
            Self::Capitalize => chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            }),
            Self::Uncapitalize => chars.next().map_or_else(String::new, |first| {
                first.to_lowercase().chain(chars).collect()
            }),
        }
    }
}
