use crate::value::Value;
use derive_more::{Deref, DerefMut, IntoIterator};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

///
/// Row
/// Field name → value map. Used for physical table rows, logical
/// (merged) entity rows, unique selectors and principal context.
///

#[derive(
    Clone, Debug, Default, Deref, DerefMut, IntoIterator, PartialEq, Serialize, Deserialize,
)]
#[into_iterator(owned, ref)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Field value, `Null` when the field is absent.
    #[must_use]
    pub fn value(&self, field: &str) -> Value {
        self.0.get(field).cloned().unwrap_or_default()
    }

    /// Copy of this row restricted to `fields`.
    #[must_use]
    pub fn project<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> Self {
        fields
            .into_iter()
            .filter_map(|field| self.0.get(field).map(|v| (field.to_string(), v.clone())))
            .collect()
    }

    /// Overlay `other` on top of this row.
    pub fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for Row {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<const N: usize> From<[(&str, Value); N]> for Row {
    fn from(pairs: [(&str, Value); N]) -> Self {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}

///
/// StorageKey
/// Canonical text encoding of a primary key tuple.
///

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct StorageKey(String);

impl StorageKey {
    /// Encode the key columns of `row`. Returns `None` if any column is Null.
    #[must_use]
    pub fn from_row(columns: &[String], row: &Row) -> Option<Self> {
        let mut out = String::new();
        for (i, column) in columns.iter().enumerate() {
            let value = row.get(column)?;
            if value.is_null() {
                return None;
            }
            if i > 0 {
                out.push('|');
            }
            encode_part(value, &mut out);
        }

        Some(Self(out))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn encode_part(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push('~'),
        Value::Bool(b) => out.push_str(if *b { "b1" } else { "b0" }),
        Value::Int(i) => {
            out.push('i');
            out.push_str(&i.to_string());
        }
        Value::Float(x) => {
            out.push('f');
            out.push_str(&x.to_string());
        }
        Value::Text(s) => {
            out.push('s');
            for ch in s.chars() {
                if matches!(ch, '|' | '\\' | ',' | ']') {
                    out.push('\\');
                }
                out.push(ch);
            }
        }
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                encode_part(item, out);
            }
            out.push(']');
        }
        Value::Record(_) => out.push_str(&value.to_string()),
    }
}
