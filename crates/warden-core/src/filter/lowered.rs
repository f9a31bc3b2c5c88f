use crate::{
    error::StoreError,
    expr::Quantifier,
    model::JoinColumn,
    value::{CompareOp, ListOp, Row, TextOp, Value, compare_eq, eval_compare, eval_list, eval_text},
};
use serde::{Deserialize, Serialize};

///
/// RowSource
/// Table access used while evaluating existence sub-filters.
///

pub trait RowSource {
    fn table_rows(&self, table: &str) -> Result<Vec<Row>, StoreError>;
}

///
/// LoweredFilter
///
/// Physical filter over one table's columns. `Exists` binds a related
/// table through join columns (`local` on the outer row, `remote` on the
/// related row) and applies a quantifier over the joined rows.
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoweredFilter {
    True,
    False,
    And(Vec<Self>),
    Or(Vec<Self>),
    Not(Box<Self>),
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    Columns {
        left: String,
        op: CompareOp,
        right: String,
    },
    Text {
        column: String,
        op: TextOp,
        value: String,
        case_insensitive: bool,
    },
    List {
        column: String,
        op: ListOp,
        value: Value,
    },
    Exists {
        table: String,
        join: Vec<JoinColumn>,
        quantifier: Quantifier,
        filter: Box<Self>,
    },
}

impl LoweredFilter {
    #[must_use]
    pub fn column_eq(column: &str, value: Value) -> Self {
        Self::Compare {
            column: column.to_string(),
            op: CompareOp::Eq,
            value,
        }
    }

    /// Evaluate against one row of the table this filter is bound to.
    pub fn matches(&self, row: &Row, source: &dyn RowSource) -> Result<bool, StoreError> {
        Ok(match self {
            Self::True => true,
            Self::False => false,
            Self::And(items) => {
                for item in items {
                    if !item.matches(row, source)? {
                        return Ok(false);
                    }
                }
                true
            }
            Self::Or(items) => {
                for item in items {
                    if item.matches(row, source)? {
                        return Ok(true);
                    }
                }
                false
            }
            Self::Not(inner) => !inner.matches(row, source)?,
            Self::Compare { column, op, value } => eval_compare(*op, &row.value(column), value),
            Self::Columns { left, op, right } => {
                eval_compare(*op, &row.value(left), &row.value(right))
            }
            Self::Text {
                column,
                op,
                value,
                case_insensitive,
            } => eval_text(
                *op,
                &row.value(column),
                &Value::Text(value.clone()),
                *case_insensitive,
            )
            .unwrap_or(false),
            Self::List { column, op, value } => {
                eval_list(*op, &row.value(column), value).unwrap_or(false)
            }
            Self::Exists {
                table,
                join,
                quantifier,
                filter,
            } => {
                let related = joined_rows(row, table, join, source)?;
                match quantifier {
                    Quantifier::Any => any_match(&related, filter, source)?,
                    Quantifier::None => !any_match(&related, filter, source)?,
                    Quantifier::All => {
                        let mut all = true;
                        for r in &related {
                            if !filter.matches(r, source)? {
                                all = false;
                                break;
                            }
                        }
                        all
                    }
                }
            }
        })
    }
}

fn any_match(rows: &[Row], filter: &LoweredFilter, source: &dyn RowSource) -> Result<bool, StoreError> {
    for row in rows {
        if filter.matches(row, source)? {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Rows of `table` joined to `outer`; a Null local column joins nothing.
pub(crate) fn joined_rows(
    outer: &Row,
    table: &str,
    join: &[JoinColumn],
    source: &dyn RowSource,
) -> Result<Vec<Row>, StoreError> {
    let keys: Vec<(&str, Value)> = join
        .iter()
        .map(|j| (j.remote.as_str(), outer.value(&j.local)))
        .collect();
    if keys.iter().any(|(_, v)| v.is_null()) {
        return Ok(Vec::new());
    }

    Ok(source
        .table_rows(table)?
        .into_iter()
        .filter(|r| keys.iter().all(|(remote, v)| compare_eq(&r.value(remote), v)))
        .collect())
}
