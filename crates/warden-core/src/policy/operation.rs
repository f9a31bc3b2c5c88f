use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

///
/// Operation
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Self; 4] = [Self::Create, Self::Read, Self::Update, Self::Delete];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::Create => 1,
            Self::Read => 1 << 1,
            Self::Update => 1 << 2,
            Self::Delete => 1 << 3,
        }
    }

    /// Operations whose guards may carry a post-image check.
    #[must_use]
    pub const fn has_prospective(self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown operation '{s}'"))
    }
}

///
/// OperationSet
/// Bit set over `Operation`; serialized as a list, `"all"` accepted on input.
///

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "OperationList", into = "OperationList")]
pub struct OperationSet(u8);

impl OperationSet {
    pub const ALL: Self = Self(0b1111);
    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn only(op: Operation) -> Self {
        Self(op.bit())
    }

    #[must_use]
    pub const fn with(self, op: Operation) -> Self {
        Self(self.0 | op.bit())
    }

    #[must_use]
    pub const fn contains(self, op: Operation) -> bool {
        self.0 & op.bit() != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Operation> {
        Operation::ALL.into_iter().filter(move |op| self.contains(*op))
    }

    /// Parse a comma list such as `"create,read"` or `"all"`.
    pub fn parse(s: &str) -> Result<Self, String> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(Self::EMPTY, |set, part| {
                if part == "all" {
                    Ok(Self::ALL)
                } else {
                    part.parse::<Operation>().map(|op| set.with(op))
                }
            })
    }
}

impl From<Operation> for OperationSet {
    fn from(op: Operation) -> Self {
        Self::only(op)
    }
}

impl<const N: usize> From<[Operation; N]> for OperationSet {
    fn from(ops: [Operation; N]) -> Self {
        ops.into_iter().collect()
    }
}

impl FromIterator<Operation> for OperationSet {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl fmt::Display for OperationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ALL {
            return f.write_str("all");
        }
        let names: Vec<_> = self.iter().map(Operation::as_str).collect();
        f.write_str(&names.join(","))
    }
}

#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum OperationList {
    Text(String),
    List(Vec<String>),
}

impl TryFrom<OperationList> for OperationSet {
    type Error = String;

    fn try_from(list: OperationList) -> Result<Self, Self::Error> {
        match list {
            OperationList::Text(s) => Self::parse(&s),
            OperationList::List(items) => Self::parse(&items.join(",")),
        }
    }
}

impl From<OperationSet> for OperationList {
    fn from(set: OperationSet) -> Self {
        Self::List(set.iter().map(|op| op.as_str().to_string()).collect())
    }
}
