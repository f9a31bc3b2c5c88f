use crate::{
    expr::Expr,
    policy::{Operation, OperationSet},
};
use serde::{Deserialize, Serialize};

///
/// Effect
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

///
/// PolicyRule
///
/// One `@@allow` / `@@deny` (or field-level `@allow` / `@deny`) declaration.
/// Field rules name their field and are limited to read and update.
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub effect: Effect,
    pub operations: OperationSet,
    pub condition: Expr,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    #[serde(default)]
    pub overridable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl PolicyRule {
    #[must_use]
    pub fn allow(operations: impl Into<OperationSet>, condition: Expr) -> Self {
        Self::new(Effect::Allow, operations.into(), condition)
    }

    #[must_use]
    pub fn deny(operations: impl Into<OperationSet>, condition: Expr) -> Self {
        Self::new(Effect::Deny, operations.into(), condition)
    }

    const fn new(effect: Effect, operations: OperationSet, condition: Expr) -> Self {
        Self {
            effect,
            operations,
            condition,
            field: None,
            overridable: false,
            name: None,
        }
    }

    /// Scope the rule to a single field.
    #[must_use]
    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Field allow that re-permits the field when the row guard denies.
    #[must_use]
    pub const fn overridable(mut self) -> Self {
        self.overridable = true;
        self
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub const fn applies_to(&self, op: Operation) -> bool {
        self.operations.contains(op)
    }

    #[must_use]
    pub const fn is_allow(&self) -> bool {
        matches!(self.effect, Effect::Allow)
    }

    #[must_use]
    pub const fn is_field_rule(&self) -> bool {
        self.field.is_some()
    }

    /// Label used in logs and diagnostics.
    #[must_use]
    pub fn label(&self) -> String {
        let effect = if self.is_allow() { "allow" } else { "deny" };
        match &self.name {
            Some(name) => format!("{effect} '{name}'"),
            None => format!("{effect}({}, {})", self.operations, self.condition),
        }
    }
}

///
/// ValidationRule
/// `@@validate(condition, message)` or a field-level validation attribute.
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub condition: Expr,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ValidationRule {
    #[must_use]
    pub const fn new(condition: Expr) -> Self {
        Self {
            condition,
            message: None,
            field: None,
        }
    }

    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Message reported on failure.
    #[must_use]
    pub fn describe(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| format!("condition {} failed", self.condition))
    }
}
