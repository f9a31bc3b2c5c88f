use crate::{
    expr::{Expr, lit},
    model::{EntityModel, Schema},
    policy::{Operation, PolicyRepository, PolicyRule},
};
use std::collections::BTreeMap;

///
/// CompiledGuard
///
/// Immutable guard for one (entity, operation).
///
/// pre  → evaluated against the current row (create: the inserted row).
/// post → update/delete only; evaluated with current = pre-image and
///        prospective = post-image. `None` when no rule uses `future()`.
///

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledGuard {
    pub entity: String,
    pub operation: Operation,
    pub pre: Expr,
    pub post: Option<Expr>,
    pub fields: BTreeMap<String, FieldGuard>,
    pub has_allow: bool,
}

impl CompiledGuard {
    /// True if no row can ever pass (no allow rule at all).
    #[must_use]
    pub const fn denies_all(&self) -> bool {
        !self.has_allow
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldGuard> {
        self.fields.get(name)
    }

    /// True if some field rule can re-permit fields on a denied row.
    #[must_use]
    pub fn has_overrides(&self) -> bool {
        self.fields.values().any(|f| f.override_permit.is_some())
    }
}

///
/// FieldGuard
///

#[derive(Clone, Debug, PartialEq)]
pub struct FieldGuard {
    /// Field visible (read) or writable (update).
    pub permit: Expr,

    /// Re-permit when the row guard denies; from `overridable` allows.
    pub override_permit: Option<Expr>,
}

/// Compile the guard for `(entity, op)`. The schema is already checked.
#[must_use]
pub fn compile_guard(schema: &Schema, entity: &EntityModel, op: Operation) -> CompiledGuard {
    let repo = PolicyRepository::new(schema);
    let rules = repo.row_rules(entity, op);
    let has_allow = rules.iter().any(|r| r.is_allow());
    for rule in &rules {
        tracing::trace!(entity = %entity.name, operation = %op, rule = %rule.label(), "guard rule");
    }

    let (pre, post) = if op.has_prospective() && rules.iter().any(|r| r.condition.references_prospective()) {
        let (pre_rules, post_rules): (Vec<&PolicyRule>, Vec<&PolicyRule>) = rules
            .iter()
            .copied()
            .partition(|r| !r.condition.references_prospective());

        let mut pre_allows = conditions(&pre_rules, true);
        if post_rules.iter().any(|r| r.is_allow()) {
            // some allow can only be decided on the post-image
            pre_allows.push(lit(true));
        }
        let pre = combine(pre_allows, conditions(&pre_rules, false));
        let post = combine(conditions(&rules, true), conditions(&rules, false));

        (pre, Some(post))
    } else {
        (combine(conditions(&rules, true), conditions(&rules, false)), None)
    };

    let fields = if matches!(op, Operation::Read | Operation::Update) {
        repo.field_rules(entity, op)
            .into_iter()
            .map(|(field, rules)| (field.to_string(), compile_field(&rules)))
            .collect()
    } else {
        BTreeMap::new()
    };

    tracing::debug!(
        entity = %entity.name,
        operation = %op,
        rules = rules.len(),
        fields = fields.len(),
        post_check = post.is_some(),
        "guard compiled"
    );

    CompiledGuard {
        entity: entity.name.clone(),
        operation: op,
        pre,
        post,
        fields,
        has_allow,
    }
}

fn compile_field(rules: &[&PolicyRule]) -> FieldGuard {
    let allows = conditions(rules, true);
    let denies = conditions(rules, false);

    let permit = if allows.is_empty() {
        if denies.is_empty() {
            lit(true)
        } else {
            !Expr::or_any(denies.clone())
        }
    } else {
        combine(allows, denies.clone())
    };

    let overrides: Vec<Expr> = rules
        .iter()
        .filter(|r| r.is_allow() && r.overridable)
        .map(|r| r.condition.clone())
        .collect();
    let override_permit = (!overrides.is_empty()).then(|| combine(overrides, denies));

    FieldGuard {
        permit,
        override_permit,
    }
}

fn conditions(rules: &[&PolicyRule], allow: bool) -> Vec<Expr> {
    rules
        .iter()
        .filter(|r| r.is_allow() == allow)
        .map(|r| r.condition.clone())
        .collect()
}

/// `(a1 || a2 ..) && !(d1 || d2 ..)`; no allows means `false`.
fn combine(allows: Vec<Expr>, denies: Vec<Expr>) -> Expr {
    if allows.is_empty() {
        return lit(false);
    }

    let allow = Expr::or_any(allows);
    if denies.is_empty() {
        allow
    } else {
        allow & !Expr::or_any(denies)
    }
}
