use crate::{
    model::{FieldModel, RelationModel},
    policy::{PolicyRule, ValidationRule},
};
use serde::{Deserialize, Serialize};

///
/// EntityModel
///
/// Declared entity plus the members resolved by `Schema::build`:
/// after building, `fields` and `relations` hold the logical (inherited +
/// own) lists, each tagged with the entity whose table stores it.
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityModel {
    pub name: String,

    #[serde(default)]
    pub primary_key: Vec<String>,

    #[serde(default)]
    pub fields: Vec<FieldModel>,

    #[serde(default)]
    pub relations: Vec<RelationModel>,

    /// Discriminator field; set on delegate (polymorphic) bases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,

    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,

    #[serde(default)]
    pub rules: Vec<PolicyRule>,

    #[serde(default)]
    pub validations: Vec<ValidationRule>,

    /// Ancestors, nearest first. Filled in by `Schema::build`.
    #[serde(skip)]
    pub ancestors: Vec<String>,

    /// Direct delegate subtypes. Filled in by `Schema::build`.
    #[serde(skip)]
    pub subtypes: Vec<String>,
}

impl EntityModel {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: Vec::new(),
            fields: Vec::new(),
            relations: Vec::new(),
            delegate: None,
            base: None,
            is_abstract: false,
            rules: Vec::new(),
            validations: Vec::new(),
            ancestors: Vec::new(),
            subtypes: Vec::new(),
        }
    }

    // ---------------------------------------------------------------------
    // Builder
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn primary_key<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.primary_key = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn field(mut self, field: FieldModel) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: RelationModel) -> Self {
        self.relations.push(relation);
        self
    }

    /// Mark as a delegate base discriminated by `field`.
    #[must_use]
    pub fn delegate(mut self, field: impl Into<String>) -> Self {
        self.delegate = Some(field.into());
        self
    }

    #[must_use]
    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    #[must_use]
    pub const fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    #[must_use]
    pub fn rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub fn validate(mut self, rule: ValidationRule) -> Self {
        self.validations.push(rule);
        self
    }

    // ---------------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<&FieldModel> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn get_relation(&self, name: &str) -> Option<&RelationModel> {
        self.relations.iter().find(|r| r.name == name)
    }

    #[must_use]
    pub const fn is_delegate(&self) -> bool {
        self.delegate.is_some()
    }

    /// Fields stored in this entity's own table.
    pub fn own_columns(&self) -> impl Iterator<Item = &FieldModel> {
        self.fields.iter().filter(move |f| f.owner == self.name)
    }

    #[must_use]
    pub fn is_primary_key(&self, field: &str) -> bool {
        self.primary_key.iter().any(|pk| pk == field)
    }
}
