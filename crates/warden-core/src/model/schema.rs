use crate::{
    error::{PolicyCompilationError, StructuralError},
    guard,
    model::{
        Cardinality, EntityModel, FieldKind, FieldModel, JoinColumn, ReferentialAction,
        RelationModel,
    },
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

/// Prefix of engine-generated delegate relations.
pub const AUX_RELATION_PREFIX: &str = "delegate_aux_";

///
/// SchemaVersion
/// SHA-256 fingerprint of the declared schema.
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SchemaVersion([u8; 32]);

impl SchemaVersion {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

///
/// Schema
///
/// Resolved, immutable entity registry. Building a schema resolves
/// inheritance, generates delegate links and statically checks every
/// policy and validation condition.
///

#[derive(Clone, Debug)]
pub struct Schema {
    entities: BTreeMap<String, EntityModel>,
    version: SchemaVersion,
}

#[derive(Deserialize, Serialize)]
struct SchemaDocument {
    entities: Vec<EntityModel>,
}

impl Schema {
    #[must_use]
    pub const fn builder() -> SchemaBuilder {
        SchemaBuilder {
            entities: Vec::new(),
        }
    }

    /// Load a schema from its JSON form: `{"entities": [...]}`.
    pub fn from_json(json: &str) -> Result<Self, PolicyCompilationError> {
        let doc: SchemaDocument = serde_json::from_str(json)
            .map_err(|err| PolicyCompilationError::SchemaJson(err.to_string()))?;

        SchemaBuilder {
            entities: doc.entities,
        }
        .build()
    }

    #[must_use]
    pub const fn version(&self) -> SchemaVersion {
        self.version
    }

    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityModel> {
        self.entities.get(name)
    }

    /// Entity lookup for request handling.
    pub fn try_entity(&self, name: &str) -> Result<&EntityModel, StructuralError> {
        self.entity(name).ok_or_else(|| StructuralError::UnknownEntity {
            entity: name.to_string(),
        })
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityModel> {
        self.entities.values()
    }

    /// Columns of `entity`'s own table: primary key plus fields it stores.
    #[must_use]
    pub fn table_columns(&self, entity: &EntityModel) -> Vec<String> {
        let mut columns = entity.primary_key.clone();
        for field in entity.own_columns() {
            if !columns.contains(&field.name) {
                columns.push(field.name.clone());
            }
        }

        columns
    }

    /// Storage chain of an entity: the delegate bases above it (root first)
    /// followed by the entity itself. Each member owns one table.
    #[must_use]
    pub fn delegate_chain<'a>(&'a self, entity: &'a EntityModel) -> Vec<&'a EntityModel> {
        let mut chain = vec![entity];
        let mut current = entity;
        while let Some(base) = current.base.as_deref().and_then(|b| self.entity(b)) {
            if !base.is_delegate() {
                break;
            }
            chain.push(base);
            current = base;
        }
        chain.reverse();

        chain
    }

    /// Nearest delegate base of `entity`, if it is a delegate subtype.
    #[must_use]
    pub fn delegate_base(&self, entity: &EntityModel) -> Option<&EntityModel> {
        entity
            .base
            .as_deref()
            .and_then(|b| self.entity(b))
            .filter(|base| base.is_delegate())
    }

    /// Concrete (non-delegate) descendants reachable through delegate links.
    #[must_use]
    pub fn concrete_subtypes(&self, entity: &EntityModel) -> Vec<&EntityModel> {
        let mut out = Vec::new();
        for name in &entity.subtypes {
            if let Some(sub) = self.entity(name) {
                if sub.is_delegate() {
                    out.extend(self.concrete_subtypes(sub));
                } else {
                    out.push(sub);
                }
            }
        }

        out
    }

    /// Foreign-key owning relations declared anywhere that point at `target`.
    #[must_use]
    pub fn referencing_relations(&self, target: &str) -> Vec<(&EntityModel, &RelationModel)> {
        self.entities
            .values()
            .flat_map(|entity| {
                entity
                    .relations
                    .iter()
                    .filter(move |r| {
                        r.owner && !r.aux && r.target == target && r.holder == entity.name
                    })
                    .map(move |r| (entity, r))
            })
            .collect()
    }
}

///
/// SchemaBuilder
///

#[derive(Clone, Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityModel>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn entity(mut self, entity: EntityModel) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn build(self) -> Result<Schema, PolicyCompilationError> {
        let version = fingerprint(&self.entities)?;

        let mut declared = BTreeMap::new();
        for entity in self.entities {
            if declared.contains_key(&entity.name) {
                return Err(PolicyCompilationError::DuplicateEntity {
                    entity: entity.name,
                });
            }
            declared.insert(entity.name.clone(), entity);
        }

        let mut resolved = BTreeMap::new();
        for name in declared.keys() {
            let entity = resolve_entity(&declared, name)?;
            resolved.insert(name.clone(), entity);
        }

        link_delegates(&mut resolved);

        let schema = Schema {
            entities: resolved,
            version,
        };
        check_structure(&schema)?;
        guard::check_schema(&schema)?;

        tracing::debug!(
            version = %schema.version,
            entities = schema.entities.len(),
            "schema built"
        );

        Ok(schema)
    }
}

fn fingerprint(entities: &[EntityModel]) -> Result<SchemaVersion, PolicyCompilationError> {
    let mut sorted: Vec<&EntityModel> = entities.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let bytes = serde_json::to_vec(&sorted)
        .map_err(|err| PolicyCompilationError::SchemaJson(err.to_string()))?;

    Ok(SchemaVersion(Sha256::digest(&bytes).into()))
}

// Ancestor names, nearest first.
fn ancestors_of(
    declared: &BTreeMap<String, EntityModel>,
    name: &str,
) -> Result<Vec<String>, PolicyCompilationError> {
    let mut out: Vec<String> = Vec::new();
    let mut current = declared
        .get(name)
        .ok_or_else(|| PolicyCompilationError::UnknownEntity {
            entity: name.to_string(),
        })?;

    while let Some(base_name) = &current.base {
        let base = declared
            .get(base_name)
            .ok_or_else(|| PolicyCompilationError::UnknownBase {
                entity: current.name.clone(),
                base: base_name.clone(),
            })?;
        if base.name == name || out.contains(&base.name) {
            return Err(PolicyCompilationError::InheritanceCycle {
                entity: name.to_string(),
            });
        }
        if !base.is_abstract && !base.is_delegate() {
            return Err(PolicyCompilationError::InvalidBase {
                entity: current.name.clone(),
                base: base.name.clone(),
            });
        }
        out.push(base.name.clone());
        current = base;
    }

    Ok(out)
}

fn resolve_entity(
    declared: &BTreeMap<String, EntityModel>,
    name: &str,
) -> Result<EntityModel, PolicyCompilationError> {
    let ancestors = ancestors_of(declared, name)?;

    // chain root-most first, ending with the entity itself
    let mut chain: Vec<&EntityModel> = ancestors.iter().filter_map(|a| declared.get(a)).collect();
    chain.reverse();
    let Some(own) = declared.get(name) else {
        return Err(PolicyCompilationError::UnknownEntity {
            entity: name.to_string(),
        });
    };
    chain.push(own);

    // storage holder for members declared at chain[i]
    let holder_at = |i: usize| -> String {
        chain[i..]
            .iter()
            .find(|e| !e.is_abstract)
            .map_or_else(|| name.to_string(), |e| e.name.clone())
    };

    let mut entity = own.clone();
    entity.fields.clear();
    entity.relations.clear();
    entity.ancestors = ancestors;

    let mut seen = BTreeSet::new();
    for (i, declarer) in chain.iter().enumerate() {
        let holder = holder_at(i);
        for field in &declarer.fields {
            if !seen.insert(field.name.clone()) {
                return Err(PolicyCompilationError::DuplicateField {
                    entity: name.to_string(),
                    field: field.name.clone(),
                });
            }
            let mut field = field.clone();
            field.owner.clone_from(&holder);
            entity.fields.push(field);
        }
        for relation in &declarer.relations {
            if !seen.insert(relation.name.clone()) {
                return Err(PolicyCompilationError::DuplicateField {
                    entity: name.to_string(),
                    field: relation.name.clone(),
                });
            }
            let mut relation = relation.clone();
            relation.holder.clone_from(&holder);
            entity.relations.push(relation);
        }
    }

    if entity.primary_key.is_empty() {
        entity.primary_key = chain
            .iter()
            .rev()
            .find(|e| !e.primary_key.is_empty())
            .map(|e| e.primary_key.clone())
            .unwrap_or_default();
    }

    Ok(entity)
}

// Record delegate subtypes and generate the aux relation pair per link.
fn link_delegates(entities: &mut BTreeMap<String, EntityModel>) {
    let links: Vec<(String, String, Vec<String>)> = entities
        .values()
        .filter_map(|e| {
            let base = e.base.as_ref()?;
            entities
                .get(base)
                .filter(|b| b.is_delegate())
                .map(|_| (base.clone(), e.name.clone(), e.primary_key.clone()))
        })
        .collect();

    for (base, sub, key) in links {
        let join: Vec<JoinColumn> = key
            .iter()
            .map(|k| JoinColumn {
                local: k.clone(),
                remote: k.clone(),
            })
            .collect();

        if let Some(base_entity) = entities.get_mut(&base) {
            base_entity.subtypes.push(sub.clone());
            base_entity.relations.push(RelationModel {
                name: format!("{AUX_RELATION_PREFIX}{sub}"),
                target: sub.clone(),
                cardinality: Cardinality::One,
                join: join.clone(),
                owner: false,
                on_delete: ReferentialAction::NoAction,
                aux: true,
                holder: base.clone(),
            });
        }
        if let Some(sub_entity) = entities.get_mut(&sub) {
            sub_entity.relations.push(RelationModel {
                name: format!("{AUX_RELATION_PREFIX}{base}"),
                target: base.clone(),
                cardinality: Cardinality::One,
                join,
                owner: true,
                on_delete: ReferentialAction::NoAction,
                aux: true,
                holder: sub.clone(),
            });
        }
    }
}

fn check_structure(schema: &Schema) -> Result<(), PolicyCompilationError> {
    for entity in schema.entities() {
        if !entity.is_abstract && entity.primary_key.is_empty() {
            return Err(PolicyCompilationError::MissingPrimaryKey {
                entity: entity.name.clone(),
            });
        }
        for pk in &entity.primary_key {
            if entity.get_field(pk).is_none() {
                return Err(PolicyCompilationError::UnknownField {
                    entity: entity.name.clone(),
                    field: pk.clone(),
                });
            }
        }

        if let Some(disc) = &entity.delegate {
            let valid = entity
                .get_field(disc)
                .is_some_and(|f| matches!(f.kind, FieldKind::Text | FieldKind::Enum { .. }));
            if !valid {
                return Err(PolicyCompilationError::InvalidDiscriminator {
                    entity: entity.name.clone(),
                    field: disc.clone(),
                });
            }
        }

        for relation in &entity.relations {
            check_relation(schema, entity, relation)?;
        }
    }

    Ok(())
}

fn check_relation(
    schema: &Schema,
    entity: &EntityModel,
    relation: &RelationModel,
) -> Result<(), PolicyCompilationError> {
    let target = schema
        .entity(&relation.target)
        .ok_or_else(|| PolicyCompilationError::UnknownEntity {
            entity: relation.target.clone(),
        })?;

    let invalid = |column: &str| PolicyCompilationError::InvalidJoin {
        entity: entity.name.clone(),
        relation: relation.name.clone(),
        column: column.to_string(),
    };

    if relation.join.is_empty() {
        return Err(invalid(""));
    }
    for join in &relation.join {
        if entity.get_field(&join.local).is_none() {
            return Err(invalid(&join.local));
        }
        if target.get_field(&join.remote).is_none() {
            return Err(invalid(&join.remote));
        }
    }

    Ok(())
}

/// Field lookup that reports a compilation error.
pub(crate) fn require_field<'a>(
    entity: &'a EntityModel,
    name: &str,
) -> Result<&'a FieldModel, PolicyCompilationError> {
    entity
        .get_field(name)
        .ok_or_else(|| PolicyCompilationError::UnknownField {
            entity: entity.name.clone(),
            field: name.to_string(),
        })
}

/// Relation lookup that reports a compilation error.
pub(crate) fn require_relation<'a>(
    entity: &'a EntityModel,
    name: &str,
) -> Result<&'a RelationModel, PolicyCompilationError> {
    entity
        .get_relation(name)
        .ok_or_else(|| PolicyCompilationError::UnknownRelation {
            entity: entity.name.clone(),
            relation: name.to_string(),
        })
}
