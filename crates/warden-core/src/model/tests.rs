use crate::{
    error::PolicyCompilationError,
    model::{
        AUX_RELATION_PREFIX, EntityModel, FieldKind, FieldModel, ReferentialAction, RelationModel,
        Schema,
    },
    test_fixtures,
    value::Value,
};

// ---- helpers ----

fn keyed(name: &str) -> EntityModel {
    EntityModel::new(name)
        .primary_key(["id"])
        .field(FieldModel::new("id", FieldKind::Int))
}

fn names<'a>(entities: impl IntoIterator<Item = &'a EntityModel>) -> Vec<&'a str> {
    entities.into_iter().map(|e| e.name.as_str()).collect()
}

// ---- inheritance ----

#[test]
fn abstract_members_are_stored_by_the_concrete_entity() {
    let schema = Schema::builder()
        .entity(
            EntityModel::new("Named")
                .abstract_type()
                .field(FieldModel::new("name", FieldKind::Text)),
        )
        .entity(keyed("Person").extends("Named"))
        .build()
        .expect("schema");

    let person = schema.entity("Person").expect("person");
    let name = person.get_field("name").expect("inherited field");

    assert_eq!(name.owner, "Person");
    assert_eq!(person.ancestors, vec!["Named".to_string()]);
    assert_eq!(schema.table_columns(person), vec!["id", "name"]);
    assert_eq!(names(schema.delegate_chain(person)), vec!["Person"]);
}

#[test]
fn delegate_subtypes_split_storage_along_the_chain() {
    let schema = test_fixtures::assets();
    let asset = schema.entity("Asset").expect("asset");
    let video = schema.entity("Video").expect("video");

    assert_eq!(names(schema.delegate_chain(video)), vec!["Asset", "Video"]);
    assert_eq!(schema.delegate_base(video).map(|b| b.name.as_str()), Some("Asset"));
    assert_eq!(schema.delegate_base(asset), None);

    assert_eq!(video.get_field("ownerId").map(|f| f.owner.as_str()), Some("Asset"));
    assert_eq!(schema.table_columns(video), vec!["id", "duration"]);
    assert_eq!(
        schema.table_columns(asset),
        vec!["id", "ownerId", "published", "assetType"]
    );

    let mut subtypes = names(schema.concrete_subtypes(asset));
    subtypes.sort_unstable();
    assert_eq!(subtypes, vec!["Image", "Video"]);
}

#[test]
fn delegate_links_generate_aux_relations() {
    let schema = test_fixtures::assets();
    let asset = schema.entity("Asset").expect("asset");
    let video = schema.entity("Video").expect("video");

    let down = asset
        .get_relation(&format!("{AUX_RELATION_PREFIX}Video"))
        .expect("base to subtype");
    assert!(down.aux && !down.owner);
    assert_eq!(down.target, "Video");

    let up = video
        .get_relation(&format!("{AUX_RELATION_PREFIX}Asset"))
        .expect("subtype to base");
    assert!(up.aux && up.owner);
    assert_eq!(up.local_columns().collect::<Vec<_>>(), vec!["id"]);
}

#[test]
fn referencing_relations_skip_inverse_and_aux_links() {
    let schema = test_fixtures::blog();

    let refs: Vec<(&str, &str)> = schema
        .referencing_relations("User")
        .into_iter()
        .map(|(e, r)| (e.name.as_str(), r.name.as_str()))
        .collect();
    assert_eq!(refs, vec![("Post", "author")]);

    assert!(test_fixtures::assets().referencing_relations("Asset").is_empty());
}

// ---- structure errors ----

#[test]
fn duplicate_entities_are_rejected() {
    let err = Schema::builder()
        .entity(keyed("Tag"))
        .entity(keyed("Tag"))
        .build()
        .unwrap_err();

    assert_eq!(
        err,
        PolicyCompilationError::DuplicateEntity {
            entity: "Tag".to_string()
        }
    );
}

#[test]
fn inherited_duplicates_are_rejected() {
    let err = Schema::builder()
        .entity(
            EntityModel::new("Base")
                .abstract_type()
                .field(FieldModel::new("label", FieldKind::Text)),
        )
        .entity(
            keyed("Item")
                .extends("Base")
                .field(FieldModel::new("label", FieldKind::Text)),
        )
        .build()
        .unwrap_err();

    assert!(matches!(err, PolicyCompilationError::DuplicateField { field, .. } if field == "label"));
}

#[test]
fn bad_bases_are_rejected() {
    let unknown = Schema::builder().entity(keyed("A").extends("Ghost")).build().unwrap_err();
    assert!(matches!(unknown, PolicyCompilationError::UnknownBase { .. }));

    let concrete = Schema::builder()
        .entity(keyed("A"))
        .entity(keyed("B").extends("A"))
        .build()
        .unwrap_err();
    assert!(matches!(concrete, PolicyCompilationError::InvalidBase { base, .. } if base == "A"));

    let cycle = Schema::builder()
        .entity(keyed("A").abstract_type().extends("B"))
        .entity(EntityModel::new("B").abstract_type().extends("A"))
        .build()
        .unwrap_err();
    assert!(matches!(cycle, PolicyCompilationError::InheritanceCycle { .. }));
}

#[test]
fn keys_discriminators_and_joins_must_resolve() {
    let no_key = Schema::builder()
        .entity(EntityModel::new("Loose").field(FieldModel::new("x", FieldKind::Int)))
        .build()
        .unwrap_err();
    assert!(matches!(no_key, PolicyCompilationError::MissingPrimaryKey { .. }));

    let bad_disc = Schema::builder()
        .entity(keyed("Shape").delegate("sides").field(FieldModel::new("sides", FieldKind::Int)))
        .build()
        .unwrap_err();
    assert!(matches!(bad_disc, PolicyCompilationError::InvalidDiscriminator { .. }));

    let bad_join = Schema::builder()
        .entity(keyed("User"))
        .entity(keyed("Post").relation(RelationModel::belongs_to("author", "User", "authorId", "id")))
        .build()
        .unwrap_err();
    assert!(matches!(
        bad_join,
        PolicyCompilationError::InvalidJoin { column, .. } if column == "authorId"
    ));
}

// ---- versions & json ----

#[test]
fn version_tracks_declared_content() {
    let a = test_fixtures::blog().version();
    let b = test_fixtures::blog().version();
    assert_eq!(a, b);

    let changed = Schema::builder()
        .entity(test_fixtures::user())
        .entity(test_fixtures::post().field(FieldModel::new("views", FieldKind::Int).optional()))
        .entity(test_fixtures::comment())
        .build()
        .expect("schema");
    assert_ne!(changed.version(), a);
    assert_eq!(a.to_string().len(), 16);
}

#[test]
fn schema_loads_from_json() {
    let schema = Schema::from_json(
        r#"{"entities": [
            {"name": "Tag", "primary_key": ["id"], "fields": [
                {"name": "id", "kind": {"type": "int"}},
                {"name": "label", "kind": {"type": "text"}, "optional": true}
            ]}
        ]}"#,
    )
    .expect("valid document");

    let tag = schema.entity("Tag").expect("tag");
    assert!(tag.get_field("label").is_some_and(|f| f.optional));
    assert_eq!(tag.get_field("id").map(|f| f.owner.as_str()), Some("Tag"));

    let err = Schema::from_json("{").unwrap_err();
    assert!(matches!(err, PolicyCompilationError::SchemaJson(_)));
}

// ---- fields ----

#[test]
fn field_kinds_admit_their_domain() {
    let role = FieldKind::enumeration(["user", "admin"]);
    assert!(role.admits(&Value::from("admin")));
    assert!(!role.admits(&Value::from("root")));

    assert!(FieldKind::Float.admits(&Value::Int(1)));
    assert!(!FieldKind::Int.admits(&Value::Float(1.0)));

    let tags = FieldKind::list(FieldKind::Text);
    assert!(tags.admits(&Value::List(vec![Value::from("a")])));
    assert!(!tags.admits(&Value::List(vec![Value::Int(1)])));
}

#[test]
fn relation_builders_orient_their_joins() {
    let author = RelationModel::belongs_to("author", "User", "authorId", "id")
        .on_delete(ReferentialAction::Cascade);
    assert!(author.owner && !author.is_to_many());
    assert_eq!(author.local_columns().collect::<Vec<_>>(), vec!["authorId"]);
    assert_eq!(author.on_delete, ReferentialAction::Cascade);

    let posts = RelationModel::has_many("posts", "Post", "authorId", "id");
    assert!(!posts.owner && posts.is_to_many());
    assert_eq!(posts.remote_columns().collect::<Vec<_>>(), vec!["authorId"]);
}
