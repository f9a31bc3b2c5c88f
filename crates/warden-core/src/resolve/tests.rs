use crate::{
    error::{DenyReason, Error, StoreError},
    expr::{self, Function, auth, field},
    filter::{Filter, LoweredFilter, RowSource},
    guard::GuardCache,
    model::{EntityModel, FieldKind, FieldModel, RelationModel, Schema},
    policy::{Operation, PolicyRule},
    resolve::Resolver,
    test_fixtures::{self, principal},
    value::{Row, Value},
};
use std::collections::BTreeMap;

// ---- helpers ----

#[derive(Default)]
struct Tables(BTreeMap<String, Vec<Row>>);

impl Tables {
    fn with(mut self, table: &str, rows: Vec<Row>) -> Self {
        self.0.insert(table.to_string(), rows);
        self
    }

    // ids of `table` rows matching `filter`
    fn ids(&self, table: &str, filter: &LoweredFilter) -> Vec<i64> {
        self.0
            .get(table)
            .into_iter()
            .flatten()
            .filter(|row| filter.matches(row, self).expect("matches"))
            .filter_map(|row| row.value("id").as_int())
            .collect()
    }
}

impl RowSource for Tables {
    fn table_rows(&self, table: &str) -> Result<Vec<Row>, StoreError> {
        Ok(self.0.get(table).cloned().unwrap_or_default())
    }
}

fn resolver<'a>(schema: &'a Schema, guards: &'a GuardCache, acting: &'a Value) -> Resolver<'a> {
    Resolver {
        schema,
        guards,
        principal: acting,
        max_depth: 8,
    }
}

fn blog_tables() -> Tables {
    let post = |id: i64, author: i64, published: bool| {
        Row::new()
            .with("id", id)
            .with("authorId", author)
            .with("published", published)
    };
    let comment = |id: i64, post: i64| Row::new().with("id", id).with("postId", post);

    Tables::default()
        .with(
            "User",
            vec![Row::new().with("id", 1), Row::new().with("id", 2)],
        )
        .with(
            "Post",
            vec![post(10, 1, true), post(20, 2, false), post(30, 1, false)],
        )
        .with("Comment", vec![comment(100, 10), comment(101, 30), comment(102, 20)])
}

fn asset_tables() -> Tables {
    let asset = |id: i64, published: bool, kind: &str| {
        Row::new()
            .with("id", id)
            .with("ownerId", 7)
            .with("published", published)
            .with("assetType", kind)
    };

    Tables::default()
        .with(
            "Asset",
            vec![asset(1, true, "Video"), asset(2, true, "Video"), asset(3, false, "Image")],
        )
        .with(
            "Video",
            vec![
                Row::new().with("id", 1).with("duration", 50),
                Row::new().with("id", 2).with("duration", 500),
            ],
        )
        .with("Image", vec![Row::new().with("id", 3).with("format", "png")])
}

fn guard_ids(schema: &Schema, tables: &Tables, acting: &Value, entity: &str) -> Vec<i64> {
    let guards = GuardCache::new();
    let entity = schema.entity(entity).expect("entity");
    let filter = resolver(schema, &guards, acting)
        .guard_filter(entity, Operation::Read)
        .expect("expands")
        .expect("lowerable");

    tables.ids(&entity.name, &filter)
}

// ---- guards ----

#[test]
fn read_guard_becomes_a_table_filter() {
    let schema = test_fixtures::blog();
    let tables = blog_tables();

    assert_eq!(guard_ids(&schema, &tables, &Value::from(principal(2)), "Post"), vec![10, 20]);
    assert_eq!(guard_ids(&schema, &tables, &Value::from(principal(1)), "Post"), vec![10, 30]);
}

#[test]
fn check_follows_the_related_read_guard() {
    let schema = test_fixtures::blog();
    let tables = blog_tables();

    assert_eq!(
        guard_ids(&schema, &tables, &Value::from(principal(2)), "Comment"),
        vec![100, 102]
    );
}

#[test]
fn delegate_base_fans_out_by_discriminator() {
    let schema = test_fixtures::assets();
    let tables = asset_tables();

    assert_eq!(guard_ids(&schema, &tables, &Value::Null, "Asset"), vec![1]);
    assert_eq!(guard_ids(&schema, &tables, &Value::from(principal(7)), "Asset"), vec![1, 3]);
}

#[test]
fn cyclic_guards_are_left_to_row_evaluation() {
    let team = EntityModel::new("Team")
        .primary_key(["id"])
        .field(FieldModel::new("id", FieldKind::Int))
        .relation(RelationModel::has_many("members", "Member", "teamId", "id"))
        .rule(PolicyRule::allow(Operation::Read, expr::any("members", expr::lit(true))));
    let member = EntityModel::new("Member")
        .primary_key(["id"])
        .field(FieldModel::new("id", FieldKind::Int))
        .field(FieldModel::new("teamId", FieldKind::Int))
        .relation(RelationModel::belongs_to("team", "Team", "teamId", "id"))
        .rule(PolicyRule::allow(Operation::Read, expr::check("team", None)))
        .rule(PolicyRule::allow(Operation::Read, auth().ne(expr::null())));
    let schema = Schema::builder().entity(team).entity(member).build().expect("schema");

    let guards = GuardCache::new();
    let acting = Value::from(principal(1));

    for name in ["Team", "Member"] {
        let entity = schema.entity(name).expect("entity");
        let filter = resolver(&schema, &guards, &acting)
            .guard_filter(entity, Operation::Read)
            .expect("expands");
        assert_eq!(filter, None, "{name}");
    }
}

#[test]
fn unlowerable_guards_report_none() {
    let schema = Schema::builder()
        .entity(
            EntityModel::new("Contact")
                .primary_key(["id"])
                .field(FieldModel::new("id", FieldKind::Int))
                .field(FieldModel::new("email", FieldKind::Text))
                .rule(PolicyRule::allow(
                    Operation::Read,
                    expr::call(Function::Email, [field("email")]),
                )),
        )
        .build()
        .expect("schema");
    let guards = GuardCache::new();
    let contact = schema.entity("Contact").expect("contact");

    let filter = resolver(&schema, &guards, &Value::Null)
        .guard_filter(contact, Operation::Read)
        .expect("expands");
    assert_eq!(filter, None);
}

#[test]
fn depth_limit_denies_instead_of_truncating() {
    let schema = test_fixtures::blog();
    let guards = GuardCache::new();
    let acting = Value::Null;
    let comment = schema.entity("Comment").expect("comment");
    let shallow = Resolver {
        max_depth: 1,
        ..resolver(&schema, &guards, &acting)
    };

    let err = shallow.guard_filter(comment, Operation::Read).unwrap_err();
    let Error::Denied(denied) = err else {
        panic!("expected a denial, got {err:?}");
    };
    assert_eq!(denied.reason, DenyReason::DepthExceeded(1));
    assert_eq!(denied.entity, "Post");
}

// ---- caller filters ----

#[test]
fn relation_filters_only_see_readable_rows() {
    let schema = test_fixtures::blog();
    let guards = GuardCache::new();
    let acting = Value::from(principal(2));
    let user = schema.entity("User").expect("user");

    // user 1's draft is invisible to user 2
    let filter = resolver(&schema, &guards, &acting)
        .expand(user, &Filter::some("posts", Filter::eq("published", false)))
        .expect("expands")
        .expect("lowerable");

    assert_eq!(blog_tables().ids("User", &filter), vec![2]);
}

#[test]
fn inherited_columns_route_through_the_base_table() {
    let schema = test_fixtures::assets();
    let guards = GuardCache::new();
    let acting = Value::Null;
    let video = schema.entity("Video").expect("video");

    let filter = resolver(&schema, &guards, &acting)
        .expand(video, &(Filter::gt("duration", 10) & Filter::eq("published", true)))
        .expect("expands")
        .expect("lowerable");

    assert!(matches!(&filter, LoweredFilter::And(items) if items.len() == 2));
    assert_eq!(asset_tables().ids("Video", &filter), vec![1, 2]);
}

#[test]
fn unknown_and_generated_relations_are_rejected() {
    let blog = test_fixtures::blog();
    let assets = test_fixtures::assets();
    let guards = GuardCache::new();
    let acting = Value::Null;

    let post = blog.entity("Post").expect("post");
    let err = resolver(&blog, &guards, &acting)
        .expand(post, &Filter::some("nope", Filter::True))
        .unwrap_err();
    assert!(matches!(err, Error::Structural(_)));

    let asset = assets.entity("Asset").expect("asset");
    let err = resolver(&assets, &guards, &acting)
        .expand(asset, &Filter::some("delegate_aux_Video", Filter::True))
        .unwrap_err();
    assert!(matches!(err, Error::Structural(_)));
}
