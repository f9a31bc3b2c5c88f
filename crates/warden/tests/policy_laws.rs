//! Laws every schema obeys regardless of its rules: deny overrides allow,
//! no allow means no access, quantifiers over empty relations, nested
//! writes commit or roll back as a whole, and `check` never rules out a
//! row the enforcer would accept.

use proptest::prelude::*;
use warden::{DenyReason, Error, prelude::*};
use warden::core::expr::{call, field, lit, null};

// ---- helpers ----

fn keyed(name: &str) -> EntityModel {
    EntityModel::new(name)
        .primary_key(["id"])
        .field(FieldModel::new("id", FieldKind::Int))
}

fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter().filter_map(|r| r.value("id").as_int()).collect()
}

fn is_denied<T>(result: &Result<T, Error>) -> bool {
    matches!(result, Err(Error::Denied(_)))
}

// Post has many comments; `post_read` is the post read rule
fn threads(post_read: Expr) -> Schema {
    Schema::builder()
        .entity(
            keyed("Post")
                .field(FieldModel::new("title", FieldKind::Text).optional())
                .relation(RelationModel::has_many("comments", "Comment", "postId", "id"))
                .rule(PolicyRule::allow(OperationSet::from([Operation::Create, Operation::Delete]), lit(true)))
                .rule(PolicyRule::allow(Operation::Read, post_read)),
        )
        .entity(
            keyed("Comment")
                .field(FieldModel::new("postId", FieldKind::Int))
                .field(FieldModel::new("body", FieldKind::Text))
                .relation(RelationModel::belongs_to("post", "Post", "postId", "id"))
                .rule(PolicyRule::allow(OperationSet::ALL, lit(true)))
                .rule(PolicyRule::deny(Operation::Create, field("body").eq(lit("spam"))))
                .validate(
                    ValidationRule::new(call(Function::Length, [field("body"), lit(1)]))
                        .on_field("body")
                        .message("body must not be empty"),
                ),
        )
        .build()
        .expect("thread schema")
}

fn seed_threads(db: &PolicyDb<MemoryStore>) {
    let session = db.session(None);
    session
        .create("Post", &WriteData::new().set("id", 1).set("title", "quiet"))
        .expect("post without comments");
    session
        .create(
            "Post",
            &WriteData::new().set("id", 2).set("title", "busy").nested(
                "comments",
                NestedWrite::Create(WriteData::new().set("id", 10).set("body", "first")),
            ),
        )
        .expect("post with a comment");
}

// ---- deny overrides, default deny ----

#[test]
fn deny_wins_over_any_number_of_allows() {
    let schema = Schema::builder()
        .entity(
            keyed("Doc")
                .field(FieldModel::new("locked", FieldKind::Bool).default_value(false))
                .rule(PolicyRule::allow(OperationSet::ALL, lit(true)))
                .rule(PolicyRule::allow(Operation::Read, field("locked").eq(lit(true))))
                .rule(PolicyRule::deny(Operation::Read, field("locked").eq(lit(true)))),
        )
        .build()
        .expect("schema");
    let db = PolicyDb::new(schema, MemoryStore::new());
    let session = db.session(None);

    session.create("Doc", &WriteData::new().set("id", 1)).expect("open doc");
    let locked = session
        .create("Doc", &WriteData::new().set("id", 2).set("locked", true))
        .expect("locked doc");

    assert_eq!(locked, None);
    assert_eq!(ids(&session.read("Doc", &Query::all()).expect("read")), vec![1]);
}

#[test]
fn entities_without_allow_rules_are_closed() {
    let schema = Schema::builder()
        .entity(keyed("Vault"))
        .entity(keyed("Log").rule(PolicyRule::deny(Operation::Delete, lit(true))))
        .build()
        .expect("schema");
    let db = PolicyDb::new(schema, MemoryStore::new());
    let session = db.session(Some(Row::new().with("id", 1)));

    for entity in ["Vault", "Log"] {
        let result = session.create(entity, &WriteData::new().set("id", 1));
        match result {
            Err(Error::Denied(err)) => assert_eq!(err.reason, DenyReason::Row),
            other => panic!("{entity}: expected a denial, got {other:?}"),
        }
        assert_eq!(db.store().row_count(entity), 0);
        assert!(session.read(entity, &Query::all()).expect("read").is_empty());
        assert!(!session.check(entity, Operation::Create, &Row::new()).expect("check"));
    }
}

// ---- quantifiers over empty relations ----

#[test]
fn filter_quantifiers_over_no_comments() {
    let db = PolicyDb::new(threads(lit(true)), MemoryStore::new());
    seed_threads(&db);
    let session = db.session(None);
    let read = |filter: Filter| ids(&session.read("Post", &Query::filter(filter)).expect("read"));

    assert_eq!(read(Filter::every("comments", Filter::False)), vec![1]);
    assert_eq!(read(Filter::none("comments", Filter::True)), vec![1]);
    assert_eq!(read(Filter::some("comments", Filter::True)), vec![2]);
    assert_eq!(read(Filter::every("comments", Filter::eq("body", "first"))), vec![1, 2]);
}

#[test]
fn rule_quantifiers_over_no_comments() {
    let every = PolicyDb::new(threads(expr::all("comments", field("body").ne(null()))), MemoryStore::new());
    seed_threads(&every);
    let rows = every.session(None).read("Post", &Query::all()).expect("read");
    assert_eq!(ids(&rows), vec![1, 2]);

    let some = PolicyDb::new(threads(expr::any("comments", lit(true))), MemoryStore::new());
    seed_threads(&some);
    let rows = some.session(None).read("Post", &Query::all()).expect("read");
    assert_eq!(ids(&rows), vec![2]);
}

// ---- nested writes ----

#[test]
fn failed_nested_validation_rolls_back_the_parent() {
    let db = PolicyDb::new(threads(lit(true)), MemoryStore::new());
    let data = WriteData::new().set("id", 1).nested(
        "comments",
        NestedWrite::Create(WriteData::new().set("id", 10).set("body", "")),
    );

    let err = db.session(None).create("Post", &data).unwrap_err();

    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert_eq!(db.store().row_count("Post"), 0);
    assert_eq!(db.store().row_count("Comment"), 0);
}

#[test]
fn denied_nested_create_rolls_back_the_parent() {
    let db = PolicyDb::new(threads(lit(true)), MemoryStore::new());
    let data = WriteData::new()
        .set("id", 1)
        .nested("comments", NestedWrite::Create(WriteData::new().set("id", 10).set("body", "ok")))
        .nested("comments", NestedWrite::Create(WriteData::new().set("id", 11).set("body", "spam")));

    let result = db.session(None).create("Post", &data);

    assert!(is_denied(&result), "got {result:?}");
    assert_eq!(db.store().row_count("Post"), 0);
    assert_eq!(db.store().row_count("Comment"), 0);
}

// ---- check soundness ----

#[derive(Clone, Copy, Debug)]
enum Cond {
    Above(i64),
    Below(i64),
    Is(i64),
    Flag(bool),
    Both(i64, bool),
}

impl Cond {
    fn expr(self) -> Expr {
        match self {
            Self::Above(k) => field("a").gt(lit(k)),
            Self::Below(k) => field("a").lt(lit(k)),
            Self::Is(k) => field("a").eq(lit(k)),
            Self::Flag(b) => field("b").eq(lit(b)),
            Self::Both(k, b) => field("a").gte(lit(k)) & field("b").eq(lit(b)),
        }
    }
}

fn cond() -> impl Strategy<Value = Cond> {
    prop_oneof![
        (0i64..4).prop_map(Cond::Above),
        (0i64..4).prop_map(Cond::Below),
        (0i64..4).prop_map(Cond::Is),
        any::<bool>().prop_map(Cond::Flag),
        ((0i64..4), any::<bool>()).prop_map(|(k, b)| Cond::Both(k, b)),
    ]
}

fn items(rules: &[(bool, Cond)]) -> Schema {
    let mut item = keyed("Item")
        .field(FieldModel::new("a", FieldKind::Int))
        .field(FieldModel::new("b", FieldKind::Bool))
        .rule(PolicyRule::allow(Operation::Read, lit(true)));
    for &(allow, cond) in rules {
        item = item.rule(if allow {
            PolicyRule::allow(Operation::Create, cond.expr())
        } else {
            PolicyRule::deny(Operation::Create, cond.expr())
        });
    }

    Schema::builder().entity(item).build().expect("item schema")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn unsatisfiable_means_every_create_is_denied(
        rules in prop::collection::vec((any::<bool>(), cond()), 0..4),
        fixed in prop::option::of(0i64..4),
    ) {
        let db = PolicyDb::new(items(&rules), MemoryStore::new());
        let session = db.session(None);
        let partial = fixed.map_or_else(Row::new, |a| Row::new().with("a", a));

        let possible = session.check("Item", Operation::Create, &partial).expect("check");
        if !possible {
            let mut id = 0i64;
            for a in fixed.map_or(0..4, |a| a..a + 1) {
                for b in [false, true] {
                    id += 1;
                    let data = WriteData::new().set("id", id).set("a", a).set("b", b);
                    let result = session.create("Item", &data);
                    prop_assert!(is_denied(&result), "a={} b={} created: {:?}", a, b, result);
                }
            }
            prop_assert_eq!(db.store().row_count("Item"), 0);
        }
    }
}
