//! End-to-end scenarios through the public facade: schema declared with the
//! prelude vocabulary, enforced over the in-memory store.

use warden::{DenyReason, Error, PolicyDeniedError, prelude::*};
use warden::core::expr::{auth_field, call, current_operation, field, future, lit};

// ---- helpers ----

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn keyed(name: &str) -> EntityModel {
    EntityModel::new(name)
        .primary_key(["id"])
        .field(FieldModel::new("id", FieldKind::Int))
}

fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter().filter_map(|r| r.value("id").as_int()).collect()
}

fn denied<T: std::fmt::Debug>(result: Result<T, Error>) -> PolicyDeniedError {
    match result {
        Err(Error::Denied(err)) => err,
        other => panic!("expected a policy denial, got {other:?}"),
    }
}

// ---- published posts ----

fn posts() -> Schema {
    Schema::builder()
        .entity(
            EntityModel::new("Post")
                .primary_key(["id"])
                .field(FieldModel::new("id", FieldKind::Int).auto_increment())
                .field(FieldModel::new("title", FieldKind::Text))
                .field(FieldModel::new("published", FieldKind::Bool).default_value(false))
                .rule(PolicyRule::allow(
                    OperationSet::from([Operation::Create, Operation::Update]),
                    lit(true),
                ))
                .rule(PolicyRule::allow(Operation::Read, field("published").eq(lit(true)))),
        )
        .build()
        .expect("post schema")
}

#[test]
fn published_posts_are_the_only_readable_posts() {
    init_tracing();
    let db = PolicyDb::new(posts(), MemoryStore::new());
    let session = db.session(None);

    let public = session
        .create("Post", &WriteData::new().set("title", "hello").set("published", true))
        .expect("create public");
    let draft = session
        .create("Post", &WriteData::new().set("title", "draft"))
        .expect("create draft");

    // the draft is written but not readable back
    assert!(public.is_some());
    assert_eq!(draft, None);
    assert_eq!(db.store().row_count("Post"), 2);

    let rows = session.read("Post", &Query::all()).expect("read");
    assert_eq!(ids(&rows), vec![1]);
    assert_eq!(session.count("Post", &Filter::True).expect("count"), 1);

    let republished = session
        .update("Post", &Row::new().with("id", 2), &WriteData::new().set("published", true))
        .expect("publish draft");
    assert_eq!(republished.map(|r| r.value("title")), Some(Value::from("draft")));

    let rows = session.read("Post", &Query::all()).expect("read");
    assert_eq!(ids(&rows), vec![1, 2]);
}

// ---- salary ----

fn employees() -> Schema {
    Schema::builder()
        .entity(
            keyed("Employee")
                .field(FieldModel::new("name", FieldKind::Text))
                .field(FieldModel::new("salary", FieldKind::Int))
                .rule(PolicyRule::allow(OperationSet::ALL, lit(true)))
                .rule(
                    PolicyRule::allow(Operation::Read, auth_field("admin").eq(lit(true)))
                        .on_field("salary"),
                ),
        )
        .build()
        .expect("employee schema")
}

fn seed_employee(db: &PolicyDb<MemoryStore>) {
    db.session(None)
        .create(
            "Employee",
            &WriteData::new().set("id", 1).set("name", "ann").set("salary", 9000),
        )
        .expect("seed employee");
}

#[test]
fn salary_is_visible_to_admins_only() {
    let db = PolicyDb::new(employees(), MemoryStore::new());
    seed_employee(&db);

    let staff = Row::new().with("id", 2).with("admin", false);
    let boss = Row::new().with("id", 3).with("admin", true);

    let as_staff = db.session(Some(staff)).read("Employee", &Query::all()).expect("read");
    assert_eq!(as_staff.len(), 1);
    assert!(!as_staff[0].contains_key("salary"));
    assert_eq!(as_staff[0].value("name"), Value::from("ann"));

    let as_boss = db.session(Some(boss)).read("Employee", &Query::all()).expect("read");
    assert_eq!(as_boss[0].value("salary"), Value::Int(9000));

    let anonymous = db.session(None).read("Employee", &Query::all()).expect("read");
    assert!(!anonymous[0].contains_key("salary"));
}

#[test]
fn salary_can_be_nulled_instead_of_removed() {
    let config = EnforcerConfig::from_toml_str("[policy]\nredaction = \"null\"\n").expect("config");
    let db = PolicyDb::new(employees(), MemoryStore::new()).with_config(config);
    seed_employee(&db);

    let row = db
        .session(None)
        .read_unique("Employee", &Row::new().with("id", 1))
        .expect("read")
        .expect("visible");

    assert!(row.contains_key("salary"));
    assert_eq!(row.value("salary"), Value::Null);
}

// ---- self promotion ----

fn users() -> Schema {
    Schema::builder()
        .entity(
            keyed("User")
                .field(FieldModel::new("email", FieldKind::Text).optional())
                .field(
                    FieldModel::new("role", FieldKind::enumeration(["user", "admin"]))
                        .default_value("user"),
                )
                .rule(PolicyRule::allow(OperationSet::ALL, lit(true)))
                .rule(PolicyRule::deny(
                    Operation::Update,
                    future("role").eq(lit("admin")) & auth_field("role").ne(lit("admin")),
                )),
        )
        .build()
        .expect("user schema")
}

#[test]
fn only_admins_may_grant_admin() {
    let db = PolicyDb::new(users(), MemoryStore::new());
    db.session(None)
        .create("User", &WriteData::new().set("id", 1))
        .expect("seed user");
    let me = Row::new().with("id", 1).with("role", "user");
    let root = Row::new().with("id", 9).with("role", "admin");
    let selector = Row::new().with("id", 1);

    let err = denied(
        db.session(Some(me.clone()))
            .update("User", &selector, &WriteData::new().set("role", "admin")),
    );
    assert_eq!(err.reason, DenyReason::PostCheck);
    assert_eq!(err.operation, Operation::Update);

    // other updates by the same user pass
    let updated = db
        .session(Some(me))
        .update("User", &selector, &WriteData::new().set("email", "me@example.com"))
        .expect("update")
        .expect("readable");
    assert_eq!(updated.value("role"), Value::from("user"));

    let promoted = db
        .session(Some(root))
        .update("User", &selector, &WriteData::new().set("role", "admin"))
        .expect("update")
        .expect("readable");
    assert_eq!(promoted.value("role"), Value::from("admin"));
}

// ---- delegate assets ----

fn assets() -> Schema {
    let write = OperationSet::from([Operation::Create, Operation::Update, Operation::Delete]);

    Schema::builder()
        .entity(
            keyed("Asset")
                .delegate("assetType")
                .field(FieldModel::new("ownerId", FieldKind::Int))
                .field(FieldModel::new("published", FieldKind::Bool).default_value(false))
                .field(FieldModel::new("assetType", FieldKind::Text))
                .rule(PolicyRule::allow(Operation::Read, field("published").eq(lit(true))))
                .rule(PolicyRule::allow(write, auth_field("id").eq(field("ownerId")))),
        )
        .entity(
            EntityModel::new("Video")
                .extends("Asset")
                .field(FieldModel::new("duration", FieldKind::Int))
                .rule(PolicyRule::deny(Operation::Read, field("duration").gt(lit(100)))),
        )
        .entity(
            EntityModel::new("Image")
                .extends("Asset")
                .field(FieldModel::new("format", FieldKind::Text)),
        )
        .build()
        .expect("asset schema")
}

#[test]
fn base_queries_apply_each_subtype_guard() {
    let db = PolicyDb::new(assets(), MemoryStore::new());
    let owner = db.session(Some(Row::new().with("id", 1)));
    let video = |id: i64, duration: i64| {
        WriteData::new()
            .set("id", id)
            .set("ownerId", 1)
            .set("published", true)
            .set("duration", duration)
    };

    owner.create("Video", &video(1, 30)).expect("short video");
    owner.create("Video", &video(2, 300)).expect("long video");
    owner
        .create(
            "Image",
            &WriteData::new()
                .set("id", 3)
                .set("ownerId", 1)
                .set("published", true)
                .set("format", "png"),
        )
        .expect("image");

    let anonymous = db.session(None);
    let base = anonymous.read("Asset", &Query::all()).expect("read base");
    assert_eq!(ids(&base), vec![1, 3]);
    assert_eq!(base[0].value("assetType"), Value::from("Video"));
    assert_eq!(base[1].value("assetType"), Value::from("Image"));

    let videos = anonymous.read("Video", &Query::all()).expect("read videos");
    assert_eq!(ids(&videos), vec![1]);

    // the discriminator is engine-managed
    let err = owner
        .update("Video", &Row::new().with("id", 1), &WriteData::new().set("assetType", "Image"))
        .unwrap_err();
    assert!(matches!(err, Error::Structural(_)));
}

// ---- satisfiability ----

fn documents() -> Schema {
    Schema::builder()
        .entity(
            keyed("Doc")
                .field(FieldModel::new("access", FieldKind::Text).optional())
                .rule(PolicyRule::allow(
                    OperationSet::ALL,
                    call(Function::Contains, [auth_field("access"), current_operation()]),
                )),
        )
        .build()
        .expect("doc schema")
}

#[test]
fn check_answers_without_writing() {
    let db = PolicyDb::new(documents(), MemoryStore::new());
    let user = Row::new().with("id", 3).with("access", "aUser");
    let reader = Row::new().with("id", 1).with("access", "read");
    let writer = Row::new().with("id", 2).with("access", "read,create");

    // function calls are opaque to the checker, so every principal passes
    for principal in [&user, &reader, &writer] {
        let possible = db
            .session(Some(principal.clone()))
            .check("Doc", Operation::Create, &Row::new().with("access", "aUser"))
            .expect("check");
        assert!(possible);
    }
    assert_eq!(db.store().row_count("Doc"), 0);

    let err = denied(
        db.session(Some(reader.clone()))
            .create("Doc", &WriteData::new().set("id", 1)),
    );
    assert_eq!(err.reason, DenyReason::Row);

    let created = db
        .session(Some(writer))
        .create("Doc", &WriteData::new().set("id", 1))
        .expect("create");
    assert!(created.is_some());
    assert_eq!(db.store().row_count("Doc"), 1);

    // "read" contains the read operation name
    let visible = db.session(Some(reader)).read("Doc", &Query::all()).expect("read");
    assert_eq!(ids(&visible), vec![1]);
}

#[test]
fn check_rules_out_impossible_rows() {
    let db = PolicyDb::new(posts(), MemoryStore::new());
    let session = db.session(None);

    assert!(session.check("Post", Operation::Read, &Row::new()).expect("check"));
    assert!(
        !session
            .check("Post", Operation::Read, &Row::new().with("published", false))
            .expect("check")
    );
    assert!(!session.check("Post", Operation::Delete, &Row::new()).expect("check"));
}

#[test]
fn facade_reports_the_workspace_version() {
    assert!(!warden::VERSION.is_empty());
}
