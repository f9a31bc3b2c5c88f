use crate::{
    error::StoreError,
    expr::Quantifier,
    filter::LoweredFilter,
    model::JoinColumn,
    store::{Store, TxGuard, memory::MemoryStore},
    value::{Row, StorageKey, Value},
};

// ---- helpers ----

fn key(id: i64) -> StorageKey {
    StorageKey::from_row(&["id".to_string()], &Row::new().with("id", id)).expect("key")
}

fn post(id: i64, title: &str, author: i64) -> Row {
    Row::new()
        .with("id", id)
        .with("title", title)
        .with("authorId", author)
}

fn seeded() -> MemoryStore {
    let store = MemoryStore::new();
    let tx = store.begin().expect("begin");
    tx.insert("User", key(1), Row::new().with("id", 1).with("name", "ann"))
        .expect("insert");
    tx.insert("Post", key(10), post(10, "hello", 1)).expect("insert");
    tx.insert("Post", key(11), post(11, "world", 2)).expect("insert");
    tx.commit().expect("commit");

    store
}

#[test]
fn writes_are_visible_inside_the_transaction_only() {
    let store = seeded();
    let tx = store.begin().expect("begin");
    tx.insert("Post", key(12), post(12, "draft", 1)).expect("insert");

    assert!(tx.get("Post", &key(12)).expect("get").is_some());
    assert_eq!(store.row_count("Post"), 2);

    tx.rollback();
    assert_eq!(store.row_count("Post"), 2);
}

#[test]
fn duplicate_insert_and_missing_update_are_reported() {
    let store = seeded();
    let tx = store.begin().expect("begin");

    let err = tx.insert("Post", key(10), post(10, "again", 1)).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateKey { .. }));

    let err = tx.update("Post", &key(99), post(99, "x", 1)).unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));

    let err = tx.delete("Post", &key(99)).unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[test]
fn delete_then_insert_reuses_the_key() {
    let store = seeded();
    let tx = store.begin().expect("begin");
    tx.delete("Post", &key(10)).expect("delete");
    assert!(tx.get("Post", &key(10)).expect("get").is_none());

    tx.insert("Post", key(10), post(10, "fresh", 1)).expect("insert");
    tx.commit().expect("commit");

    let rows = store.snapshot("Post");
    assert_eq!(rows[0].value("title"), Value::from("fresh"));
}

#[test]
fn find_applies_exists_filters_over_the_overlay() {
    let store = seeded();
    let tx = store.begin().expect("begin");

    // posts whose author exists
    let filter = LoweredFilter::Exists {
        table: "User".to_string(),
        join: vec![JoinColumn {
            local: "authorId".to_string(),
            remote: "id".to_string(),
        }],
        quantifier: Quantifier::Any,
        filter: Box::new(LoweredFilter::True),
    };

    let rows = tx.find("Post", &filter).expect("find");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value("id"), Value::Int(10));

    tx.insert("User", key(2), Row::new().with("id", 2)).expect("insert");
    assert_eq!(tx.find("Post", &filter).expect("find").len(), 2);
}

#[test]
fn concurrent_write_to_a_locked_row_conflicts() {
    let store = seeded();

    let first = store.begin().expect("begin");
    let second = store.begin().expect("begin");

    let row = first.lock("Post", &key(10)).expect("lock").expect("row");
    second
        .update("Post", &key(10), post(10, "second", 1))
        .expect("update");
    second.commit().expect("commit");

    first
        .update("Post", &key(10), row.with("title", "first"))
        .expect("update");
    let err = first.commit().unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));

    assert_eq!(store.snapshot("Post")[0].value("title"), Value::from("second"));
}

#[test]
fn sequences_advance_even_when_rolled_back() {
    let store = MemoryStore::new();

    let tx = store.begin().expect("begin");
    assert_eq!(tx.next_sequence("Post.id").expect("seq"), 1);
    tx.rollback();

    let tx = store.begin().expect("begin");
    assert_eq!(tx.next_sequence("Post.id").expect("seq"), 2);
    assert_eq!(tx.next_sequence("User.id").expect("seq"), 1);
}

#[test]
fn tx_guard_rolls_back_on_drop() {
    let store = seeded();

    {
        let guard = TxGuard::begin(&store).expect("begin");
        guard
            .tx()
            .expect("tx")
            .delete("Post", &key(10))
            .expect("delete");
    }
    assert_eq!(store.row_count("Post"), 2);

    let guard = TxGuard::begin(&store).expect("begin");
    guard
        .tx()
        .expect("tx")
        .delete("Post", &key(10))
        .expect("delete");
    guard.commit().expect("commit");
    assert_eq!(store.row_count("Post"), 1);
}
