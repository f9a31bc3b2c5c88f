use crate::value::{
    CompareOp, ListOp, Row, StorageKey, TextOp, Value, compare_eq, compare_order, eval_compare,
    eval_list, eval_text,
};
use proptest::prelude::*;
use std::cmp::Ordering;

// ---- helpers -----------------------------------------------------------

fn v_txt(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn v_list(items: &[i64]) -> Value {
    Value::List(items.iter().copied().map(Value::Int).collect())
}

// ---- compare -----------------------------------------------------------

#[test]
fn int_and_float_compare_numerically() {
    assert!(compare_eq(&Value::Int(3), &Value::Float(3.0)));
    assert_eq!(
        compare_order(&Value::Int(2), &Value::Float(2.5)),
        Some(Ordering::Less)
    );
}

#[test]
fn ordering_against_null_is_false() {
    for op in [CompareOp::Lt, CompareOp::Lte, CompareOp::Gt, CompareOp::Gte] {
        assert!(!eval_compare(op, &Value::Null, &Value::Int(1)));
        assert!(!eval_compare(op, &Value::Int(1), &Value::Null));
    }
}

#[test]
fn null_equality_is_structural() {
    assert!(eval_compare(CompareOp::Eq, &Value::Null, &Value::Null));
    assert!(eval_compare(CompareOp::Ne, &Value::Int(1), &Value::Null));
    assert!(!eval_compare(CompareOp::Eq, &Value::Int(1), &Value::Null));
}

#[test]
fn mismatched_kinds_are_unordered() {
    assert_eq!(compare_order(&v_txt("a"), &Value::Int(1)), None);
    assert!(!eval_compare(CompareOp::Lt, &v_txt("a"), &Value::Int(1)));
}

#[test]
fn membership_requires_list_operand() {
    assert!(eval_compare(CompareOp::In, &Value::Int(2), &v_list(&[1, 2])));
    assert!(!eval_compare(CompareOp::In, &Value::Int(2), &Value::Int(2)));
    assert!(eval_compare(CompareOp::NotIn, &Value::Int(5), &v_list(&[1, 2])));
    assert!(!eval_compare(CompareOp::NotIn, &Value::Int(5), &Value::Null));
}

#[test]
fn flip_mirrors_ordering_operators() {
    assert_eq!(CompareOp::Lt.flip(), Some(CompareOp::Gt));
    assert_eq!(CompareOp::Gte.flip(), Some(CompareOp::Lte));
    assert_eq!(CompareOp::In.flip(), None);
}

#[test]
fn text_ops_respect_case_mode() {
    assert_eq!(
        eval_text(TextOp::Contains, &v_txt("Hello"), &v_txt("ell"), false),
        Some(true)
    );
    assert_eq!(
        eval_text(TextOp::StartsWith, &v_txt("Hello"), &v_txt("he"), false),
        Some(false)
    );
    assert_eq!(
        eval_text(TextOp::StartsWith, &v_txt("Hello"), &v_txt("he"), true),
        Some(true)
    );
    assert_eq!(
        eval_text(TextOp::EndsWith, &Value::Null, &v_txt("x"), false),
        None
    );
}

#[test]
fn list_ops_cover_every_some_and_empty() {
    let list = v_list(&[1, 2, 3]);

    assert_eq!(eval_list(ListOp::Has, &list, &Value::Int(2)), Some(true));
    assert_eq!(eval_list(ListOp::HasEvery, &list, &v_list(&[1, 3])), Some(true));
    assert_eq!(eval_list(ListOp::HasEvery, &list, &v_list(&[1, 4])), Some(false));
    assert_eq!(eval_list(ListOp::HasSome, &list, &v_list(&[9, 3])), Some(true));
    assert_eq!(eval_list(ListOp::IsEmpty, &v_list(&[]), &Value::Null), Some(true));
    assert_eq!(eval_list(ListOp::Has, &Value::Null, &Value::Int(1)), None);
}

// ---- value -------------------------------------------------------------

#[test]
fn member_path_walks_nested_records() {
    let inner = Row::new().with("role", "admin");
    let outer = Value::from(Row::new().with("profile", Value::from(inner)));

    assert_eq!(
        outer.member_path(&["profile".to_string(), "role".to_string()]),
        v_txt("admin")
    );
    assert_eq!(outer.member_path(&["missing".to_string()]), Value::Null);
    assert_eq!(Value::Null.member_path(&["x".to_string()]), Value::Null);
}

#[test]
fn only_true_is_truthy() {
    assert!(Value::Bool(true).is_true());
    assert!(!Value::Bool(false).is_true());
    assert!(!Value::Null.is_true());
    assert!(!Value::Int(1).is_true());
}

#[test]
fn json_maps_onto_natural_variants() {
    let value: Value = serde_json::from_str(r#"{"a": [1, 2.5, "x", null, true]}"#)
        .expect("json value should parse");

    let Value::Record(fields) = value else {
        panic!("expected record");
    };
    assert_eq!(
        fields.get("a"),
        Some(&Value::List(vec![
            Value::Int(1),
            Value::Float(2.5),
            v_txt("x"),
            Value::Null,
            Value::Bool(true),
        ]))
    );
}

// ---- row ---------------------------------------------------------------

#[test]
fn missing_row_field_reads_as_null() {
    let row = Row::new().with("id", 1);
    assert_eq!(row.value("id"), Value::Int(1));
    assert_eq!(row.value("title"), Value::Null);
}

#[test]
fn project_keeps_only_requested_fields() {
    let row = Row::new().with("id", 1).with("title", "t").with("body", "b");
    let projected = row.project(["id", "body"]);

    assert_eq!(projected.len(), 2);
    assert!(!projected.contains_key("title"));
}

#[test]
fn storage_key_rejects_null_columns() {
    let cols = vec!["id".to_string()];
    assert!(StorageKey::from_row(&cols, &Row::new().with("id", Value::Null)).is_none());
    assert!(StorageKey::from_row(&cols, &Row::new()).is_none());
}

#[test]
fn storage_key_escapes_separators() {
    let cols = vec!["a".to_string(), "b".to_string()];
    let left = StorageKey::from_row(&cols, &Row::new().with("a", "x|y").with("b", "z"));
    let right = StorageKey::from_row(&cols, &Row::new().with("a", "x").with("b", "y|z"));

    assert_ne!(left, right);
}

proptest! {
    #[test]
    fn eq_and_ne_are_complementary(a in -50i64..50, b in -50i64..50) {
        let (a, b) = (Value::Int(a), Value::Float(b as f64));
        prop_assert_ne!(
            eval_compare(CompareOp::Eq, &a, &b),
            eval_compare(CompareOp::Ne, &a, &b)
        );
    }

    #[test]
    fn flipped_ordering_agrees(a in -50i64..50, b in -50i64..50) {
        let (a, b) = (Value::Int(a), Value::Int(b));
        for op in [CompareOp::Lt, CompareOp::Lte, CompareOp::Gt, CompareOp::Gte] {
            let flipped = op.flip().expect("ordering ops flip");
            prop_assert_eq!(eval_compare(op, &a, &b), eval_compare(flipped, &b, &a));
        }
    }

    #[test]
    fn storage_key_is_injective_for_ints(a in any::<i64>(), b in any::<i64>()) {
        let cols = vec!["id".to_string()];
        let ka = StorageKey::from_row(&cols, &Row::new().with("id", a));
        let kb = StorageKey::from_row(&cols, &Row::new().with("id", b));
        prop_assert_eq!(ka == kb, a == b);
    }
}
