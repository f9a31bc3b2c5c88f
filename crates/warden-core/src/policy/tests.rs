use crate::{
    expr::{field, lit},
    policy::{Effect, Operation, OperationSet, PolicyRepository, PolicyRule, ValidationRule},
    test_fixtures,
};
use proptest::prelude::*;

// ---- operations ----

#[test]
fn operation_sets_parse_lists_and_all() {
    assert_eq!(OperationSet::parse("all"), Ok(OperationSet::ALL));
    assert_eq!(
        OperationSet::parse("create, read"),
        Ok(OperationSet::from([Operation::Create, Operation::Read]))
    );
    assert_eq!(OperationSet::parse(""), Ok(OperationSet::EMPTY));
    assert!(OperationSet::parse("create,upsert").is_err());
}

#[test]
fn operation_sets_display_and_serialize_as_lists() {
    let set = OperationSet::only(Operation::Update).with(Operation::Delete);
    assert_eq!(set.to_string(), "update,delete");
    assert_eq!(OperationSet::ALL.to_string(), "all");

    assert_eq!(serde_json::to_string(&set).expect("serialize"), r#"["update","delete"]"#);
    let parsed: OperationSet = serde_json::from_str(r#""all""#).expect("deserialize");
    assert_eq!(parsed, OperationSet::ALL);
}

#[test]
fn only_update_and_delete_see_the_post_image() {
    let with_post: Vec<_> = Operation::ALL.into_iter().filter(|op| op.has_prospective()).collect();
    assert_eq!(with_post, vec![Operation::Update, Operation::Delete]);
}

// ---- rules ----

#[test]
fn rule_labels_prefer_names() {
    let named = PolicyRule::deny(Operation::Update, lit(true)).named("frozen");
    assert_eq!(named.label(), "deny 'frozen'");

    let anonymous = PolicyRule::allow(Operation::Read, field("published").eq(lit(true)));
    assert_eq!(anonymous.label(), "allow(read, (published == true))");
    assert_eq!(anonymous.effect, Effect::Allow);
}

#[test]
fn validation_messages_fall_back_to_the_condition() {
    let rule = ValidationRule::new(field("age").gte(lit(18)));
    assert_eq!(rule.describe(), "condition (age >= 18) failed");
    assert_eq!(rule.message("too young").describe(), "too young");
}

// ---- repository ----

#[test]
fn repository_merges_inherited_rules_root_first() {
    let schema = test_fixtures::assets();
    let repo = PolicyRepository::new(&schema);
    let video = schema.entity("Video").expect("video");

    let read = repo.row_rules(video, Operation::Read);
    assert_eq!(read.len(), 3);
    assert!(read[0].is_allow());
    assert!(!read[2].is_allow());

    assert!(repo.has_allow(video, Operation::Delete));
    assert_eq!(repo.all_rules(video).count(), 4);
}

#[test]
fn repository_groups_field_rules() {
    let schema = test_fixtures::blog();
    let repo = PolicyRepository::new(&schema);
    let user = schema.entity("User").expect("user");

    let read = repo.field_rules(user, Operation::Read);
    assert_eq!(read.keys().copied().collect::<Vec<_>>(), vec!["email"]);
    assert!(repo.field_rules(user, Operation::Update).is_empty());

    // field rules never leak into the row guard
    assert!(repo.row_rules(user, Operation::Read).iter().all(|r| r.field.is_none()));

    let post = schema.entity("Post").expect("post");
    assert_eq!(repo.validation_rules(post).len(), 1);
}

proptest! {
    #[test]
    fn operation_set_membership(bits in 0u8..16) {
        let ops: Vec<Operation> = Operation::ALL
            .into_iter()
            .enumerate()
            .filter(|(i, _)| bits & (1 << i) != 0)
            .map(|(_, op)| op)
            .collect();
        let set: OperationSet = ops.iter().copied().collect();

        for op in Operation::ALL {
            prop_assert_eq!(set.contains(op), ops.contains(&op));
        }
        prop_assert_eq!(OperationSet::parse(&set.to_string()), Ok(set));
    }
}
