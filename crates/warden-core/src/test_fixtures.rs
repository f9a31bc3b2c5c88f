//! Shared schemas for unit tests.

use crate::{
    expr::{self, Function, auth, auth_field, field, future, lit},
    model::{EntityModel, FieldKind, FieldModel, ReferentialAction, RelationModel, Schema},
    policy::{Operation, OperationSet, PolicyRule, ValidationRule},
    value::Row,
};

const WRITE: [Operation; 3] = [Operation::Create, Operation::Update, Operation::Delete];

/// Users, their posts and the posts' comments.
///
/// - users are readable by any signed-in principal; only the user itself
///   sees its email, and only an admin may promote anyone to admin
/// - posts are readable when published or by their author
/// - comments follow the readability of their post
pub(crate) fn blog() -> Schema {
    Schema::builder()
        .entity(user())
        .entity(post())
        .entity(comment())
        .build()
        .expect("blog schema")
}

pub(crate) fn user() -> EntityModel {
    EntityModel::new("User")
        .primary_key(["id"])
        .field(FieldModel::new("id", FieldKind::Int))
        .field(FieldModel::new("email", FieldKind::Text))
        .field(FieldModel::new("role", FieldKind::enumeration(["user", "admin"])).default_value("user"))
        .relation(RelationModel::has_many("posts", "Post", "authorId", "id"))
        .rule(PolicyRule::allow(Operation::Create, lit(true)))
        .rule(PolicyRule::allow(Operation::Read, auth().ne(expr::null())))
        .rule(PolicyRule::allow(Operation::Read, auth_field("id").eq(field("id"))).on_field("email"))
        .rule(PolicyRule::allow(
            [Operation::Update, Operation::Delete],
            auth_field("id").eq(field("id")),
        ))
        .rule(PolicyRule::allow(Operation::Delete, auth_field("role").eq(lit("admin"))))
        .rule(
            PolicyRule::deny(
                Operation::Update,
                future("role")
                    .eq(lit("admin"))
                    .and(auth_field("role").ne(lit("admin"))),
            )
            .named("no self promotion"),
        )
}

pub(crate) fn post() -> EntityModel {
    EntityModel::new("Post")
        .primary_key(["id"])
        .field(FieldModel::new("id", FieldKind::Int).auto_increment())
        .field(FieldModel::new("title", FieldKind::Text))
        .field(FieldModel::new("published", FieldKind::Bool).default_value(false))
        .field(FieldModel::new("authorId", FieldKind::Int).optional())
        .relation(
            RelationModel::belongs_to("author", "User", "authorId", "id")
                .on_delete(ReferentialAction::Cascade),
        )
        .relation(RelationModel::has_many("comments", "Comment", "postId", "id"))
        .rule(PolicyRule::allow(Operation::Read, field("published").eq(lit(true))))
        .rule(PolicyRule::allow(Operation::Read, auth_field("id").eq(field("authorId"))))
        .rule(PolicyRule::allow(WRITE, auth_field("id").eq(field("authorId"))))
        .validate(
            ValidationRule::new(expr::call(Function::Length, [field("title"), lit(1)]))
                .on_field("title")
                .message("title required"),
        )
}

pub(crate) fn comment() -> EntityModel {
    EntityModel::new("Comment")
        .primary_key(["id"])
        .field(FieldModel::new("id", FieldKind::Int).auto_increment())
        .field(FieldModel::new("body", FieldKind::Text))
        .field(FieldModel::new("postId", FieldKind::Int))
        .relation(
            RelationModel::belongs_to("post", "Post", "postId", "id")
                .on_delete(ReferentialAction::Cascade),
        )
        .rule(PolicyRule::allow(
            OperationSet::from([Operation::Read, Operation::Create]),
            expr::check("post", Some(Operation::Read)),
        ))
        .rule(PolicyRule::allow(
            [Operation::Update, Operation::Delete],
            auth().ne(expr::null()),
        ))
}

/// Delegate base `Asset` stored as `Video` or `Image`. Long videos are
/// never readable.
pub(crate) fn assets() -> Schema {
    Schema::builder()
        .entity(
            EntityModel::new("Asset")
                .primary_key(["id"])
                .delegate("assetType")
                .field(FieldModel::new("id", FieldKind::Int))
                .field(FieldModel::new("ownerId", FieldKind::Int))
                .field(FieldModel::new("published", FieldKind::Bool).default_value(false))
                .field(FieldModel::new("assetType", FieldKind::Text))
                .rule(PolicyRule::allow(Operation::Read, field("published").eq(lit(true))))
                .rule(PolicyRule::allow(Operation::Read, auth_field("id").eq(field("ownerId"))))
                .rule(PolicyRule::allow(WRITE, auth_field("id").eq(field("ownerId")))),
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

pub(crate) fn principal(id: i64) -> Row {
    Row::new().with("id", id).with("role", "user")
}

pub(crate) fn admin(id: i64) -> Row {
    Row::new().with("id", id).with("role", "admin")
}
