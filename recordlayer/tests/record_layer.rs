use std::sync::Arc;

use bson::{Bson, doc};
use recordlayer::{memory::MemoryDriver, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::json;

fn person_schema() -> Arc<Schema> {
    SchemaDefinition::builder()
        .field("name", FieldRule::new(TypeTag::String).required())
        .field("age", FieldRule::new(TypeTag::Integer).with_default(0))
        .build()
        .into()
}

async fn people() -> RecordLayer {
    let driver = MemoryDriver::builder()
        .collection("people")
        .build()
        .await
        .unwrap();

    let layer = RecordLayer::with_schema(driver, person_schema()).await.unwrap();
    layer.connect().await.unwrap();
    layer
}

#[tokio::test]
async fn insert_fills_defaults_before_storing() {
    let people = people().await;

    let alice = people.set(doc! { "name": "Alice" }).await.unwrap();

    assert_eq!(alice.get_str("name").unwrap(), "Alice");
    assert_eq!(alice.get_i32("age").unwrap(), 0);
    assert!(alice.contains_key("_id"));
    assert!(alice.contains_key("_createdAt"));
}

#[tokio::test]
async fn insert_rejects_missing_required_field() {
    let people = people().await;

    let err = people.set(doc! { "age": 5 }).await.unwrap_err();

    match err {
        RecordStoreError::Validation(violation) => {
            assert_eq!(violation.field(), "name");
            assert_eq!(violation.rule(), ViolatedRule::Required);
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert_eq!(people.count(doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn insert_rejects_wrong_type() {
    let people = people().await;

    let err = people.set(doc! { "name": "Bob", "age": 2.5 }).await.unwrap_err();

    match err {
        RecordStoreError::Validation(violation) => {
            assert_eq!(violation.field(), "age");
            assert_eq!(violation.rule(), ViolatedRule::Type(TypeTag::Integer));
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn update_validates_patch_partially() {
    let people = people().await;
    people.set(doc! { "name": "Alice" }).await.unwrap();

    // No required-field error and no default injected for a partial patch.
    let touched = people
        .update(doc! { "name": "Alice" }, doc! { "age": 31 })
        .await
        .unwrap();
    assert_eq!(touched, 1);

    let alice = people.get_one(doc! { "name": "Alice" }).await.unwrap().unwrap();
    assert_eq!(alice.get_i32("age").unwrap(), 31);
    assert!(alice.contains_key("_updatedAt"));

    let err = people
        .update(doc! { "name": "Alice" }, doc! { "age": "old" })
        .await
        .unwrap_err();
    assert!(matches!(err, RecordStoreError::Validation(ValidationError::TypeMismatch { .. })));
}

#[tokio::test]
async fn unknown_fields_pass_through() {
    let people = people().await;

    let stored = people
        .set(doc! { "name": "Alice", "nickname": "Al", "tags": ["admin"] })
        .await
        .unwrap();

    assert_eq!(stored.get_str("nickname").unwrap(), "Al");
    assert_eq!(stored.get_array("tags").unwrap(), &vec![Bson::from("admin")]);
}

#[tokio::test]
async fn nested_filters_select_matching_records() {
    let driver = MemoryDriver::builder().collection("points").build().await.unwrap();
    let points = RecordLayer::new(driver);

    points.set(doc! { "x": 1, "y": { "z": 2 } }).await.unwrap();
    points.set(doc! { "x": 1, "y": { "z": 3 } }).await.unwrap();

    let found = points.get(doc! { "x": 1, "y": { "z": 2 } }).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get_document("y").unwrap(), &doc! { "z": 2 });

    assert_eq!(points.count(doc! {}).await.unwrap(), 2);
    assert!(points.exists(Filter::new().eq("y", doc! { "z": 3 })).await.unwrap());
    assert_eq!(points.delete(doc! { "x": 1 }).await.unwrap(), 2);
    assert!(!points.exists(doc! {}).await.unwrap());
}

#[tokio::test]
async fn schema_can_be_replaced_and_removed() {
    let people = people().await;
    people.set(doc! { "name": "Alice" }).await.unwrap();

    let email_required =
        Schema::from_json(json!({ "email": { "type": "email", "required": true } })).unwrap();
    people.set_schema(email_required).await.unwrap();

    assert!(people.set(doc! { "name": "Bob" }).await.is_err());
    assert!(people.set(doc! { "email": "bob@example.com" }).await.is_ok());
    // Records stored under the old schema are left alone.
    assert!(people.exists(doc! { "name": "Alice" }).await.unwrap());

    people.clear_schema().await.unwrap();
    assert!(people.schema().await.is_none());
    assert!(people.set(doc! { "anything": Bson::Null }).await.is_ok());
}

#[tokio::test]
async fn table_inherits_or_overrides_schema() {
    let people = people().await;
    people.set(doc! { "name": "Alice" }).await.unwrap();

    let staff = people.table("staff", None).await.unwrap();
    assert_eq!(staff.collection(), "staff");
    assert_eq!(staff.is_connected(), Some(true));
    assert!(staff.set(doc! { "age": 40 }).await.is_err());

    let staff_schema: Arc<Schema> = SchemaDefinition::builder()
        .field("badge", FieldRule::new(TypeTag::Uuid).required())
        .build()
        .into();
    let badges = people.table("badges", Some(staff_schema)).await.unwrap();
    assert!(badges.set(doc! { "name": "Alice" }).await.is_err());
    assert!(
        badges
            .set(doc! { "badge": "123e4567-e89b-12d3-a456-426614174000" })
            .await
            .is_ok()
    );

    // Siblings share storage but not records.
    assert_eq!(people.count(doc! {}).await.unwrap(), 1);
    assert_eq!(badges.count(doc! {}).await.unwrap(), 1);
    assert_eq!(staff.count(doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn clear_empties_only_the_bound_collection() {
    let people = people().await;
    let pets = people.table("pets", None).await.unwrap();

    people.set(doc! { "name": "Alice" }).await.unwrap();
    pets.set(doc! { "name": "Rex" }).await.unwrap();

    people.clear().await.unwrap();

    assert_eq!(people.count(doc! {}).await.unwrap(), 0);
    assert_eq!(pets.count(doc! {}).await.unwrap(), 1);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Person {
    name: String,
    age: i32,
}

#[tokio::test]
async fn typed_values_round_through_the_layer() {
    let people = people().await;

    let alice = Person { name: "Alice".to_string(), age: 30 };
    people.set_typed(&alice).await.unwrap();
    people.set(doc! { "name": "Bob" }).await.unwrap();

    let mut found = people.get_typed::<Person>(doc! {}).await.unwrap();
    found.sort_by(|a, b| a.name.cmp(&b.name));

    assert_eq!(
        found,
        vec![alice, Person { name: "Bob".to_string(), age: 0 }]
    );
}

#[tokio::test]
async fn layer_without_schema_stores_anything() {
    let driver = MemoryDriver::builder().build().await.unwrap();
    let layer = RecordLayer::new(driver);

    assert_eq!(layer.collection(), "default");
    assert!(layer.schema().await.is_none());

    let stored = layer.set(doc! { "age": "not a number" }).await.unwrap();
    assert_eq!(stored.get_str("age").unwrap(), "not a number");
}
