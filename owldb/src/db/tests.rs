use common::error::DbError;
use common::index::SkipList;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{Database, GetResult, Shared};
use crate::schema::SchemaValidator;
use crate::services::{Create, DatabaseIndex, Delete};
use crate::subs::Messager;

fn shared() -> Arc<Shared> {
	shared_with_schema(json!({ "type": "object" }))
}

fn shared_with_schema(schema: Value) -> Arc<Shared> {
	Arc::new(Shared {
		validator: SchemaValidator::from_value(&schema).unwrap(),
		messager: Messager::new(),
	})
}

fn plain(result: GetResult) -> Value {
	match result {
		GetResult::Plain(v) => v,
		GetResult::Stream { .. } => panic!("expected a plain response"),
	}
}

fn stream(result: GetResult) -> crate::subs::Subscription {
	match result {
		GetResult::Stream { sub, .. } => sub,
		GetResult::Plain(_) => panic!("expected a stream"),
	}
}

const FULL: (&str, &str) = ("\u{0}", "\u{7f}");

#[test]
fn put_then_get_roundtrips_the_body() {
	let db = Database::new("db24", shared());
	db.upload_document("b", json!({"key": "hello1"}), "mira", true, false)
		.unwrap();
	let out = plain(db.get_document("b", false).unwrap());
	assert_eq!(out["doc"], json!({"key": "hello1"}));
	assert_eq!(out["path"], json!("/b"));
	assert_eq!(out["meta"]["createdBy"], json!("mira"));
}

#[test]
fn nooverwrite_on_existing_document_is_a_precondition_failure() {
	let db = Database::new("db24", shared());
	db.upload_document("b", json!({}), "mira", false, false).unwrap();
	let err = db
		.upload_document("b", json!({"x": 1}), "mira", false, false)
		.unwrap_err();
	assert!(matches!(err, DbError::PreconditionFailed(_)));
	// The refused write changed nothing.
	let out = plain(db.get_document("b", false).unwrap());
	assert_eq!(out["doc"], json!({}));
}

#[test]
fn top_level_post_collision_is_a_conflict_not_a_precondition() {
	let db = Database::new("db24", shared());
	db.upload_document("b", json!({}), "mira", true, false).unwrap();
	assert!(matches!(
		db.upload_document("b", json!({}), "mira", false, true)
			.unwrap_err(),
		DbError::Conflict(_)
	));
	assert!(matches!(
		db.upload_document("b", json!({}), "mira", false, false)
			.unwrap_err(),
		DbError::PreconditionFailed(_)
	));
}

#[test]
fn overwrite_keeps_created_and_advances_modified() {
	let db = Database::new("db24", shared());
	let first = db
		.upload_document("b", json!({"v": 1}), "mira", true, false)
		.unwrap();
	assert!(!first.overwrote);
	let before = plain(db.get_document("b", false).unwrap());

	let second = db
		.upload_document("b", json!({"v": 2}), "noa", true, false)
		.unwrap();
	assert!(second.overwrote);
	let after = plain(db.get_document("b", false).unwrap());

	assert_eq!(after["doc"], json!({"v": 2}));
	assert_eq!(after["meta"]["createdBy"], json!("mira"));
	assert_eq!(after["meta"]["createdAt"], before["meta"]["createdAt"]);
	assert_eq!(after["meta"]["lastModifiedBy"], json!("noa"));
	assert!(
		after["meta"]["lastModifiedAt"].as_i64().unwrap()
			>= before["meta"]["lastModifiedAt"].as_i64().unwrap()
	);
}

#[test]
fn nested_collection_range_query() {
	let db = Database::new("db24", shared());
	db.upload_document("b", json!({}), "mira", true, false).unwrap();
	db.upload_collection("b/c").unwrap();
	for name in ["b", "c", "d", "e", "f", "g", "h"] {
		db.upload_document(&format!("b/c/{name}"), json!({"n": name}), "mira", true, false)
			.unwrap();
	}
	let out = plain(db.get_collection("b/c", "f", "h", false).unwrap());
	let members = out.as_array().unwrap();
	assert_eq!(members.len(), 3);
	let paths: Vec<&str> = members.iter().map(|m| m["path"].as_str().unwrap()).collect();
	assert_eq!(paths, vec!["/b/c/f", "/b/c/g", "/b/c/h"]);
}

#[test]
fn duplicate_collection_is_a_conflict() {
	let db = Database::new("db24", shared());
	db.upload_document("b", json!({}), "mira", true, false).unwrap();
	db.upload_collection("b/c").unwrap();
	assert!(matches!(
		db.upload_collection("b/c").unwrap_err(),
		DbError::Conflict(_)
	));
}

#[test]
fn missing_parents_are_not_found() {
	let db = Database::new("db24", shared());
	assert!(matches!(
		db.upload_document("ghost/c/x", json!({}), "mira", true, false)
			.unwrap_err(),
		DbError::NotFound(_)
	));
	db.upload_document("b", json!({}), "mira", true, false).unwrap();
	assert!(matches!(
		db.upload_document("b/nocol/x", json!({}), "mira", true, false)
			.unwrap_err(),
		DbError::NotFound(_)
	));
	assert!(matches!(
		db.get_document("b/nocol/x", false).unwrap_err(),
		DbError::NotFound(_)
	));
}

#[test]
fn deep_nesting_roundtrip() {
	let db = Database::new("deep", shared());
	db.upload_document("a", json!({}), "mira", true, false).unwrap();
	db.upload_collection("a/b").unwrap();
	db.upload_document("a/b/c", json!({}), "mira", true, false).unwrap();
	db.upload_collection("a/b/c/d").unwrap();
	db.upload_document("a/b/c/d/e", json!({"deep": true}), "mira", true, false)
		.unwrap();
	let out = plain(db.get_document("a/b/c/d/e", false).unwrap());
	assert_eq!(out["path"], json!("/a/b/c/d/e"));
	assert_eq!(out["doc"], json!({"deep": true}));
}

#[test]
fn delete_document_then_get_is_not_found() {
	let db = Database::new("db24", shared());
	db.upload_document("b", json!({}), "mira", true, false).unwrap();
	db.delete_document("b").unwrap();
	assert!(matches!(
		db.get_document("b", false).unwrap_err(),
		DbError::NotFound(_)
	));
	// Deleting again reports the absence instead of succeeding.
	assert!(matches!(
		db.delete_document("b").unwrap_err(),
		DbError::NotFound(_)
	));
}

#[test]
fn delete_collection_removes_subtree_access() {
	let db = Database::new("db24", shared());
	db.upload_document("b", json!({}), "mira", true, false).unwrap();
	db.upload_collection("b/c").unwrap();
	db.upload_document("b/c/x", json!({}), "mira", true, false).unwrap();
	db.delete_collection("b/c").unwrap();
	assert!(db.get_collection("b/c", FULL.0, FULL.1, false).is_err());
	assert!(db.get_document("b/c/x", false).is_err());
}

#[test]
fn patch_array_add_shows_up_in_get() {
	let db = Database::new("db24", shared());
	db.upload_document("p", json!({"friends": []}), "mira", true, false)
		.unwrap();
	let patches = json!([{ "op": "ArrayAdd", "path": "/friends", "value": "neyida" }]);
	let resp = db
		.patch_document("p", patches.to_string().as_bytes(), "mira")
		.unwrap();
	assert_eq!(resp["patchFailed"], json!(false));
	assert_eq!(resp["string"], json!("patch applied"));
	assert_eq!(resp["uri"], json!("/v1/db24/p"));
	let out = plain(db.get_document("p", false).unwrap());
	assert_eq!(out["doc"], json!({"friends": ["neyida"]}));
}

#[test]
fn patch_nested_document() {
	let db = Database::new("db24", shared());
	db.upload_document("b", json!({}), "mira", true, false).unwrap();
	db.upload_collection("b/c").unwrap();
	db.upload_document("b/c/p", json!({"tags": ["x"]}), "mira", true, false)
		.unwrap();
	let patches = json!([{ "op": "ArrayAdd", "path": "/tags", "value": "y" }]);
	db.patch_document("b/c/p", patches.to_string().as_bytes(), "noa")
		.unwrap();
	let out = plain(db.get_document("b/c/p", false).unwrap());
	assert_eq!(out["doc"], json!({"tags": ["x", "y"]}));
	assert_eq!(out["meta"]["lastModifiedBy"], json!("noa"));
}

#[test]
fn failed_patch_leaves_document_untouched() {
	let db = Database::new("db24", shared());
	db.upload_document("p", json!({"friends": ["a"]}), "mira", true, false)
		.unwrap();
	let patches = json!([{ "op": "ArrayRemove", "path": "/friends", "value": "zz" }]);
	let err = db
		.patch_document("p", patches.to_string().as_bytes(), "mira")
		.unwrap_err();
	assert!(err.message().contains("Value not found in array"));
	let out = plain(db.get_document("p", false).unwrap());
	assert_eq!(out["doc"], json!({"friends": ["a"]}));
}

#[test]
fn patch_missing_document_is_not_found() {
	let db = Database::new("db24", shared());
	let patches = json!([{ "op": "ObjectAdd", "path": "/a", "value": 1 }]);
	assert!(matches!(
		db.patch_document("ghost", patches.to_string().as_bytes(), "mira")
			.unwrap_err(),
		DbError::NotFound(_)
	));
}

#[test]
fn patch_violating_schema_is_refused() {
	let shared = shared_with_schema(json!({
		"type": "object",
		"properties": { "friends": { "type": "array" } },
		"additionalProperties": false
	}));
	let db = Database::new("db24", shared);
	db.upload_document("p", json!({"friends": []}), "mira", true, false)
		.unwrap();
	let patches = json!([{ "op": "ObjectAdd", "path": "/rogue", "value": 1 }]);
	let err = db
		.patch_document("p", patches.to_string().as_bytes(), "mira")
		.unwrap_err();
	assert!(matches!(err, DbError::BadRequest(_)));
	let out = plain(db.get_document("p", false).unwrap());
	assert_eq!(out["doc"], json!({"friends": []}));
}

#[test]
fn document_subscriber_sees_snapshot_then_update() {
	let db = Database::new("db24", shared());
	db.upload_document("b", json!({"v": 1}), "mira", true, false).unwrap();

	let mut sub = stream(db.get_document("b", true).unwrap());
	assert_eq!(sub.initial.len(), 1);
	let snapshot = String::from_utf8(sub.initial.remove(0)).unwrap();
	assert!(snapshot.contains("event: update"));
	assert!(snapshot.contains(r#""v":1"#));

	db.upload_document("b", json!({"v": 2}), "mira", true, false).unwrap();
	let live = String::from_utf8(sub.rx.try_recv().unwrap()).unwrap();
	assert!(live.contains("event: update"));
	assert!(live.contains(r#""v":2"#));
	// Exactly one frame per overwrite.
	assert!(sub.rx.try_recv().is_err());
}

#[test]
fn document_subscriber_sees_delete() {
	let db = Database::new("db24", shared());
	db.upload_document("b", json!({}), "mira", true, false).unwrap();
	let mut sub = stream(db.get_document("b", true).unwrap());
	db.delete_document("b").unwrap();
	let live = String::from_utf8(sub.rx.try_recv().unwrap()).unwrap();
	assert!(live.contains("event: delete"));
	assert!(live.contains(r#"data: "/b""#));
}

#[test]
fn collection_subscriber_is_range_filtered() {
	let db = Database::new("db24", shared());
	db.upload_document("top", json!({}), "mira", true, false).unwrap();
	db.upload_collection("top/c").unwrap();

	let mut sub = stream(db.get_collection("top/c", "a", "c", true).unwrap());
	assert!(sub.initial.is_empty());

	db.upload_document("top/c/b", json!({}), "mira", true, false).unwrap();
	db.upload_document("top/c/z", json!({}), "mira", true, false).unwrap();

	let ev = String::from_utf8(sub.rx.try_recv().unwrap()).unwrap();
	assert!(ev.contains(r#""path":"/top/c/b""#));
	assert!(sub.rx.try_recv().is_err(), "'z' is outside [a,c]");
}

#[test]
fn collection_subscriber_gets_initial_members_in_range() {
	let db = Database::new("db24", shared());
	db.upload_document("top", json!({}), "mira", true, false).unwrap();
	db.upload_collection("top/c").unwrap();
	for name in ["a", "b", "x"] {
		db.upload_document(&format!("top/c/{name}"), json!({}), "mira", true, false)
			.unwrap();
	}
	let sub = stream(db.get_collection("top/c", "a", "c", true).unwrap());
	assert_eq!(sub.initial.len(), 2);
}

#[test]
fn top_level_collection_read_and_subscribe() {
	let db = Database::new("db24", shared());
	db.upload_document("b", json!({}), "mira", true, false).unwrap();
	let out = plain(db.get_collection("", FULL.0, FULL.1, false).unwrap());
	assert_eq!(out.as_array().unwrap().len(), 1);

	let mut sub = stream(db.get_collection("", FULL.0, FULL.1, true).unwrap());
	assert_eq!(sub.initial.len(), 1);
	db.upload_document("c", json!({}), "mira", true, false).unwrap();
	assert!(sub.rx.try_recv().is_ok());
}

#[test]
fn database_delete_notifies_top_level_subscribers() {
	let dbs: DatabaseIndex = Arc::new(SkipList::for_names());
	let create = Create::new(dbs.clone(), shared());
	let delete = Delete::new(dbs.clone());
	create.create_database("db24").unwrap();

	let db = dbs.find(&"db24".to_string()).unwrap();
	let mut sub = stream(db.get_collection("", FULL.0, FULL.1, true).unwrap());

	delete.database("db24").unwrap();
	let ev = String::from_utf8(sub.rx.try_recv().unwrap()).unwrap();
	assert!(ev.contains("event: delete"));
	assert!(ev.contains(r#"data: "/""#));
	assert!(matches!(
		delete.database("db24").unwrap_err(),
		DbError::NotFound(_)
	));
}

#[test]
fn duplicate_database_is_a_conflict() {
	let dbs: DatabaseIndex = Arc::new(SkipList::for_names());
	let create = Create::new(dbs, shared());
	create.create_database("db24").unwrap();
	assert!(matches!(
		create.create_database("db24").unwrap_err(),
		DbError::Conflict(_)
	));
}

#[test]
fn post_assigns_a_valid_name() {
	let dbs: DatabaseIndex = Arc::new(SkipList::for_names());
	let create = Create::new(dbs.clone(), shared());
	create.create_database("db24").unwrap();
	let created = create
		.post_document("db24", "", "mira", json!({"posted": true}))
		.unwrap();
	let name = created.uri.rsplit('/').next().unwrap();
	assert_eq!(name.len(), 12);
	assert!(name
		.chars()
		.all(|c| c.is_ascii_alphanumeric() || "_-.~".contains(c)));

	let db = dbs.find(&"db24".to_string()).unwrap();
	let out = plain(db.get_document(name, false).unwrap());
	assert_eq!(out["doc"], json!({"posted": true}));
}

#[test]
fn schema_violating_put_is_refused() {
	let dbs: DatabaseIndex = Arc::new(SkipList::for_names());
	let create = Create::new(
		dbs,
		shared_with_schema(json!({ "type": "object", "required": ["key"] })),
	);
	create.create_database("db24").unwrap();
	let err = create
		.put_document("db24", "b", json!({}), true, "mira")
		.unwrap_err();
	assert!(matches!(err, DbError::BadRequest(_)));
}
