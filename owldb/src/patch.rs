//! The patch evaluator. A patch request is a JSON array of operations,
//! each `{op, path, value}` with a JSON Pointer path. Three operations
//! exist: `ObjectAdd` inserts a key if absent, `ArrayAdd` appends a
//! value if absent, `ArrayRemove` removes a value that must be present.

use common::error::DbError;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct PatchOperation {
	pub op: String,
	pub path: String,
	#[serde(default)]
	pub value: Value,
}

/// Applies a JSON-encoded operation list to `doc`, returning the new
/// document. The input is untouched on any failure.
pub fn apply(doc: &Value, raw_patches: &[u8]) -> Result<Value, DbError> {
	let patches: Vec<PatchOperation> = serde_json::from_slice(raw_patches)
		.map_err(|err| DbError::BadRequest(format!("malformed patch list: {err}")))?;
	for p in &patches {
		if p.op != "ObjectAdd" && p.op != "ArrayAdd" && p.op != "ArrayRemove" {
			return Err(DbError::BadRequest(format!("bad patch operation: {}", p.op)));
		}
	}
	let mut out = doc.clone();
	for p in &patches {
		apply_one(&mut out, p)?;
	}
	Ok(out)
}

fn apply_one(doc: &mut Value, p: &PatchOperation) -> Result<(), DbError> {
	match p.op.as_str() {
		"ObjectAdd" => object_add(doc, p),
		"ArrayAdd" => array_add(doc, p),
		"ArrayRemove" => array_remove(doc, p),
		other => Err(DbError::BadRequest(format!("bad patch operation: {other}"))),
	}
}

fn object_add(doc: &mut Value, p: &PatchOperation) -> Result<(), DbError> {
	let (parent, key) = split_pointer(&p.path)?;
	let target = doc.pointer_mut(parent).ok_or_else(|| path_missing(&p.path))?;
	match target {
		Value::Object(map) => {
			// An already-present key makes this a no-op.
			if !map.contains_key(&key) {
				map.insert(key, p.value.clone());
			}
			Ok(())
		}
		_ => Err(DbError::BadRequest(format!(
			"error applying patches: path '{}' does not address an object",
			p.path
		))),
	}
}

fn array_add(doc: &mut Value, p: &PatchOperation) -> Result<(), DbError> {
	let target = doc.pointer_mut(&p.path).ok_or_else(|| path_missing(&p.path))?;
	match target {
		Value::Array(items) => {
			if !items.iter().any(|v| v == &p.value) {
				items.push(p.value.clone());
			}
			Ok(())
		}
		_ => Err(DbError::BadRequest(format!(
			"error applying patches: path '{}' ends in an object, expected array",
			p.path
		))),
	}
}

fn array_remove(doc: &mut Value, p: &PatchOperation) -> Result<(), DbError> {
	let target = doc.pointer_mut(&p.path).ok_or_else(|| path_missing(&p.path))?;
	match target {
		Value::Array(items) => {
			let before = items.len();
			items.retain(|v| v != &p.value);
			if items.len() == before {
				return Err(DbError::BadRequest(format!(
					"Value not found in array at path '{}'",
					p.path
				)));
			}
			Ok(())
		}
		_ => Err(DbError::BadRequest(format!(
			"error applying patches: path '{}' ends in an object, expected array",
			p.path
		))),
	}
}

fn path_missing(path: &str) -> DbError {
	DbError::BadRequest(format!(
		"error applying patches: path '{path}' does not exist in the document"
	))
}

/// Splits a JSON Pointer into its parent pointer and unescaped final
/// token.
fn split_pointer(path: &str) -> Result<(&str, String), DbError> {
	let idx = match path.rfind('/') {
		Some(idx) if path.starts_with('/') => idx,
		_ => {
			return Err(DbError::BadRequest(format!("invalid JSON pointer: '{path}'")));
		}
	};
	let token = path[idx + 1..].replace("~1", "/").replace("~0", "~");
	if token.is_empty() {
		return Err(DbError::BadRequest(format!(
			"invalid JSON pointer: '{path}' names no key"
		)));
	}
	Ok((&path[..idx], token))
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn patch(doc: Value, ops: Value) -> Result<Value, DbError> {
		apply(&doc, ops.to_string().as_bytes())
	}

	#[test]
	fn object_add_inserts_missing_key() {
		let out = patch(
			json!({"a": 1}),
			json!([{ "op": "ObjectAdd", "path": "/b", "value": 2 }]),
		)
		.unwrap();
		assert_eq!(out, json!({"a": 1, "b": 2}));
	}

	#[test]
	fn object_add_present_key_is_noop() {
		let out = patch(
			json!({"a": 1}),
			json!([{ "op": "ObjectAdd", "path": "/a", "value": 99 }]),
		)
		.unwrap();
		assert_eq!(out, json!({"a": 1}));
	}

	#[test]
	fn object_add_nested() {
		let out = patch(
			json!({"outer": {"inner": {}}}),
			json!([{ "op": "ObjectAdd", "path": "/outer/inner/x", "value": true }]),
		)
		.unwrap();
		assert_eq!(out, json!({"outer": {"inner": {"x": true}}}));
	}

	#[test]
	fn array_add_appends_absent_value() {
		let out = patch(
			json!({"friends": []}),
			json!([{ "op": "ArrayAdd", "path": "/friends", "value": "neyida" }]),
		)
		.unwrap();
		assert_eq!(out, json!({"friends": ["neyida"]}));
	}

	#[test]
	fn array_add_present_value_is_noop() {
		let out = patch(
			json!({"friends": ["neyida"]}),
			json!([{ "op": "ArrayAdd", "path": "/friends", "value": "neyida" }]),
		)
		.unwrap();
		assert_eq!(out, json!({"friends": ["neyida"]}));
	}

	#[test]
	fn array_remove_drops_value() {
		let out = patch(
			json!({"friends": ["a", "b"]}),
			json!([{ "op": "ArrayRemove", "path": "/friends", "value": "a" }]),
		)
		.unwrap();
		assert_eq!(out, json!({"friends": ["b"]}));
	}

	#[test]
	fn array_remove_missing_value_fails() {
		let err = patch(
			json!({"friends": ["a"]}),
			json!([{ "op": "ArrayRemove", "path": "/friends", "value": "zz" }]),
		)
		.unwrap_err();
		assert!(err.message().contains("Value not found in array"));
	}

	#[test]
	fn unknown_op_is_rejected() {
		let err = patch(
			json!({}),
			json!([{ "op": "ObjectRemove", "path": "/a", "value": 1 }]),
		)
		.unwrap_err();
		assert_eq!(err.message(), "bad patch operation: ObjectRemove");
	}

	#[test]
	fn missing_path_is_reported() {
		let err = patch(
			json!({"a": {}}),
			json!([{ "op": "ArrayAdd", "path": "/nope", "value": 1 }]),
		)
		.unwrap_err();
		assert!(err.message().contains("'/nope' does not exist"));
	}

	#[test]
	fn array_op_on_object_is_rejected() {
		let err = patch(
			json!({"a": {}}),
			json!([{ "op": "ArrayAdd", "path": "/a", "value": 1 }]),
		)
		.unwrap_err();
		assert!(err.message().contains("expected array"));
	}

	#[test]
	fn escaped_pointer_tokens() {
		let out = patch(
			json!({"weird~key": {}}),
			json!([{ "op": "ObjectAdd", "path": "/weird~0key/a~1b", "value": 5 }]),
		)
		.unwrap();
		assert_eq!(out, json!({"weird~key": {"a/b": 5}}));
	}

	#[test]
	fn operations_apply_in_order() {
		let out = patch(
			json!({"xs": []}),
			json!([
				{ "op": "ArrayAdd", "path": "/xs", "value": 1 },
				{ "op": "ArrayAdd", "path": "/xs", "value": 2 },
				{ "op": "ArrayRemove", "path": "/xs", "value": 1 }
			]),
		)
		.unwrap();
		assert_eq!(out, json!({"xs": [2]}));
	}

	#[test]
	fn failure_midway_surfaces_error() {
		let err = patch(
			json!({"xs": []}),
			json!([
				{ "op": "ArrayAdd", "path": "/xs", "value": 1 },
				{ "op": "ArrayRemove", "path": "/xs", "value": 9 }
			]),
		)
		.unwrap_err();
		assert!(err.message().contains("Value not found in array"));
	}
}
