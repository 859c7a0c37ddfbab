use common::error::DbError;
use jsonschema::JSONSchema;
use serde_json::Value;
use std::path::Path;

/// The startup JSON Schema every stored document body must satisfy.
pub struct SchemaValidator {
	schema: JSONSchema,
}

impl SchemaValidator {
	pub fn from_file(path: &Path) -> Result<Self, String> {
		let raw = std::fs::read_to_string(path)
			.map_err(|err| format!("reading schema '{}': {err}", path.display()))?;
		let value: Value = serde_json::from_str(&raw)
			.map_err(|err| format!("parsing schema '{}': {err}", path.display()))?;
		Self::from_value(&value)
	}

	pub fn from_value(schema: &Value) -> Result<Self, String> {
		let schema = JSONSchema::compile(schema).map_err(|err| format!("compiling schema: {err}"))?;
		Ok(Self { schema })
	}

	pub fn validate(&self, doc: &Value) -> Result<(), DbError> {
		if let Err(errors) = self.schema.validate(doc) {
			let reason = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
			return Err(DbError::BadRequest(format!(
				"document does not conform to schema: {reason}"
			)));
		}
		Ok(())
	}
}
