use common::error::DbError;
use common::index::SkipList;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use super::Document;
use crate::subs::ColRegistry;

/// A named container of documents, owned by a document or directly by a
/// database.
pub struct Collection {
	name: String,
	pub docs: SkipList<String, Arc<Document>>,
	pub subs: ColRegistry,
}

impl Collection {
	pub fn new(name: &str) -> Self {
		Self {
			name: name.to_string(),
			docs: SkipList::for_names(),
			subs: ColRegistry::new(),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// JSON array of every member document with name in `[lo, hi]`, in
	/// lexicographic order. A scan that cannot finish before `deadline`
	/// surfaces as a timeout, which clients see as a bad request.
	pub fn serialize_range(&self, deadline: Instant, lo: &str, hi: &str) -> Result<Value, DbError> {
		let members = self.docs.query(deadline, &lo.to_string(), &hi.to_string())?;
		Ok(Value::Array(
			members.into_iter().map(|(_, d)| d.serialize()).collect(),
		))
	}
}
