use common::error::DbError;
use serde_json::Value;

use super::DatabaseIndex;

pub struct Patch {
	dbs: DatabaseIndex,
}

impl Patch {
	pub fn new(dbs: DatabaseIndex) -> Self {
		Self { dbs }
	}

	pub fn document(
		&self,
		db_name: &str,
		docpath: &str,
		patches: &[u8],
		user: &str,
	) -> Result<Value, DbError> {
		let db = self
			.dbs
			.find(&db_name.to_string())
			.ok_or_else(|| DbError::NotFound("Database does not exist".into()))?;
		db.patch_document(docpath, patches, user)
	}
}
