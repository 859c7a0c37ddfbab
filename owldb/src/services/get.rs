use common::error::DbError;

use super::DatabaseIndex;
use crate::db::GetResult;

pub struct Get {
	dbs: DatabaseIndex,
}

impl Get {
	pub fn new(dbs: DatabaseIndex) -> Self {
		Self { dbs }
	}

	pub fn document(&self, db_name: &str, docpath: &str, subscribe: bool) -> Result<GetResult, DbError> {
		let db = self
			.dbs
			.find(&db_name.to_string())
			.ok_or_else(|| DbError::NotFound("Database does not exist".into()))?;
		db.get_document(docpath, subscribe)
	}

	pub fn collection(
		&self,
		db_name: &str,
		colpath: &str,
		lo: &str,
		hi: &str,
		subscribe: bool,
	) -> Result<GetResult, DbError> {
		let db = self
			.dbs
			.find(&db_name.to_string())
			.ok_or_else(|| DbError::NotFound("Database does not exist".into()))?;
		db.get_collection(colpath, lo, hi, subscribe)
	}
}
