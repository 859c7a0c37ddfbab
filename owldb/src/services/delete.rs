use common::error::DbError;
use log::info;

use super::DatabaseIndex;

pub struct Delete {
	dbs: DatabaseIndex,
}

impl Delete {
	pub fn new(dbs: DatabaseIndex) -> Self {
		Self { dbs }
	}

	/// Removing a database implicitly drops its whole tree; its
	/// top-level subscribers get one final delete event for "/".
	pub fn database(&self, name: &str) -> Result<(), DbError> {
		let removed = self
			.dbs
			.remove(&name.to_string())
			.ok_or_else(|| DbError::NotFound("Database does not exist".into()))?;
		info!("Database '{name}' deleted.");
		removed.notify_deleted();
		Ok(())
	}

	pub fn collection(&self, db_name: &str, colpath: &str) -> Result<(), DbError> {
		let db = self
			.dbs
			.find(&db_name.to_string())
			.ok_or_else(|| DbError::NotFound("Database does not exist".into()))?;
		db.delete_collection(colpath)
	}

	pub fn document(&self, db_name: &str, docpath: &str) -> Result<(), DbError> {
		let db = self
			.dbs
			.find(&db_name.to_string())
			.ok_or_else(|| DbError::NotFound("Database does not exist".into()))?;
		db.delete_document(docpath)
	}
}
