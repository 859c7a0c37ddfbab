use common::error::DbError;
use common::utils::gen_resource_id;
use log::debug;
use serde_json::Value;
use std::sync::Arc;

use super::DatabaseIndex;
use crate::db::{Created, Database, Shared};

pub struct Create {
	dbs: DatabaseIndex,
	shared: Arc<Shared>,
}

impl Create {
	pub fn new(dbs: DatabaseIndex, shared: Arc<Shared>) -> Self {
		Self { dbs, shared }
	}

	pub fn create_database(&self, name: &str) -> Result<Created, DbError> {
		self.dbs.upsert(name.to_string(), |key, _, exists| {
			if exists {
				return Err(DbError::Conflict("database with that name exists".into()));
			}
			Ok(Arc::new(Database::new(key, self.shared.clone())))
		})?;
		Ok(Created {
			uri: format!("/v1/{name}"),
			overwrote: false,
		})
	}

	pub fn put_collection(&self, db_name: &str, colpath: &str) -> Result<Created, DbError> {
		let db = self.find_database(db_name)?;
		db.upload_collection(colpath)
	}

	pub fn put_document(
		&self,
		db_name: &str,
		docpath: &str,
		body: Value,
		overwrite: bool,
		user: &str,
	) -> Result<Created, DbError> {
		let db = self.find_database(db_name)?;
		self.shared.validator.validate(&body)?;
		db.upload_document(docpath, body, user, overwrite, false)
	}

	/// POST: a document with a server-assigned name in the addressed
	/// collection.
	pub fn post_document(
		&self,
		db_name: &str,
		colpath: &str,
		user: &str,
		body: Value,
	) -> Result<Created, DbError> {
		let trimmed = colpath.trim_end_matches('/');
		let db = self.find_database(db_name)?;
		self.shared.validator.validate(&body)?;
		let name = gen_resource_id();
		let docpath = if trimmed.is_empty() {
			name
		} else {
			format!("{trimmed}/{name}")
		};
		debug!("Posting generated document '{docpath}'");
		db.upload_document(&docpath, body, user, false, true)
	}

	fn find_database(&self, name: &str) -> Result<Arc<Database>, DbError> {
		self.dbs
			.find(&name.to_string())
			.ok_or_else(|| DbError::NotFound("Database does not exist".into()))
	}
}
