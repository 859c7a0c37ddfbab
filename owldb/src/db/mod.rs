//! The resource tree. A database owns its top-level documents; every
//! level below is delegated to the addressed top document.

use common::error::DbError;
use common::event::EventKind;
use common::index::SkipList;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::schema::SchemaValidator;
use crate::subs::{ColRegistry, Messager, SubGuard, Subscription};

pub mod collection;
pub mod document;

#[cfg(test)]
mod tests;

pub use collection::Collection;
pub use document::{Created, Document, Meta};

/// How long a collection read may scan its index.
pub(crate) const SERIALIZE_DEADLINE: Duration = Duration::from_secs(10);
/// How long gathering a new subscriber's initial events may take.
pub(crate) const INITIAL_EVENTS_DEADLINE: Duration = Duration::from_secs(15);

/// Process-wide collaborators, threaded into every tree node.
pub struct Shared {
	pub validator: SchemaValidator,
	pub messager: Messager,
}

/// Outcome of a document or collection read.
pub enum GetResult {
	Plain(Value),
	Stream { snapshot: Value, sub: Subscription },
}

impl std::fmt::Debug for GetResult {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			GetResult::Plain(v) => f.debug_tuple("Plain").field(v).finish(),
			GetResult::Stream { snapshot, .. } => {
				f.debug_struct("Stream").field("snapshot", snapshot).finish_non_exhaustive()
			}
		}
	}
}

pub(crate) fn doc_missing() -> DbError {
	DbError::NotFound("Document does not exist".into())
}

pub(crate) fn col_missing() -> DbError {
	DbError::NotFound("Collection does not exist".into())
}

/// The key a document's subscribers are registered under in the
/// messager.
pub(crate) fn sub_uri(db_name: &str, docpath: &str) -> String {
	format!("{db_name}/{docpath}")
}

pub(crate) fn serialized_bytes(value: &Value) -> Vec<u8> {
	serde_json::to_vec(value).unwrap()
}

pub struct Database {
	name: String,
	docs: SkipList<String, Arc<Document>>,
	subs: ColRegistry,
	shared: Arc<Shared>,
}

impl Database {
	pub fn new(name: &str, shared: Arc<Shared>) -> Self {
		Self {
			name: name.to_string(),
			docs: SkipList::for_names(),
			subs: ColRegistry::new(),
			shared,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// PUT/POST of a document at `docpath`. A single-segment path is a
	/// top-level document handled here; anything deeper is delegated.
	pub fn upload_document(
		&self,
		docpath: &str,
		body: Value,
		user: &str,
		overwrite: bool,
		is_post: bool,
	) -> Result<Created, DbError> {
		let segments: Vec<&str> = docpath.split('/').collect();
		if segments.len() == 1 {
			return self.upload_top(docpath, body, user, overwrite, is_post);
		}
		let top = self.docs.find(&segments[0].to_string()).ok_or_else(doc_missing)?;
		top.add_child_document(docpath, body, user, overwrite, is_post, &self.name)
	}

	fn upload_top(
		&self,
		docname: &str,
		body: Value,
		user: &str,
		overwrite: bool,
		is_post: bool,
	) -> Result<Created, DbError> {
		let new_doc = Arc::new(Document::new(body.clone(), user, docname, self.shared.clone()));
		let uri = sub_uri(&self.name, docname);
		let mut overwrote = false;
		self.docs.upsert(docname.to_string(), |key, current, _| match current {
			None => {
				let payload = serialized_bytes(&new_doc.serialize());
				self.subs.notify(key, EventKind::Update, &payload);
				self.shared.messager.notify(&uri, EventKind::Update, &payload);
				Ok(new_doc.clone())
			}
			// A name collision on a server-assigned POST is an ordinary
			// conflict, not a failed precondition.
			Some(_) if !overwrite && is_post => {
				Err(DbError::Conflict("document already exists".into()))
			}
			Some(_) if !overwrite => {
				Err(DbError::PreconditionFailed("document already exists".into()))
			}
			Some(existing) => {
				overwrote = true;
				existing.update_body(body.clone(), user);
				let payload = serialized_bytes(&existing.serialize());
				self.subs.notify(key, EventKind::Update, &payload);
				self.shared.messager.notify(&uri, EventKind::Update, &payload);
				Ok(existing.clone())
			}
		})?;
		Ok(Created {
			uri: format!("/v1/{}/{}", self.name, docname),
			overwrote,
		})
	}

	pub fn get_document(&self, docpath: &str, subscribe: bool) -> Result<GetResult, DbError> {
		let segments: Vec<&str> = docpath.split('/').collect();
		let top = self.docs.find(&segments[0].to_string()).ok_or_else(doc_missing)?;
		top.get_child_document(docpath, subscribe, &self.name)
	}

	pub fn delete_document(&self, docpath: &str) -> Result<(), DbError> {
		let segments: Vec<&str> = docpath.split('/').collect();
		if segments.len() == 1 {
			return self.delete_top(docpath);
		}
		let top = self.docs.find(&segments[0].to_string()).ok_or_else(doc_missing)?;
		top.delete_child_document(docpath, &self.name)
	}

	fn delete_top(&self, docname: &str) -> Result<(), DbError> {
		self.docs.remove(&docname.to_string()).ok_or_else(doc_missing)?;
		let payload = serialized_bytes(&json!(format!("/{docname}")));
		self.shared
			.messager
			.notify(&sub_uri(&self.name, docname), EventKind::Delete, &payload);
		self.subs.notify(docname, EventKind::Delete, &payload);
		Ok(())
	}

	/// GET of a collection. An empty path addresses the database's own
	/// top-level collection.
	pub fn get_collection(
		&self,
		colpath: &str,
		lo: &str,
		hi: &str,
		subscribe: bool,
	) -> Result<GetResult, DbError> {
		if colpath.is_empty() {
			return self.get_top_collection(lo, hi, subscribe);
		}
		let segments: Vec<&str> = colpath.split('/').collect();
		let top = self.docs.find(&segments[0].to_string()).ok_or_else(col_missing)?;
		top.get_child_collection(colpath, lo, hi, subscribe)
	}

	fn get_top_collection(&self, lo: &str, hi: &str, subscribe: bool) -> Result<GetResult, DbError> {
		let members = self.docs.query(
			Instant::now() + SERIALIZE_DEADLINE,
			&lo.to_string(),
			&hi.to_string(),
		)?;
		let snapshot = Value::Array(members.iter().map(|(_, d)| d.serialize()).collect());
		if !subscribe {
			return Ok(GetResult::Plain(snapshot));
		}
		let (id, rx) = self.subs.add(lo, hi);
		let initial = members
			.iter()
			.map(|(_, d)| {
				common::event::frame(EventKind::Update, &serialized_bytes(&d.serialize()))
			})
			.collect();
		Ok(GetResult::Stream {
			snapshot,
			sub: Subscription {
				id,
				rx,
				initial,
				guard: SubGuard::Col(self.subs.clone()),
			},
		})
	}

	pub fn upload_collection(&self, colpath: &str) -> Result<Created, DbError> {
		let segments: Vec<&str> = colpath.split('/').collect();
		let top = self.docs.find(&segments[0].to_string()).ok_or_else(col_missing)?;
		top.add_child_collection(colpath, &self.name)
	}

	pub fn delete_collection(&self, colpath: &str) -> Result<(), DbError> {
		let segments: Vec<&str> = colpath.split('/').collect();
		let top = self.docs.find(&segments[0].to_string()).ok_or_else(col_missing)?;
		top.delete_child_collection(colpath)
	}

	pub fn patch_document(&self, docpath: &str, patches: &[u8], user: &str) -> Result<Value, DbError> {
		let segments: Vec<&str> = docpath.split('/').collect();
		let top = self.docs.find(&segments[0].to_string()).ok_or_else(doc_missing)?;
		if segments.len() == 1 {
			return self.patch_top(docpath, patches, user);
		}
		top.apply_patch(&self.name, docpath, patches, user)
	}

	fn patch_top(&self, docname: &str, patches: &[u8], user: &str) -> Result<Value, DbError> {
		let uri = sub_uri(&self.name, docname);
		self.docs.upsert(docname.to_string(), |key, current, _| {
			let doc = current.ok_or_else(doc_missing)?;
			let new_body = crate::patch::apply(&doc.body(), patches)?;
			self.shared.validator.validate(&new_body)?;
			doc.update_body(new_body, user);
			let payload = serialized_bytes(&doc.serialize());
			self.subs.notify(key, EventKind::Update, &payload);
			self.shared.messager.notify(&uri, EventKind::Update, &payload);
			Ok(doc.clone())
		})?;
		Ok(document::patch_response(&self.name, docname, false, "patch applied"))
	}

	/// Broadcast the database's own deletion to every subscriber of its
	/// top-level collection.
	pub fn notify_deleted(&self) {
		self.subs.notify_all(&serialized_bytes(&json!("/")));
	}
}
