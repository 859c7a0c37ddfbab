use common::error::DbError;
use common::event::{frame, EventKind};
use common::index::SkipList;
use common::utils::get_millis;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use super::{
	col_missing, doc_missing, serialized_bytes, sub_uri, Collection, GetResult, Shared,
	INITIAL_EVENTS_DEADLINE, SERIALIZE_DEADLINE,
};
use crate::patch;
use crate::subs::{SubGuard, Subscription};

/// Who touched a document and when, in milliseconds since epoch.
/// `created_at` never changes after admission.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
	pub created_by: String,
	pub created_at: i64,
	pub last_modified_by: String,
	pub last_modified_at: i64,
}

impl Meta {
	fn new(user: &str) -> Self {
		let now = get_millis();
		Self {
			created_by: user.to_string(),
			created_at: now,
			last_modified_by: user.to_string(),
			last_modified_at: now,
		}
	}
}

struct DocState {
	body: Value,
	meta: Meta,
}

/// Result of a create or overwrite, carrying the resource URI for the
/// Location header.
#[derive(Debug)]
pub struct Created {
	pub uri: String,
	pub overwrote: bool,
}

/**
 * One stored JSON document plus the collections nested under it.
 *
 * The body and metadata sit behind a lock, but every mutation flows
 * through an `upsert` check callback on the owning index, which is what
 * actually serializes writers per key.
 */
pub struct Document {
	path: String,
	state: RwLock<DocState>,
	collections: SkipList<String, Arc<Collection>>,
	shared: Arc<Shared>,
}

impl Document {
	pub fn new(body: Value, user: &str, docpath: &str, shared: Arc<Shared>) -> Self {
		Self {
			path: format!("/{docpath}"),
			state: RwLock::new(DocState {
				body,
				meta: Meta::new(user),
			}),
			collections: SkipList::for_names(),
			shared,
		}
	}

	pub fn path(&self) -> &str {
		&self.path
	}

	pub fn body(&self) -> Value {
		self.state.read().unwrap().body.clone()
	}

	pub fn meta(&self) -> Meta {
		self.state.read().unwrap().meta.clone()
	}

	/// The canonical `{path, doc, meta}` wire object.
	pub fn serialize(&self) -> Value {
		let state = self.state.read().unwrap();
		json!({
			"path": self.path,
			"doc": state.body,
			"meta": state.meta,
		})
	}

	/// Replaces the body and advances the modification metadata. Only
	/// call from inside an `upsert` check callback on the owning index.
	pub fn update_body(&self, body: Value, user: &str) {
		let mut state = self.state.write().unwrap();
		state.body = body;
		state.meta.last_modified_by = user.to_string();
		state.meta.last_modified_at = get_millis();
	}

	/// Walks alternating collection/document segments starting at this
	/// document; the first segment names this document itself.
	fn traverse(self: &Arc<Self>, segments: &[&str]) -> Option<Arc<Document>> {
		let mut current = self.clone();
		let mut idx = 1;
		while idx + 1 < segments.len() {
			let col = current.collections.find(&segments[idx].to_string())?;
			current = col.docs.find(&segments[idx + 1].to_string())?;
			idx += 2;
		}
		Some(current)
	}

	/// PUT/POST of a document somewhere below this one. `docpath` is the
	/// full path from the database root, ending in the new document's
	/// name.
	pub fn add_child_document(
		self: &Arc<Self>,
		docpath: &str,
		body: Value,
		user: &str,
		overwrite: bool,
		is_post: bool,
		db_name: &str,
	) -> Result<Created, DbError> {
		let segments: Vec<&str> = docpath.split('/').collect();
		if segments.len() < 3 {
			return Err(col_missing());
		}
		let name = segments[segments.len() - 1];
		let parent_col_name = segments[segments.len() - 2];
		let parent = self
			.traverse(&segments[..segments.len() - 2])
			.ok_or_else(col_missing)?;
		let col = parent
			.collections
			.find(&parent_col_name.to_string())
			.ok_or_else(col_missing)?;

		let new_doc = Arc::new(Document::new(body.clone(), user, docpath, self.shared.clone()));
		let uri = sub_uri(db_name, docpath);
		let mut overwrote = false;
		col.docs.upsert(name.to_string(), |key, current, _| match current {
			None => {
				let payload = serialized_bytes(&new_doc.serialize());
				if !is_post {
					self.shared.messager.notify(&uri, EventKind::Update, &payload);
				}
				col.subs.notify(key, EventKind::Update, &payload);
				Ok(new_doc.clone())
			}
			Some(_) if !overwrite => {
				Err(DbError::PreconditionFailed("document already exists".into()))
			}
			Some(existing) => {
				overwrote = true;
				existing.update_body(body.clone(), user);
				let payload = serialized_bytes(&existing.serialize());
				self.shared.messager.notify(&uri, EventKind::Update, &payload);
				col.subs.notify(key, EventKind::Update, &payload);
				Ok(existing.clone())
			}
		})?;
		Ok(Created {
			uri: format!("/v1/{db_name}/{docpath}"),
			overwrote,
		})
	}

	/// PUT of an empty collection below this document.
	pub fn add_child_collection(
		self: &Arc<Self>,
		colpath: &str,
		db_name: &str,
	) -> Result<Created, DbError> {
		let trimmed = colpath.trim_end_matches('/');
		let segments: Vec<&str> = trimmed.split('/').collect();
		if segments.len() < 2 {
			return Err(col_missing());
		}
		let name = segments[segments.len() - 1];
		let parent = self
			.traverse(&segments[..segments.len() - 1])
			.ok_or_else(col_missing)?;
		let new_col = Arc::new(Collection::new(name));
		parent.collections.upsert(name.to_string(), |_, _, exists| {
			if exists {
				return Err(DbError::Conflict("collection already exists".into()));
			}
			Ok(new_col.clone())
		})?;
		Ok(Created {
			uri: format!("/v1/{db_name}/{trimmed}/"),
			overwrote: false,
		})
	}

	pub fn get_child_document(
		self: &Arc<Self>,
		docpath: &str,
		subscribe: bool,
		db_name: &str,
	) -> Result<GetResult, DbError> {
		let segments: Vec<&str> = docpath.split('/').collect();
		let doc = self.traverse(&segments).ok_or_else(doc_missing)?;
		let snapshot = doc.serialize();
		if !subscribe {
			return Ok(GetResult::Plain(snapshot));
		}
		let opened = self.shared.messager.subscribe(&sub_uri(db_name, docpath));
		let initial = vec![frame(EventKind::Update, &serialized_bytes(&snapshot))];
		Ok(GetResult::Stream {
			snapshot,
			sub: Subscription {
				id: opened.id,
				rx: opened.rx,
				initial,
				guard: SubGuard::Doc(opened.registry),
			},
		})
	}

	pub fn get_child_collection(
		self: &Arc<Self>,
		colpath: &str,
		lo: &str,
		hi: &str,
		subscribe: bool,
	) -> Result<GetResult, DbError> {
		let trimmed = colpath.trim_end_matches('/');
		let segments: Vec<&str> = trimmed.split('/').collect();
		if segments.len() < 2 {
			return Err(col_missing());
		}
		let name = segments[segments.len() - 1];
		let parent = self
			.traverse(&segments[..segments.len() - 1])
			.ok_or_else(col_missing)?;
		let col = parent
			.collections
			.find(&name.to_string())
			.ok_or_else(col_missing)?;
		let snapshot = col.serialize_range(Instant::now() + SERIALIZE_DEADLINE, lo, hi)?;
		if !subscribe {
			return Ok(GetResult::Plain(snapshot));
		}
		let (id, rx) = col.subs.add(lo, hi);
		let members = col
			.docs
			.query(
				Instant::now() + INITIAL_EVENTS_DEADLINE,
				&lo.to_string(),
				&hi.to_string(),
			)
			.unwrap_or_default();
		let initial = members
			.iter()
			.map(|(_, d)| frame(EventKind::Update, &serialized_bytes(&d.serialize())))
			.collect();
		Ok(GetResult::Stream {
			snapshot,
			sub: Subscription {
				id,
				rx,
				initial,
				guard: SubGuard::Col(col.subs.clone()),
			},
		})
	}

	pub fn delete_child_document(
		self: &Arc<Self>,
		docpath: &str,
		db_name: &str,
	) -> Result<(), DbError> {
		let segments: Vec<&str> = docpath.split('/').collect();
		if segments.len() < 3 {
			return Err(doc_missing());
		}
		let victim = segments[segments.len() - 1];
		let parent_col_name = segments[segments.len() - 2];
		let parent = self
			.traverse(&segments[..segments.len() - 2])
			.ok_or_else(doc_missing)?;
		let col = parent
			.collections
			.find(&parent_col_name.to_string())
			.ok_or_else(doc_missing)?;
		col.docs.remove(&victim.to_string()).ok_or_else(doc_missing)?;
		let payload = serialized_bytes(&json!(format!("/{docpath}")));
		self.shared
			.messager
			.notify(&sub_uri(db_name, docpath), EventKind::Delete, &payload);
		col.subs.notify(victim, EventKind::Delete, &payload);
		Ok(())
	}

	pub fn delete_child_collection(self: &Arc<Self>, colpath: &str) -> Result<(), DbError> {
		let trimmed = colpath.trim_end_matches('/');
		let segments: Vec<&str> = trimmed.split('/').collect();
		if segments.len() < 2 {
			return Err(col_missing());
		}
		let name = segments[segments.len() - 1];
		let parent = self
			.traverse(&segments[..segments.len() - 1])
			.ok_or_else(|| DbError::NotFound("Owning document does not exist".into()))?;
		let removed = parent
			.collections
			.remove(&name.to_string())
			.ok_or_else(col_missing)?;
		removed
			.subs
			.notify_all(&serialized_bytes(&json!(format!("/{trimmed}"))));
		Ok(())
	}

	/// PATCH of a document below this one. The whole
	/// read-patch-validate-install sequence runs inside the owning
	/// index's check callback, so concurrent patches to one document
	/// serialize and never interleave.
	pub fn apply_patch(
		self: &Arc<Self>,
		db_name: &str,
		docpath: &str,
		patches: &[u8],
		user: &str,
	) -> Result<Value, DbError> {
		let segments: Vec<&str> = docpath.split('/').collect();
		if segments.len() < 3 {
			return Err(DbError::NotFound("document at that path does not exist".into()));
		}
		let name = segments[segments.len() - 1];
		let parent_col_name = segments[segments.len() - 2];
		let parent = self
			.traverse(&segments[..segments.len() - 2])
			.ok_or_else(|| DbError::NotFound("document at that path does not exist".into()))?;
		let col = parent
			.collections
			.find(&parent_col_name.to_string())
			.ok_or_else(|| DbError::NotFound("owning collection does not exist".into()))?;

		let uri = sub_uri(db_name, docpath);
		col.docs.upsert(name.to_string(), |key, current, _| {
			let doc = current.ok_or_else(doc_missing)?;
			let new_body = patch::apply(&doc.body(), patches)?;
			self.shared.validator.validate(&new_body)?;
			doc.update_body(new_body, user);
			let payload = serialized_bytes(&doc.serialize());
			col.subs.notify(key, EventKind::Update, &payload);
			self.shared.messager.notify(&uri, EventKind::Update, &payload);
			Ok(doc.clone())
		})?;
		Ok(patch_response(db_name, docpath, false, "patch applied"))
	}
}

/// The patch wire response. The status message rides under a key
/// literally named "string"; kept that way for wire compatibility.
pub fn patch_response(db_name: &str, docpath: &str, patch_failed: bool, msg: &str) -> Value {
	json!({
		"uri": format!("/v1/{db_name}/{docpath}"),
		"patchFailed": patch_failed,
		"string": msg,
	})
}
