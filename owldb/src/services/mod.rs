//! Thin orchestrators over the database index: locate the database,
//! then hand the operation to the tree.

use common::index::SkipList;
use std::sync::Arc;

use crate::auth::Sessions;
use crate::db::Database;

pub mod create;
pub mod delete;
pub mod get;
pub mod patch;

pub use create::Create;
pub use delete::Delete;
pub use get::Get;
pub use patch::Patch;

/// The top-level index: database name to database.
pub type DatabaseIndex = Arc<SkipList<String, Arc<Database>>>;

/// Everything the HTTP façade needs, bundled for Extension injection.
pub struct Services {
	pub create: Create,
	pub get: Get,
	pub delete: Delete,
	pub patch: Patch,
	pub sessions: Sessions,
}
