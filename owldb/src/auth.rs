//! Bearer-token sessions. Tokens map to sessions on the ordered index,
//! so login, validation and logout ride the same concurrency machinery
//! as every other lookup in the process.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use common::error::DbError;
use common::index::SkipList;
use common::utils::{get_secs, SECS_IN_DAY, SECS_IN_HOUR};
use log::{info, warn};
use rand::RngCore;
use std::collections::HashMap;
use std::path::Path;

/// An authenticated user and when their token stops working.
#[derive(Clone, Debug)]
pub struct Session {
	pub user: String,
	pub expires_at: u64,
}

pub struct Sessions {
	tokens: SkipList<String, Session>,
}

impl Sessions {
	pub fn new() -> Self {
		Self {
			tokens: SkipList::for_names(),
		}
	}

	/// Seeds sessions from a `{user: token}` JSON object file, each
	/// entry valid for a day. A missing or malformed file is logged and
	/// ignored.
	pub fn with_seed_file(path: &Path) -> Self {
		let sessions = Self::new();
		let raw = match std::fs::read_to_string(path) {
			Ok(raw) => raw,
			Err(err) => {
				warn!("Token file '{}' failed to load: {err}", path.display());
				return sessions;
			}
		};
		let seed: HashMap<String, String> = match serde_json::from_str(&raw) {
			Ok(seed) => seed,
			Err(err) => {
				warn!("Malformed token file '{}': {err}", path.display());
				return sessions;
			}
		};
		for (user, token) in seed {
			sessions.tokens.set(
				token,
				Session {
					user,
					expires_at: get_secs() + SECS_IN_DAY,
				},
			);
		}
		sessions
	}

	/// Issues a fresh hour-long session token for `username`.
	pub fn login(&self, username: &str) -> Result<String, DbError> {
		if username.is_empty() {
			return Err(DbError::BadRequest("username is empty".into()));
		}
		let token = generate_token();
		self.tokens.set(
			token.clone(),
			Session {
				user: username.to_string(),
				expires_at: get_secs() + SECS_IN_HOUR,
			},
		);
		info!("Session created for '{username}'.");
		Ok(token)
	}

	/// Resolves a live token to its username.
	pub fn validate(&self, token: &str) -> Result<String, DbError> {
		let session = self
			.tokens
			.find(&token.to_string())
			.ok_or_else(unauthorized)?;
		if get_secs() >= session.expires_at {
			return Err(unauthorized());
		}
		Ok(session.user)
	}

	pub fn logout(&self, token: &str) -> Result<(), DbError> {
		match self.tokens.remove(&token.to_string()) {
			Some(session) => {
				info!("Session for '{}' logged out.", session.user);
				Ok(())
			}
			None => Err(unauthorized()),
		}
	}

	#[cfg(test)]
	fn insert_session(&self, token: &str, session: Session) {
		self.tokens.set(token.to_string(), session);
	}
}

impl Default for Sessions {
	fn default() -> Self {
		Self::new()
	}
}

fn unauthorized() -> DbError {
	DbError::Unauthorized("Missing or invalid bearer token".into())
}

fn generate_token() -> String {
	let mut bytes = [0u8; 14];
	rand::thread_rng().fill_bytes(&mut bytes);
	URL_SAFE_NO_PAD.encode(bytes)
}
