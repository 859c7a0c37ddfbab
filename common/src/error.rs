use axum::response::IntoResponse;
use hyper::{header, StatusCode};

/**
 * Describes a handled error, carrying the message clients will see.
 *
 * Every recoverable failure travels through this type; nothing in the
 * core panics across a component boundary.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbError {
	/// Referenced database, document or collection does not exist.
	NotFound(String),
	/// Malformed path, parameter, body or patch.
	BadRequest(String),
	/// Duplicate create of a database or collection. Served as 400 for
	/// wire compatibility, not 409.
	Conflict(String),
	/// PUT with mode=nooverwrite on an existing document.
	PreconditionFailed(String),
	/// Missing, malformed, unknown or expired bearer token.
	Unauthorized(String),
	/// A range scan could not finish before its deadline.
	Timeout,
	Internal(String),
}

impl DbError {
	pub fn status(&self) -> StatusCode {
		match self {
			DbError::NotFound(_) => StatusCode::NOT_FOUND,
			DbError::BadRequest(_) | DbError::Conflict(_) | DbError::Timeout => StatusCode::BAD_REQUEST,
			DbError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
			DbError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
			DbError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	pub fn message(&self) -> &str {
		match self {
			DbError::NotFound(m)
			| DbError::BadRequest(m)
			| DbError::Conflict(m)
			| DbError::PreconditionFailed(m)
			| DbError::Unauthorized(m)
			| DbError::Internal(m) => m,
			DbError::Timeout => "the request timed out",
		}
	}
}

impl std::fmt::Display for DbError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.message())
	}
}

impl std::error::Error for DbError {}

impl IntoResponse for DbError {
	fn into_response(self) -> axum::response::Response {
		(
			self.status(),
			[
				(header::CONTENT_TYPE, "application/json"),
				(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
			],
			serde_json::to_string(self.message()).unwrap(),
		)
			.into_response()
	}
}
