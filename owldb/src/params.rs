//! Request shape validation: resource paths, query parameters and the
//! interval syntax.

use common::error::DbError;
use common::utils::{KEY_MAX, KEY_MIN};
use hyper::Method;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
	static ref RE_INTERVAL: Regex = Regex::new(r"^(\[|\()[^\[\]()]*,[^\[\]()]*(\]|\))$").unwrap();
	static ref RE_SUBSCRIBE: Regex = Regex::new(r"^(no)?subscribe$").unwrap();
	static ref RE_OVERWRITE: Regex = Regex::new(r"^(no)?overwrite$").unwrap();
}

fn bad_path() -> DbError {
	DbError::BadRequest("bad resource path".into())
}

/// Raw URI check applied to every data route.
pub fn validate_uri(path: &str) -> Result<(), DbError> {
	if path.contains("//") {
		return Err(DbError::BadRequest("Bad Uri: contains //".into()));
	}
	Ok(())
}

/// Splits `<db>[/<resource...>]` into the database name and the rest.
pub fn split_database(resource: &str) -> (&str, &str) {
	match resource.split_once('/') {
		Some((db, rest)) => (db, rest),
		None => (resource, ""),
	}
}

/// Resource names live strictly inside the index sentinels' key space.
pub fn valid_name(name: &str) -> bool {
	!name.is_empty() && name.chars().all(|c| c > '\u{0}' && c < '\u{7f}')
}

/// Document paths alternate doc/col/doc and therefore have an odd
/// number of segments.
pub fn validate_doc_path(docpath: &str) -> Result<(), DbError> {
	if docpath.is_empty() {
		return Err(bad_path());
	}
	let segments: Vec<&str> = docpath.split('/').collect();
	if segments.len() % 2 != 1 || !segments.iter().all(|s| valid_name(s)) {
		return Err(bad_path());
	}
	Ok(())
}

/// Collection paths (already stripped of their trailing slash) have an
/// even number of segments. The empty path addresses a database's
/// top-level collection, legal only where `allow_empty` says so.
pub fn validate_col_path(colpath: &str, allow_empty: bool) -> Result<(), DbError> {
	if colpath.is_empty() {
		return if allow_empty { Ok(()) } else { Err(bad_path()) };
	}
	let segments: Vec<&str> = colpath.split('/').collect();
	if segments.len() % 2 != 0 || !segments.iter().all(|s| valid_name(s)) {
		return Err(bad_path());
	}
	Ok(())
}

/// The request-shape gate the façade runs before it even looks at the
/// bearer token: the raw URI first, then doc/collection parity for the
/// verb. A malformed path is a bad request no matter what the
/// Authorization header says.
pub fn validate_shape(method: &Method, path: &str) -> Result<(), DbError> {
	validate_uri(path)?;
	let resource = match path.strip_prefix("/v1/") {
		Some(resource) if !resource.is_empty() => resource,
		_ => return Err(bad_path()),
	};
	let (_, rest) = split_database(resource);
	let trailing = resource.ends_with('/');
	let colpath = rest.trim_end_matches('/');
	match *method {
		Method::GET => {
			if trailing {
				validate_col_path(colpath, true)
			} else {
				validate_doc_path(rest)
			}
		}
		Method::PUT => {
			if trailing {
				validate_col_path(colpath, false)
			} else if rest.is_empty() {
				Ok(())
			} else {
				validate_doc_path(rest)
			}
		}
		Method::POST => {
			if !trailing {
				return Err(bad_path());
			}
			validate_col_path(colpath, true)
		}
		Method::DELETE => {
			if trailing {
				validate_col_path(colpath, false)
			} else if rest.is_empty() {
				Ok(())
			} else {
				validate_doc_path(rest)
			}
		}
		Method::PATCH => validate_doc_path(rest),
		_ => Ok(()),
	}
}

pub fn parse_subscribe(mode: Option<&str>) -> Result<bool, DbError> {
	match mode {
		None => Ok(false),
		Some(m) if RE_SUBSCRIBE.is_match(m) => Ok(m == "subscribe"),
		Some(_) => Err(DbError::BadRequest("malformed subscribe parameter".into())),
	}
}

pub fn parse_overwrite(mode: Option<&str>) -> Result<bool, DbError> {
	match mode {
		None => Ok(true),
		Some(m) if RE_OVERWRITE.is_match(m) => Ok(m != "nooverwrite"),
		Some(_) => Err(DbError::BadRequest("malformed overwrite parameter".into())),
	}
}

/// `interval=[lo,hi]`; either endpoint may be empty and defaults to the
/// key-space bound on that side.
pub fn parse_interval(raw: Option<&str>) -> Result<(String, String), DbError> {
	let raw = match raw {
		None | Some("") => return Ok((KEY_MIN.to_string(), KEY_MAX.to_string())),
		Some(raw) => raw,
	};
	if !RE_INTERVAL.is_match(raw) {
		return Err(DbError::BadRequest("malformed interval parameter".into()));
	}
	let inner = &raw[1..raw.len() - 1];
	let (lo, hi) = match inner.split_once(',') {
		Some(bounds) => bounds,
		None => return Err(DbError::BadRequest("malformed interval parameter".into())),
	};
	let lo = if lo.is_empty() { KEY_MIN } else { lo };
	let hi = if hi.is_empty() { KEY_MAX } else { hi };
	Ok((lo.to_string(), hi.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn doc_paths_need_odd_parity() {
		assert!(validate_doc_path("a").is_ok());
		assert!(validate_doc_path("a/b/c").is_ok());
		assert!(validate_doc_path("a/b").is_err());
		assert!(validate_doc_path("").is_err());
	}

	#[test]
	fn col_paths_need_even_parity() {
		assert!(validate_col_path("a/b", false).is_ok());
		assert!(validate_col_path("a/b/c/d", false).is_ok());
		assert!(validate_col_path("a", false).is_err());
		assert!(validate_col_path("", false).is_err());
		assert!(validate_col_path("", true).is_ok());
	}

	#[test]
	fn names_outside_ascii_are_rejected() {
		assert!(validate_doc_path("caf\u{e9}").is_err());
		assert!(valid_name("plain-name_1.~"));
	}

	#[test]
	fn double_slash_is_a_bad_uri() {
		assert!(validate_uri("/v1/a//b").is_err());
		assert!(validate_uri("/v1/a/b").is_ok());
	}

	#[test]
	fn subscribe_modes() {
		assert_eq!(parse_subscribe(None).unwrap(), false);
		assert_eq!(parse_subscribe(Some("subscribe")).unwrap(), true);
		assert_eq!(parse_subscribe(Some("nosubscribe")).unwrap(), false);
		assert!(parse_subscribe(Some("sub")).is_err());
	}

	#[test]
	fn overwrite_modes() {
		assert_eq!(parse_overwrite(None).unwrap(), true);
		assert_eq!(parse_overwrite(Some("overwrite")).unwrap(), true);
		assert_eq!(parse_overwrite(Some("nooverwrite")).unwrap(), false);
		assert!(parse_overwrite(Some("maybe")).is_err());
	}

	#[test]
	fn interval_defaults_and_partials() {
		assert_eq!(
			parse_interval(None).unwrap(),
			(KEY_MIN.to_string(), KEY_MAX.to_string())
		);
		assert_eq!(
			parse_interval(Some("[,]")).unwrap(),
			(KEY_MIN.to_string(), KEY_MAX.to_string())
		);
		assert_eq!(
			parse_interval(Some("[f,h]")).unwrap(),
			("f".to_string(), "h".to_string())
		);
		assert_eq!(
			parse_interval(Some("[f,]")).unwrap(),
			("f".to_string(), KEY_MAX.to_string())
		);
		assert!(parse_interval(Some("f,h")).is_err());
		assert!(parse_interval(Some("[f h]")).is_err());
	}

	#[test]
	fn shape_gate_judges_verb_and_parity() {
		assert!(validate_shape(&Method::GET, "/v1/db/a").is_ok());
		assert!(validate_shape(&Method::GET, "/v1/db/a/b/").is_ok());
		assert!(validate_shape(&Method::GET, "/v1/db/a/b").is_err());
		assert!(validate_shape(&Method::GET, "/v1/db//a").is_err());
		assert!(validate_shape(&Method::PUT, "/v1/db").is_ok());
		assert!(validate_shape(&Method::PUT, "/v1/db/").is_err());
		assert!(validate_shape(&Method::POST, "/v1/db/").is_ok());
		assert!(validate_shape(&Method::POST, "/v1/db/a").is_err());
		assert!(validate_shape(&Method::DELETE, "/v1/db/a/b/").is_ok());
		assert!(validate_shape(&Method::PATCH, "/v1/db/a").is_ok());
		assert!(validate_shape(&Method::PATCH, "/v1/db/a/b").is_err());
		assert!(validate_shape(&Method::GET, "/v1/").is_err());
	}

	#[test]
	fn split_database_name_and_rest() {
		assert_eq!(split_database("db"), ("db", ""));
		assert_eq!(split_database("db/a/b"), ("db", "a/b"));
		assert_eq!(split_database("db/"), ("db", ""));
	}
}
