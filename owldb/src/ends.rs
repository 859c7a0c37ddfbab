//! The HTTP façade: verb dispatch on `/v1/*resource`, session endpoints
//! on `/auth`, CORS preambles, and the bearer-token gate in front of
//! every data route.

use axum::extract::{Extension, Path, Query};
use axum::http::{Method, Request, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use common::error::DbError;
use hyper::{header, StatusCode};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::db::{Created, GetResult};
use crate::params;
use crate::services::Services;
use crate::stream;

/// The authenticated username, injected by the middleware for every
/// data route.
#[derive(Clone)]
pub struct ActiveUser(pub String);

pub fn router(services: Arc<Services>, shutdown_rx: watch::Receiver<()>) -> Router {
	Router::new()
		.route(
			"/v1/*resource",
			get(get_resource)
				.put(put_resource)
				.post(post_resource)
				.delete(delete_resource)
				.patch(patch_resource)
				.options(v1_options),
		)
		.route_layer(middleware::from_fn(authenticate))
		.route("/auth", post(login).delete(logout).options(auth_options))
		.fallback(fallback)
		.layer(
			tower::ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(TimeoutLayer::new(Duration::from_secs(30)))
				.layer(Extension(services))
				.layer(Extension(shutdown_rx)),
		)
}

/// Gate in front of every data route: the request shape is judged
/// first, then the bearer token resolves to a user stashed in the
/// request. OPTIONS preflights pass through untouched.
pub async fn authenticate<B>(req: Request<B>, next: Next<B>) -> Result<Response, DbError> {
	if req.method() == Method::OPTIONS {
		return Ok(next.run(req).await);
	}
	params::validate_shape(req.method(), req.uri().path())?;
	let services = req
		.extensions()
		.get::<Arc<Services>>()
		.cloned()
		.ok_or_else(|| DbError::Internal("services not installed".into()))?;
	let token = bearer_token(req.headers())?;
	let user = services.sessions.validate(&token)?;
	let mut req = req;
	req.extensions_mut().insert(ActiveUser(user));
	Ok(next.run(req).await)
}

fn bearer_token(headers: &hyper::HeaderMap) -> Result<String, DbError> {
	let header = headers
		.get(header::AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.unwrap_or("");
	let token = header.strip_prefix("Bearer ").unwrap_or("");
	if token.is_empty() {
		return Err(DbError::Unauthorized(
			"Missing or invalid bearer token".into(),
		));
	}
	Ok(token.to_string())
}

fn json_response(status: StatusCode, body: &Value) -> Response {
	(
		status,
		[
			(header::CONTENT_TYPE, "application/json"),
			(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
		],
		body.to_string(),
	)
		.into_response()
}

fn no_content() -> Response {
	(
		StatusCode::NO_CONTENT,
		[(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
	)
		.into_response()
}

fn created_response(created: Created) -> Response {
	let status = if created.overwrote {
		StatusCode::OK
	} else {
		StatusCode::CREATED
	};
	let location = header::HeaderValue::from_str(&created.uri).ok();
	let mut resp = json_response(status, &json!({ "uri": created.uri }));
	if let Some(value) = location {
		resp.headers_mut().insert(header::LOCATION, value);
	}
	resp
}

pub async fn get_resource(
	Path(resource): Path<String>,
	uri: Uri,
	Query(query): Query<HashMap<String, String>>,
	Extension(services): Extension<Arc<Services>>,
	Extension(shutdown): Extension<watch::Receiver<()>>,
) -> Result<Response, DbError> {
	params::validate_uri(uri.path())?;
	let (db, rest) = params::split_database(&resource);
	let subscribe = params::parse_subscribe(query.get("mode").map(String::as_str))?;

	if resource.ends_with('/') {
		let colpath = rest.trim_end_matches('/');
		params::validate_col_path(colpath, true)?;
		let (lo, hi) = params::parse_interval(query.get("interval").map(String::as_str))?;
		debug!("GET collection '{db}/{colpath}' in [{lo:?}, {hi:?}], subscribe {subscribe}");
		match services.get.collection(db, colpath, &lo, &hi, subscribe)? {
			GetResult::Plain(snapshot) => Ok(json_response(StatusCode::OK, &snapshot)),
			GetResult::Stream { sub, .. } => Ok(stream::sse_response(sub, shutdown)),
		}
	} else {
		params::validate_doc_path(rest)?;
		match services.get.document(db, rest, subscribe)? {
			GetResult::Plain(snapshot) => Ok(json_response(StatusCode::OK, &snapshot)),
			GetResult::Stream { sub, .. } => Ok(stream::sse_response(sub, shutdown)),
		}
	}
}

pub async fn put_resource(
	Path(resource): Path<String>,
	uri: Uri,
	Query(query): Query<HashMap<String, String>>,
	Extension(services): Extension<Arc<Services>>,
	Extension(ActiveUser(user)): Extension<ActiveUser>,
	body: axum::body::Bytes,
) -> Result<Response, DbError> {
	params::validate_uri(uri.path())?;
	let (db, rest) = params::split_database(&resource);

	if resource.ends_with('/') {
		let colpath = rest.trim_end_matches('/');
		params::validate_col_path(colpath, false)?;
		return Ok(created_response(services.create.put_collection(db, colpath)?));
	}

	if rest.is_empty() {
		if !params::valid_name(db) {
			return Err(DbError::BadRequest("bad resource path".into()));
		}
		return Ok(created_response(services.create.create_database(db)?));
	}

	params::validate_doc_path(rest)?;
	let payload: Value = serde_json::from_slice(&body)
		.map_err(|_| DbError::BadRequest("Malformed json object".into()))?;
	let overwrite = params::parse_overwrite(query.get("mode").map(String::as_str))?;
	info!("PUT document '{db}/{rest}' by '{user}', overwrite {overwrite}");
	Ok(created_response(services.create.put_document(
		db, rest, payload, overwrite, &user,
	)?))
}

pub async fn post_resource(
	Path(resource): Path<String>,
	uri: Uri,
	Extension(services): Extension<Arc<Services>>,
	Extension(ActiveUser(user)): Extension<ActiveUser>,
	body: axum::body::Bytes,
) -> Result<Response, DbError> {
	params::validate_uri(uri.path())?;
	if !resource.ends_with('/') {
		return Err(DbError::BadRequest("bad resource path".into()));
	}
	let (db, rest) = params::split_database(&resource);
	let colpath = rest.trim_end_matches('/');
	params::validate_col_path(colpath, true)?;
	let payload: Value = serde_json::from_slice(&body)
		.map_err(|_| DbError::BadRequest("Malformed json object".into()))?;
	Ok(created_response(services.create.post_document(
		db, colpath, &user, payload,
	)?))
}

pub async fn delete_resource(
	Path(resource): Path<String>,
	uri: Uri,
	Extension(services): Extension<Arc<Services>>,
) -> Result<Response, DbError> {
	params::validate_uri(uri.path())?;
	let (db, rest) = params::split_database(&resource);

	if resource.ends_with('/') {
		let colpath = rest.trim_end_matches('/');
		params::validate_col_path(colpath, false)?;
		services.delete.collection(db, colpath)?;
		return Ok(no_content());
	}

	if rest.is_empty() {
		services.delete.database(db)?;
		return Ok(no_content());
	}

	params::validate_doc_path(rest)?;
	services.delete.document(db, rest)?;
	Ok(no_content())
}

pub async fn patch_resource(
	Path(resource): Path<String>,
	uri: Uri,
	Extension(services): Extension<Arc<Services>>,
	Extension(ActiveUser(user)): Extension<ActiveUser>,
	body: axum::body::Bytes,
) -> Result<Response, DbError> {
	params::validate_uri(uri.path())?;
	let (db, rest) = params::split_database(&resource);
	params::validate_doc_path(rest)?;
	if serde_json::from_slice::<Value>(&body).is_err() {
		return Err(DbError::BadRequest("Not a valid json object".into()));
	}
	let outcome = services.patch.document(db, rest, &body, &user)?;
	let mut resp = json_response(StatusCode::OK, &outcome);
	let location = format!("/v1/{db}/{rest}");
	if let Ok(value) = header::HeaderValue::from_str(&location) {
		resp.headers_mut().insert(header::LOCATION, value);
	}
	Ok(resp)
}

#[derive(Deserialize)]
struct LoginRequest {
	#[serde(default)]
	username: String,
}

pub async fn login(
	Extension(services): Extension<Arc<Services>>,
	body: axum::body::Bytes,
) -> Result<Response, DbError> {
	let req: LoginRequest = serde_json::from_slice(&body)
		.map_err(|err| DbError::BadRequest(err.to_string()))?;
	if req.username.is_empty() {
		return Err(DbError::BadRequest("No username found".into()));
	}
	let token = services.sessions.login(&req.username)?;
	Ok(json_response(StatusCode::OK, &json!({ "token": token })))
}

pub async fn logout(
	Extension(services): Extension<Arc<Services>>,
	headers: hyper::HeaderMap,
) -> Result<Response, DbError> {
	let token = bearer_token(&headers)?;
	services.sessions.logout(&token)?;
	Ok(no_content())
}

fn cors_preamble(allow: &'static str) -> Response {
	(
		StatusCode::OK,
		[
			(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
			(header::ALLOW, allow),
			(header::ACCESS_CONTROL_ALLOW_METHODS, allow),
			(
				header::ACCESS_CONTROL_ALLOW_HEADERS,
				"Content-Type, Authorization",
			),
		],
	)
		.into_response()
}

pub async fn v1_options() -> Response {
	cors_preamble("GET, POST, PUT, DELETE, OPTIONS, PATCH")
}

pub async fn auth_options() -> Response {
	cors_preamble("POST, DELETE, OPTIONS")
}

/// Anything the router does not know: OPTIONS still gets a CORS
/// preamble, `/v1` without a resource is a bad path, the rest is 404.
pub async fn fallback(method: Method, uri: Uri) -> Response {
	if method == Method::OPTIONS {
		return cors_preamble("");
	}
	if uri.path() == "/v1" || uri.path() == "/v1/" {
		return DbError::BadRequest("bad resource path".into()).into_response();
	}
	StatusCode::NOT_FOUND.into_response()
}
