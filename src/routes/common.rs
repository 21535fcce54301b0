//! Shared helpers for the HTTP handlers

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use uuid::Uuid;

use crate::auth::extract_token_from_header;
use crate::authz::Principal;
use crate::server::AppState;
use crate::types::{GatekeeperError, Result};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Largest JSON body accepted
const MAX_BODY_BYTES: usize = 10 * 1024;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

fn with_headers(status: StatusCode, body: BoxBody) -> Response<BoxBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    with_headers(status, full_body(json))
}

pub fn error_response(status: StatusCode, error: &str, code: Option<&str>) -> Response<BoxBody> {
    json_response(
        status,
        &ErrorResponse {
            error: error.to_string(),
            code: code.map(|c| c.to_string()),
        },
    )
}

pub fn no_content() -> Response<BoxBody> {
    let mut response = with_headers(StatusCode::NO_CONTENT, full_body(Bytes::new()));
    response.headers_mut().remove(CONTENT_TYPE);
    response
}

pub fn not_found_response(path: &str) -> Response<BoxBody> {
    error_response(
        StatusCode::NOT_FOUND,
        &format!("No route for {path}"),
        Some("NOT_FOUND"),
    )
}

pub fn method_not_allowed() -> Response<BoxBody> {
    error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        "Method not allowed",
        Some("METHOD_NOT_ALLOWED"),
    )
}

pub fn cors_preflight() -> Response<BoxBody> {
    let mut response = no_content();
    let headers = response.headers_mut();
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert("Access-Control-Max-Age", HeaderValue::from_static("86400"));
    response
}

/// Render a domain error with its status and code
pub fn failure(err: GatekeeperError) -> Response<BoxBody> {
    let status = err.status_code();
    let code = err.code();
    if status.is_server_error() {
        tracing::error!(code, "Request failed: {}", err);
    }
    error_response(status, &err.to_string(), Some(code))
}

/// `status` with the JSON body on success, the mapped error otherwise
pub fn respond<T: Serialize>(status: StatusCode, result: Result<T>) -> Response<BoxBody> {
    match result {
        Ok(body) => json_response(status, &body),
        Err(e) => failure(e),
    }
}

pub async fn parse_json_body<T, B>(req: Request<B>) -> Result<T>
where
    T: DeserializeOwned,
    B: Body,
    B::Error: Display,
{
    let body = Limited::new(req.into_body().map_err(|e| e.to_string()), MAX_BODY_BYTES);
    let bytes = body
        .collect()
        .await
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                GatekeeperError::Validation("Request body too large".into())
            } else {
                GatekeeperError::Validation(format!("Failed to read body: {}", e))
            }
        })?
        .to_bytes();

    serde_json::from_slice(&bytes)
        .map_err(|e| GatekeeperError::Validation(format!("Invalid JSON: {}", e)))
}

/// Query string decoded into `T`; an absent query decodes from ""
pub fn parse_query<T: DeserializeOwned, B>(req: &Request<B>) -> Result<T> {
    serde_urlencoded::from_str(req.uri().query().unwrap_or(""))
        .map_err(|e| GatekeeperError::Validation(format!("Invalid query: {}", e)))
}

pub fn get_auth_header<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Bearer token of the request, if any
pub fn session_token<B>(req: &Request<B>) -> Option<String> {
    extract_token_from_header(get_auth_header(req)).map(str::to_string)
}

/// The caller behind a session token, `None` when no token was sent. A token
/// that does not verify is an error, not an anonymous call.
pub async fn caller(state: &AppState, token: Option<&str>) -> Result<Option<Principal>> {
    state.gatekeeper.authenticate_optional(token).await
}

/// Parse a uuid path segment
pub fn path_id(segment: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(segment)
        .map_err(|_| GatekeeperError::Validation(format!("Invalid {what} id '{segment}'")))
}

/// Path segments after `prefix`, e.g. `["<id>", "claim"]`
pub fn segments_after<'a>(path: &'a str, prefix: &str) -> Vec<&'a str> {
    path.strip_prefix(prefix)
        .unwrap_or("")
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}
