//! HTTP routes for authentication
//!
//! - POST /api/auth/login          - Verify credentials and open a session
//! - POST /api/auth/signup         - File a signup application
//! - GET  /api/auth/me             - Current user with memberships
//! - GET  /api/auth/reset-password - Username behind a reset token
//! - POST /api/auth/reset-password - Set a password with a reset token

use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use std::fmt::Display;
use std::sync::Arc;

use crate::routes::common::{
    caller, method_not_allowed, not_found_response, parse_json_body, parse_query, respond,
    session_token, BoxBody,
};
use crate::server::AppState;
use crate::types::Result;
use crate::workflow::{
    LoginRequest, ResetLookup, ResetPasswordRequest, SignupRequest, UserView,
};

#[derive(Debug, Deserialize)]
struct TokenQuery {
    #[serde(default)]
    token: String,
}

pub async fn handle_auth_request<B>(req: Request<B>, state: Arc<AppState>) -> Response<BoxBody>
where
    B: Body,
    B::Error: Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (method, path.as_str()) {
        (Method::POST, "/api/auth/login") => {
            let result = match parse_json_body::<LoginRequest, _>(req).await {
                Ok(body) => state.gatekeeper.login(body).await,
                Err(e) => Err(e),
            };
            respond(StatusCode::OK, result)
        }
        (Method::POST, "/api/auth/signup") => {
            let result = match parse_json_body::<SignupRequest, _>(req).await {
                Ok(body) => state.gatekeeper.signup(body).await,
                Err(e) => Err(e),
            };
            respond(StatusCode::CREATED, result)
        }
        (Method::GET, "/api/auth/me") => {
            let token = session_token(&req);
            respond(StatusCode::OK, me(&state, token.as_deref()).await)
        }
        (Method::GET, "/api/auth/reset-password") => {
            respond(StatusCode::OK, reset_lookup(&state, &req))
        }
        (Method::POST, "/api/auth/reset-password") => {
            let result = match parse_json_body::<ResetPasswordRequest, _>(req).await {
                Ok(body) => state.gatekeeper.reset_password(body).await,
                Err(e) => Err(e),
            };
            respond(StatusCode::OK, result)
        }
        (
            _,
            "/api/auth/login" | "/api/auth/signup" | "/api/auth/me" | "/api/auth/reset-password",
        ) => method_not_allowed(),
        _ => not_found_response(&path),
    }
}

async fn me(state: &AppState, token: Option<&str>) -> Result<UserView> {
    let principal = caller(state, token).await?;
    state.gatekeeper.me(principal.as_ref()).await
}

fn reset_lookup<B>(state: &AppState, req: &Request<B>) -> Result<ResetLookup> {
    let query: TokenQuery = parse_query(req)?;
    state.gatekeeper.reset_lookup(&query.token)
}
