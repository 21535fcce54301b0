//! HTTP routes for user administration (root only)
//!
//! - GET    /api/users                      - Every user with memberships
//! - POST   /api/users                      - Create a pending user and its reset token
//! - PUT    /api/users/{id}                 - Name, status, memberships
//! - DELETE /api/users/{id}                 - Delete a user without pending tickets
//! - POST   /api/users/{id}/reset-password  - Issue a reset token

use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use std::fmt::Display;
use std::sync::Arc;

use crate::authz::Principal;
use crate::routes::common::{
    caller, failure, method_not_allowed, no_content, not_found_response, parse_json_body,
    path_id, respond, segments_after, session_token, BoxBody,
};
use crate::server::AppState;
use crate::types::Result;
use crate::workflow::{CreateUserRequest, UpdateUserRequest, UserView};

pub async fn handle_users_request<B>(req: Request<B>, state: Arc<AppState>) -> Response<BoxBody>
where
    B: Body,
    B::Error: Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let token = session_token(&req);
    let segments = segments_after(&path, "/api/users");

    let principal = match caller(&state, token.as_deref()).await {
        Ok(p) => p,
        Err(e) => return failure(e),
    };
    let principal = principal.as_ref();
    let gk = &state.gatekeeper;

    match (method, segments.as_slice()) {
        (Method::GET, []) => respond(StatusCode::OK, gk.list_users(principal).await),
        (Method::POST, []) => {
            let result = match parse_json_body::<CreateUserRequest, _>(req).await {
                Ok(body) => gk.create_user(principal, body).await,
                Err(e) => Err(e),
            };
            respond(StatusCode::CREATED, result)
        }
        (Method::PUT, [id]) => {
            let id = id.to_string();
            respond(StatusCode::OK, update(&state, principal, &id, req).await)
        }
        (Method::DELETE, [id]) => {
            let result = match path_id(id, "user") {
                Ok(id) => gk.delete_user(principal, id).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => no_content(),
                Err(e) => failure(e),
            }
        }
        (Method::POST, [id, "reset-password"]) => {
            let result = match path_id(id, "user") {
                Ok(id) => gk.request_reset(principal, id).await,
                Err(e) => Err(e),
            };
            respond(StatusCode::CREATED, result)
        }
        (_, [] | [_] | [_, "reset-password"]) => method_not_allowed(),
        _ => not_found_response(&path),
    }
}

async fn update<B>(
    state: &AppState,
    principal: Option<&Principal>,
    id: &str,
    req: Request<B>,
) -> Result<UserView>
where
    B: Body,
    B::Error: Display,
{
    let id = path_id(id, "user")?;
    let body: UpdateUserRequest = parse_json_body(req).await?;
    state.gatekeeper.update_user(principal, id, body).await
}
