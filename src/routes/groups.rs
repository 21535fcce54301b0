//! HTTP routes for groups
//!
//! - GET    /api/groups       - Every group (public, used by signup)
//! - POST   /api/groups       - Create (root)
//! - PUT    /api/groups/{id}  - Rename or re-describe (root)
//! - DELETE /api/groups/{id}  - Delete an unreferenced group (root)

use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use std::fmt::Display;
use std::sync::Arc;

use crate::authz::Principal;
use crate::routes::common::{
    caller, failure, json_response, method_not_allowed, no_content, not_found_response,
    parse_json_body, path_id, respond, segments_after, session_token, BoxBody,
};
use crate::server::AppState;
use crate::types::Result;
use crate::workflow::{GroupRequest, GroupView};

pub async fn handle_groups_request<B>(req: Request<B>, state: Arc<AppState>) -> Response<BoxBody>
where
    B: Body,
    B::Error: Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let token = session_token(&req);
    let segments = segments_after(&path, "/api/groups");

    if method == Method::GET && segments.is_empty() {
        return json_response(StatusCode::OK, &state.gatekeeper.list_groups().await);
    }

    let principal = match caller(&state, token.as_deref()).await {
        Ok(p) => p,
        Err(e) => return failure(e),
    };
    let principal = principal.as_ref();

    match (method, segments.as_slice()) {
        (Method::POST, []) => {
            let result = match parse_json_body::<GroupRequest, _>(req).await {
                Ok(body) => state.gatekeeper.create_group(principal, body).await,
                Err(e) => Err(e),
            };
            respond(StatusCode::CREATED, result)
        }
        (Method::PUT, [id]) => {
            let id = id.to_string();
            respond(StatusCode::OK, update(&state, principal, &id, req).await)
        }
        (Method::DELETE, [id]) => {
            let result = match path_id(id, "group") {
                Ok(id) => state.gatekeeper.delete_group(principal, id).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => no_content(),
                Err(e) => failure(e),
            }
        }
        (_, [] | [_]) => method_not_allowed(),
        _ => not_found_response(&path),
    }
}

async fn update<B>(
    state: &AppState,
    principal: Option<&Principal>,
    id: &str,
    req: Request<B>,
) -> Result<GroupView>
where
    B: Body,
    B::Error: Display,
{
    let id = path_id(id, "group")?;
    let body: GroupRequest = parse_json_body(req).await?;
    state.gatekeeper.update_group(principal, id, body).await
}
