//! HTTP routes for topics and channels
//!
//! - GET    /api/entities                 - List (filters: bookmarked, kind, topic, owner)
//! - POST   /api/entities/sync            - Force a broker synchronisation (root)
//! - GET    /api/entities/{id}            - Detail with channels and own pending claim
//! - POST   /api/entities/{id}/bookmark   - Toggle the caller's bookmark
//! - POST   /api/entities/{id}/claim      - File an ownership claim
//! - PUT    /api/entities/{id}/description
//! - POST   /api/entities/{id}/{pause,resume,empty}
//! - DELETE /api/entities/{id}            - Delete on the broker

use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use std::fmt::Display;
use std::sync::Arc;

use crate::broker::BrokerOp;
use crate::authz::Principal;
use crate::routes::common::{
    caller, failure, method_not_allowed, not_found_response, parse_json_body, parse_query,
    path_id, respond, segments_after, session_token, BoxBody,
};
use crate::server::AppState;
use crate::types::Result;
use crate::workflow::{ClaimRequest, EntityQuery, EntityView, TicketView};

#[derive(Debug, Deserialize)]
struct DescriptionRequest {
    description: String,
}

pub async fn handle_entities_request<B>(req: Request<B>, state: Arc<AppState>) -> Response<BoxBody>
where
    B: Body,
    B::Error: Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let token = session_token(&req);
    let segments = segments_after(&path, "/api/entities");

    let principal = match caller(&state, token.as_deref()).await {
        Ok(p) => p,
        Err(e) => return failure(e),
    };
    let principal = principal.as_ref();
    let gk = &state.gatekeeper;

    match (method, segments.as_slice()) {
        (Method::GET, []) => {
            let result = match parse_query::<EntityQuery, _>(&req) {
                Ok(query) => gk.list_entities(principal, query).await,
                Err(e) => Err(e),
            };
            respond(StatusCode::OK, result)
        }
        (Method::POST, ["sync"]) => respond(StatusCode::OK, gk.sync_entities(principal).await),
        (Method::GET, [id]) => {
            let result = match path_id(id, "entity") {
                Ok(id) => gk.entity_detail(principal, id).await,
                Err(e) => Err(e),
            };
            respond(StatusCode::OK, result)
        }
        (Method::DELETE, [id]) => {
            let result = match path_id(id, "entity") {
                Ok(id) => gk.entity_operation(principal, id, BrokerOp::Delete).await,
                Err(e) => Err(e),
            };
            respond(StatusCode::OK, result)
        }
        (Method::POST, [id, "bookmark"]) => {
            let result = match path_id(id, "entity") {
                Ok(id) => gk.toggle_bookmark(principal, id).await,
                Err(e) => Err(e),
            };
            respond(StatusCode::OK, result)
        }
        (Method::POST, [id, "claim"]) => {
            let id = id.to_string();
            respond(StatusCode::CREATED, claim(&state, principal, &id, req).await)
        }
        (Method::PUT, [id, "description"]) => {
            let id = id.to_string();
            let result = describe(&state, principal, &id, req).await;
            respond(StatusCode::OK, result)
        }
        (Method::POST, [id, op @ ("pause" | "resume" | "empty")]) => {
            let op = match *op {
                "pause" => BrokerOp::Pause,
                "resume" => BrokerOp::Resume,
                _ => BrokerOp::Empty,
            };
            let result = match path_id(id, "entity") {
                Ok(id) => gk.entity_operation(principal, id, op).await,
                Err(e) => Err(e),
            };
            respond(StatusCode::OK, result)
        }
        (_, [] | ["sync"] | [_]) => method_not_allowed(),
        (_, [_, "bookmark" | "claim" | "description" | "pause" | "resume" | "empty"]) => {
            method_not_allowed()
        }
        _ => not_found_response(&path),
    }
}

async fn claim<B>(
    state: &AppState,
    principal: Option<&Principal>,
    id: &str,
    req: Request<B>,
) -> Result<TicketView>
where
    B: Body,
    B::Error: Display,
{
    let id = path_id(id, "entity")?;
    let body: ClaimRequest = parse_json_body(req).await?;
    state.gatekeeper.claim_entity(principal, id, body).await
}

async fn describe<B>(
    state: &AppState,
    principal: Option<&Principal>,
    id: &str,
    req: Request<B>,
) -> Result<EntityView>
where
    B: Body,
    B::Error: Display,
{
    let id = path_id(id, "entity")?;
    let body: DescriptionRequest = parse_json_body(req).await?;
    state
        .gatekeeper
        .update_entity_description(principal, id, &body.description)
        .await
}
