//! HTTP routes for approval tickets
//!
//! - GET  /api/tickets/assigned      - Tickets the caller may resolve
//! - GET  /api/tickets/mine          - Tickets the caller filed
//! - GET  /api/tickets/{id}          - Ticket with history
//! - POST /api/tickets/{id}/resolve  - Approve or reject
//!
//! Both lists take `page` and `limit`; `assigned` also takes
//! `include_resolved`.

use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use std::fmt::Display;
use std::sync::Arc;

use crate::authz::Principal;
use crate::model::PageRequest;
use crate::routes::common::{
    caller, failure, method_not_allowed, not_found_response, parse_json_body, parse_query,
    path_id, respond, segments_after, session_token, BoxBody,
};
use crate::server::AppState;
use crate::types::{GatekeeperError, Result};
use crate::workflow::{ResolveRequest, TicketDetail, TicketView};

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    page: Option<usize>,
    limit: Option<usize>,
    #[serde(default)]
    include_resolved: bool,
}

impl ListQuery {
    fn window(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

pub async fn handle_tickets_request<B>(req: Request<B>, state: Arc<AppState>) -> Response<BoxBody>
where
    B: Body,
    B::Error: Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let token = session_token(&req);
    let segments = segments_after(&path, "/api/tickets");

    let principal = match caller(&state, token.as_deref()).await {
        Ok(p) => p,
        Err(e) => return failure(e),
    };
    let principal = principal.as_ref();
    let gk = &state.gatekeeper;

    match (method, segments.as_slice()) {
        (Method::GET, ["assigned"]) => {
            let result = match parse_query::<ListQuery, _>(&req) {
                Ok(q) => {
                    gk.list_assigned_tickets(principal, q.include_resolved, q.window())
                        .await
                }
                Err(e) => Err(e),
            };
            respond(StatusCode::OK, result)
        }
        (Method::GET, ["mine"]) => {
            let result = match parse_query::<ListQuery, _>(&req) {
                Ok(q) => gk.list_my_tickets(principal, q.window()).await,
                Err(e) => Err(e),
            };
            respond(StatusCode::OK, result)
        }
        (Method::GET, [id]) => respond(StatusCode::OK, detail(&state, principal, id).await),
        (Method::POST, [id, "resolve"]) => {
            let id = id.to_string();
            respond(StatusCode::OK, resolve(&state, principal, &id, req).await)
        }
        (_, ["assigned" | "mine"] | [_] | [_, "resolve"]) => method_not_allowed(),
        _ => not_found_response(&path),
    }
}

/// Tickets the caller has no part in are reported as missing
async fn detail(state: &AppState, principal: Option<&Principal>, id: &str) -> Result<TicketDetail> {
    let id = path_id(id, "ticket")?;
    match state.gatekeeper.ticket_detail(principal, id).await {
        Err(GatekeeperError::Forbidden(_)) => {
            Err(GatekeeperError::NotFound(format!("ticket {id}")))
        }
        other => other,
    }
}

async fn resolve<B>(
    state: &AppState,
    principal: Option<&Principal>,
    id: &str,
    req: Request<B>,
) -> Result<TicketView>
where
    B: Body,
    B::Error: Display,
{
    let id = path_id(id, "ticket")?;
    let body: ResolveRequest = parse_json_body(req).await?;
    match state.gatekeeper.resolve_ticket(principal, id, body).await {
        // the requester may see the ticket, so only outsiders get NotFound
        Err(GatekeeperError::Forbidden(reason)) => {
            match state.gatekeeper.ticket_detail(principal, id).await {
                Err(GatekeeperError::Forbidden(_)) => {
                    Err(GatekeeperError::NotFound(format!("ticket {id}")))
                }
                _ => Err(GatekeeperError::Forbidden(reason)),
            }
        }
        other => other,
    }
}
