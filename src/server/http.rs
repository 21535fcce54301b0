//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo, one task per connection.

use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::routes::{self, common::cors_preflight, common::not_found_response, BoxBody};
use crate::types::GatekeeperError;
use crate::workflow::Gatekeeper;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub gatekeeper: Arc<Gatekeeper>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, gatekeeper: Arc<Gatekeeper>) -> Self {
        Self {
            args,
            gatekeeper,
            started_at: Instant::now(),
        }
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), GatekeeperError> {
    let listener = TcpListener::bind(state.args.listen)
        .await
        .map_err(|e| GatekeeperError::Config(format!("bind {}: {}", state.args.listen, e)))?;

    info!("Gatekeeper listening on {}", state.args.listen);
    if state.args.dev_mode {
        warn!("Development mode enabled - sessions signed with the dev secret");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req: Request<Incoming>| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
pub async fn handle_request<B>(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<B>,
) -> Result<Response<BoxBody>, Infallible>
where
    B: Body,
    B::Error: Display,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("[{}] {} {}", addr, method, path);

    if method == Method::OPTIONS {
        return Ok(cors_preflight());
    }

    let response = if path.starts_with("/api/auth/") {
        routes::handle_auth_request(req, state).await
    } else if under(&path, "/api/entities") {
        routes::handle_entities_request(req, state).await
    } else if under(&path, "/api/tickets") {
        routes::handle_tickets_request(req, state).await
    } else if under(&path, "/api/groups") {
        routes::handle_groups_request(req, state).await
    } else if under(&path, "/api/users") {
        routes::handle_users_request(req, state).await
    } else {
        match (method, path.as_str()) {
            (Method::GET, "/health") | (Method::GET, "/healthz") => routes::health_check(state),
            (Method::GET, "/version") => routes::version_info(),
            _ => not_found_response(&path),
        }
    };

    Ok(response)
}

/// `path` is `prefix` itself or below it
fn under(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
