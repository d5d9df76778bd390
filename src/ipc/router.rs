use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type DomainHandler = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

/// Probed in order; the first domain that recognizes the method answers.
const DOMAINS: &[DomainHandler] = &[
    handlers::core::try_handle,
    handlers::classes::try_handle,
    handlers::marks::try_handle,
    handlers::reports::try_handle,
    handlers::teachers::try_handle,
    handlers::rules::try_handle,
    handlers::attendance::try_handle,
    handlers::salary::try_handle,
    handlers::backup_exchange::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    for domain in DOMAINS {
        if let Some(resp) = domain(state, &req) {
            return resp;
        }
    }
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
