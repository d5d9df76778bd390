//! JSON-lines IPC surface: request/response envelopes and the per-domain
//! handler modules the router dispatches across.

mod error;
mod handlers;
mod router;
mod types;

pub use router::handle_request;
pub use types::{AppState, Request};
