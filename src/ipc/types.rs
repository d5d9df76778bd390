use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One request line off stdin. `params` defaults to JSON null when absent,
/// so handlers can probe it uniformly with `.get(..)`.
#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Mutable daemon state. Both fields stay empty until the first successful
/// `workspace.select`; `backup.import` may drop and reopen `db` mid-session.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
        }
    }
}
