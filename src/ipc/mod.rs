mod error;
mod handlers;
mod helpers;
mod router;

use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

pub use router::handle_request;

/// One line of the request stream.
#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Daemon state. `db` is open once a workspace has been selected.
#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
