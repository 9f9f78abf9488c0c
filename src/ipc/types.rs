use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One request line off stdin. `id` is echoed back verbatim so the front-end
/// can match responses to in-flight calls.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Mutable session state. Every data method requires a selected workspace;
/// `db` is the open handle onto that workspace's SQLite file.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
