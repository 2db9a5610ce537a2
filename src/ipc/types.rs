use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::auth::Principal;
use crate::config::Config;
use crate::registry::Registry;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Session token from `auth.login`.
    #[serde(default)]
    pub session: Option<String>,
    /// Filled in by the router once the route guard has passed.
    #[serde(skip)]
    pub principal: Option<Principal>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: Config,
    pub registry: Registry,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        AppState {
            workspace: None,
            db: None,
            config,
            registry: Registry::standard(),
        }
    }
}
