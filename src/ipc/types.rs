use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::cache::{StudentStatusCache, DEFAULT_TTL};
use crate::config::PlatformConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: PlatformConfig,
    pub student_cache: StudentStatusCache,
}

impl AppState {
    pub fn new(config: PlatformConfig) -> Self {
        Self {
            workspace: None,
            db: None,
            config,
            student_cache: StudentStatusCache::new(DEFAULT_TTL),
        }
    }
}
