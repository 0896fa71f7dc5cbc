//! Configuration management.
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};

use crate::services::feed::{InsertPolicy, SortKey};

#[derive(Debug, Clone)]
pub struct Config {
    /// Hosted backend project (REST + auth + storage).
    pub backend: BackendConfig,
    /// Realtime websocket endpoint.
    pub realtime: RealtimeConfig,
    /// Object storage settings.
    pub storage: StorageConfig,
    /// Feed behavior.
    pub feed: FeedConfig,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Project base URL (https://...).
    pub url: String,
    /// Project api key, sent as `apikey` and as the anonymous bearer.
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Websocket URL; derived from the backend URL when unset.
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Bucket receiving media uploads.
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub sort: SortKey,
    pub insert_policy: InsertPolicy,
}

fn default_bucket() -> String {
    "media-uploads".to_string()
}

/// `https://host` becomes `wss://host/realtime/v1/websocket`.
fn derive_realtime_url(backend_url: &str) -> String {
    let base = backend_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws_base}/realtime/v1/websocket")
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let backend = BackendConfig {
            url: std::env::var("BACKEND_URL")
                .context("BACKEND_URL environment variable not set")?,
            api_key: std::env::var("BACKEND_API_KEY")
                .context("BACKEND_API_KEY environment variable not set")?,
        };

        let realtime = RealtimeConfig {
            url: std::env::var("REALTIME_URL")
                .unwrap_or_else(|_| derive_realtime_url(&backend.url)),
        };

        let storage = StorageConfig {
            bucket: std::env::var("STORAGE_BUCKET").unwrap_or_else(|_| default_bucket()),
        };

        let feed = FeedConfig {
            sort: std::env::var("FEED_SORT")
                .unwrap_or_else(|_| "created_at".to_string())
                .parse()
                .context("FEED_SORT must be created_at or likes")?,
            insert_policy: std::env::var("FEED_INSERT_POLICY")
                .unwrap_or_else(|_| "show_immediately".to_string())
                .parse()
                .context("FEED_INSERT_POLICY must be show_immediately or respect_query")?,
        };

        Ok(Config {
            backend,
            realtime,
            storage,
            feed,
        })
    }
}
