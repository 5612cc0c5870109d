use std::{net::SocketAddr, time::Duration};

use anyhow::{bail, Context};
use axum::http::HeaderValue;
use bizdesk_core::live::PollMode;

use crate::feed_registry::DEFAULT_MAX_TENANT_FEEDS;

pub struct Config {
    pub listen_addr: SocketAddr,
    pub db_path: String,
    pub cors_allow: Vec<String>,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_mode: PollMode,
    pub feed_recovery_interval: Duration,
    pub max_tenant_feeds: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let listen_addr: SocketAddr = var("BD_LISTEN_ADDR", "0.0.0.0:8080")
            .parse()
            .context("Invalid BD_LISTEN_ADDR")?;
        let db_path = var("BD_DB_PATH", "./db/app.db");
        let cors_allow: Vec<String> = var("BD_CORS_ALLOW_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        for origin in cors_allow.iter().filter(|o| *o != "*") {
            HeaderValue::from_str(origin)
                .with_context(|| format!("Invalid origin '{}' in BD_CORS_ALLOW_ORIGINS", origin))?;
        }
        let timeout_ms: u64 = var("BD_REQUEST_TIMEOUT_MS", "30000")
            .parse()
            .context("Invalid BD_REQUEST_TIMEOUT_MS")?;
        let poll_ms: u64 = var("BD_POLL_INTERVAL_MS", "5000")
            .parse()
            .context("Invalid BD_POLL_INTERVAL_MS")?;
        if poll_ms == 0 {
            bail!("BD_POLL_INTERVAL_MS must be greater than zero");
        }
        let poll_mode: PollMode = var("BD_POLL_MODE", "fallback")
            .parse()
            .map_err(anyhow::Error::msg)
            .context("Invalid BD_POLL_MODE")?;
        let recovery_secs: u64 = var("BD_FEED_RECOVERY_SECS", "60")
            .parse()
            .context("Invalid BD_FEED_RECOVERY_SECS")?;
        let max_tenant_feeds: usize = var(
            "BD_MAX_TENANT_FEEDS",
            &DEFAULT_MAX_TENANT_FEEDS.to_string(),
        )
        .parse()
        .context("Invalid BD_MAX_TENANT_FEEDS")?;

        Ok(Self {
            listen_addr,
            db_path,
            cors_allow,
            request_timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(poll_ms),
            poll_mode,
            feed_recovery_interval: Duration::from_secs(recovery_secs),
            max_tenant_feeds,
        })
    }
}
