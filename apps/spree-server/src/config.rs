use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use spree_sdk::DEFAULT_SETTINGS_TTL;

/// Process configuration, read from the environment (after `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Postgres when set, in-memory store otherwise.
    pub database_url: Option<String>,
    /// Bearer token for `/admin/*`. Admin routes reject everything when unset.
    pub admin_token: Option<String>,
    pub settings_ttl: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = match std::env::var("PORT") {
            Ok(p) => p.parse().with_context(|| format!("invalid PORT: {p}"))?,
            Err(_) => 8080,
        };
        let settings_ttl = match std::env::var("SETTINGS_TTL_SECS") {
            Ok(s) => Duration::from_secs(
                s.parse().with_context(|| format!("invalid SETTINGS_TTL_SECS: {s}"))?,
            ),
            Err(_) => DEFAULT_SETTINGS_TTL,
        };

        Ok(Self {
            host,
            port,
            database_url: non_empty("DATABASE_URL"),
            admin_token: non_empty("ADMIN_TOKEN"),
            settings_ttl,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid HOST/PORT: {}:{}", self.host, self.port))
    }
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
