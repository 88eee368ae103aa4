use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;

/// One year.
pub const MAX_SESSION_TTL_MINUTES: u64 = 60 * 24 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(anyhow!("unknown store backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub starting_credits: i64,
    pub top_up_amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub session: SessionConfig,
    pub ledger: LedgerConfig,
    pub require_email_username: bool,
    pub listen_addr: SocketAddr,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_or = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };

        let backend: StoreBackend = parse_or("STORE_BACKEND", "postgres").parse()?;
        let database_url = lookup("DATABASE_URL");
        if backend == StoreBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL is required when STORE_BACKEND=postgres");
        }

        let store = StoreConfig {
            backend,
            database_url,
            max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            timeout: Duration::from_secs(parse(&lookup, "STORE_TIMEOUT_SECS", 5)?),
        };

        let session = SessionConfig {
            secret: lookup("SESSION_SECRET").context("SESSION_SECRET is required")?,
            issuer: parse_or("SESSION_ISSUER", "credits-site"),
            audience: parse_or("SESSION_AUDIENCE", "credits-site-users"),
            ttl_minutes: parse(&lookup, "SESSION_TTL_MINUTES", 60)?,
        };

        if session.ttl_minutes == 0 || session.ttl_minutes > MAX_SESSION_TTL_MINUTES {
            bail!("SESSION_TTL_MINUTES must be between 1 and {MAX_SESSION_TTL_MINUTES}");
        }

        let ledger = LedgerConfig {
            starting_credits: parse(&lookup, "STARTING_CREDITS", 42)?,
            top_up_amount: parse(&lookup, "TOP_UP_CREDITS", 100)?,
        };
        if ledger.starting_credits < 0 {
            bail!("STARTING_CREDITS must not be negative");
        }
        if ledger.top_up_amount <= 0 {
            bail!("TOP_UP_CREDITS must be positive");
        }

        let listen_addr: SocketAddr = format!(
            "{}:{}",
            parse_or("APP_HOST", "0.0.0.0"),
            parse_or("APP_PORT", "8080")
        )
        .parse()
        .context("APP_HOST/APP_PORT do not form a socket address")?;

        Ok(Self {
            store,
            session,
            ledger,
            require_email_username: parse(&lookup, "REQUIRE_EMAIL_USERNAME", true)?,
            listen_addr,
        })
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("invalid value for {key}: {e}")),
        None => Ok(default),
    }
}
