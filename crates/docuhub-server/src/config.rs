use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use chrono::TimeDelta;

use docuhub_api::session::SessionSettings;
use docuhub_pipeline::Timings;

/// Runtime settings, read from `DOCUHUB_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub session_ttl_hours: i64,
    pub cookie_secure: bool,
    pub ingest_start_delay_ms: u64,
    pub ingest_process_delay_ms: u64,
    pub session_sweep_secs: u64,
    /// Seed admin; only used when both halves are set.
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: non_empty("DOCUHUB_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&lookup, "DOCUHUB_PORT", 3000)?,
            session_ttl_hours: parse(&lookup, "DOCUHUB_SESSION_TTL_HOURS", 168)?, // 7 days
            cookie_secure: parse(&lookup, "DOCUHUB_COOKIE_SECURE", false)?,
            ingest_start_delay_ms: parse(&lookup, "DOCUHUB_INGEST_START_DELAY_MS", 1000)?,
            ingest_process_delay_ms: parse(&lookup, "DOCUHUB_INGEST_PROCESS_DELAY_MS", 5000)?,
            session_sweep_secs: parse(&lookup, "DOCUHUB_SESSION_SWEEP_SECS", 3600)?,
            admin_username: non_empty("DOCUHUB_ADMIN_USERNAME"),
            admin_password: non_empty("DOCUHUB_ADMIN_PASSWORD"),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn sessions(&self) -> SessionSettings {
        SessionSettings {
            ttl: TimeDelta::hours(self.session_ttl_hours),
            cookie_secure: self.cookie_secure,
        }
    }

    pub fn timings(&self) -> Timings {
        Timings {
            start_delay: Duration::from_millis(self.ingest_start_delay_ms),
            process_delay: Duration::from_millis(self.ingest_process_delay_ms),
        }
    }

    pub fn admin_seed(&self) -> Option<(&str, &str)> {
        Some((self.admin_username.as_deref()?, self.admin_password.as_deref()?))
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        _ => Ok(default),
    }
}
