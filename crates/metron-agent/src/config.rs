use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Collector address, `host:port` or a full base URL.
    #[serde(default = "default_server_address")]
    pub server_address: String,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Number of concurrent report workers.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    /// HMAC-SHA256 key; signing is off when unset or empty.
    #[serde(default)]
    pub sign_key: Option<String>,
    /// Path to the collector's RSA public key; encryption is off when unset.
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,
}

fn default_server_address() -> String {
    "localhost:8080".to_string()
}

fn default_report_interval() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    2
}

fn default_rate_limit() -> usize {
    3
}

fn default_request_timeout() -> u64 {
    3
}

fn default_store_timeout() -> u64 {
    2
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            report_interval_secs: default_report_interval(),
            poll_interval_secs: default_poll_interval(),
            rate_limit: default_rate_limit(),
            sign_key: None,
            crypto_key: None,
            request_timeout_secs: default_request_timeout(),
            store_timeout_secs: default_store_timeout(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid {name}='{raw}': {e}"))
}

impl AgentConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        let config: Self = toml::from_str(&content).with_context(|| format!("parsing {path}"))?;
        Ok(config)
    }

    /// Apply `ADDRESS`, `REPORT_INTERVAL`, `POLL_INTERVAL`, `RATE_LIMIT`,
    /// `KEY` and `CRYPTO_KEY` from the process environment.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ADDRESS") {
            self.server_address = v;
        }
        if let Some(v) = lookup("REPORT_INTERVAL") {
            self.report_interval_secs = parse_env("REPORT_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("POLL_INTERVAL") {
            self.poll_interval_secs = parse_env("POLL_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("RATE_LIMIT") {
            self.rate_limit = parse_env("RATE_LIMIT", &v)?;
        }
        if let Some(v) = lookup("KEY") {
            self.sign_key = Some(v);
        }
        if let Some(v) = lookup("CRYPTO_KEY") {
            self.crypto_key = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_address.trim().is_empty() {
            bail!("server_address must not be empty");
        }
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be greater than zero");
        }
        if self.report_interval_secs == 0 {
            bail!("report_interval_secs must be greater than zero");
        }
        if self.rate_limit == 0 {
            bail!("rate_limit must be at least 1");
        }
        if self.request_timeout_secs == 0 || self.store_timeout_secs == 0 {
            bail!("timeouts must be greater than zero");
        }
        Ok(())
    }

    /// Batch endpoint built from `server_address`.
    pub fn report_url(&self) -> String {
        let addr = self.server_address.trim().trim_end_matches('/');
        if addr.contains("://") {
            format!("{addr}/updates/")
        } else {
            format!("http://{addr}/updates/")
        }
    }

    pub fn sign_key_bytes(&self) -> Option<Vec<u8>> {
        self.sign_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(|k| k.as_bytes().to_vec())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}
