use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use metron_storage::StoreConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, `host:port`.
    #[serde(default = "default_address")]
    pub address: String,
    /// Snapshot period for the file backend; 0 writes after every update.
    #[serde(default = "default_store_interval")]
    pub store_interval_secs: u64,
    /// Snapshot file; an empty value disables the file backend.
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: String,
    /// Load the snapshot file at startup.
    #[serde(default = "default_restore")]
    pub restore: bool,
    /// SQLite DSN; takes precedence over the file backend when set.
    #[serde(default)]
    pub database_dsn: Option<String>,
    /// HMAC-SHA256 key used to verify `HashSHA256`.
    #[serde(default)]
    pub sign_key: Option<String>,
    /// Path to the RSA private key used to decrypt request bodies.
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    /// Deadline for each request's store call.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_store_interval() -> u64 {
    300
}

fn default_file_storage_path() -> String {
    "/tmp/metrics-db.json".to_string()
}

fn default_restore() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            store_interval_secs: default_store_interval(),
            file_storage_path: default_file_storage_path(),
            restore: default_restore(),
            database_dsn: None,
            sign_key: None,
            crypto_key: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn parse_bool(name: &str, raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("invalid {name}='{raw}': expected a boolean"),
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        let config: Self = toml::from_str(&content).with_context(|| format!("parsing {path}"))?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ADDRESS") {
            self.address = v;
        }
        if let Some(v) = lookup("STORE_INTERVAL") {
            self.store_interval_secs = v
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid STORE_INTERVAL='{v}': {e}"))?;
        }
        if let Some(v) = lookup("FILE_STORAGE_PATH") {
            self.file_storage_path = v;
        }
        if let Some(v) = lookup("RESTORE") {
            self.restore = parse_bool("RESTORE", &v)?;
        }
        if let Some(v) = lookup("DATABASE_DSN") {
            self.database_dsn = Some(v);
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
        if self.address.trim().is_empty() {
            bail!("address must not be empty");
        }
        if self.request_timeout_ms == 0 {
            bail!("request_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    /// Backend by precedence: database DSN, then snapshot file, then memory.
    pub fn store_config(&self) -> StoreConfig {
        if let Some(dsn) = self.database_dsn.as_deref().filter(|d| !d.trim().is_empty()) {
            return StoreConfig::Sqlite { dsn: dsn.to_string() };
        }
        if !self.file_storage_path.trim().is_empty() {
            return StoreConfig::File {
                path: PathBuf::from(&self.file_storage_path),
                interval: Duration::from_secs(self.store_interval_secs),
                restore: self.restore,
            };
        }
        StoreConfig::Memory
    }

    pub fn sign_key_bytes(&self) -> Option<Vec<u8>> {
        self.sign_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(|k| k.as_bytes().to_vec())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
