//! Configuration loading
//!
//! Handles parsing of `chaintask.toml`. Every field has a default; secrets and
//! endpoints can be overridden from the environment.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chaintask_core::app::ReminderConfig;
use chaintask_core::domain::Address;
use chaintask_core::source::SourceConfig;

pub const ENV_JWT_SECRET: &str = "CHAINTASK_JWT_SECRET";
pub const ENV_RPC_URL: &str = "CHAINTASK_RPC_URL";
pub const ENV_CONTRACT_ADDRESS: &str = "CHAINTASK_CONTRACT_ADDRESS";
pub const ENV_DB: &str = "CHAINTASK_DB";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub chain: ChainConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub reminders: RemindersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Allowed CORS origin; `*` allows any.
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_cors_origin() -> String {
    "http://localhost:5173".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origin: default_cors_origin(),
        }
    }
}

/// Ledger connection and scanning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Task-list contract to mirror. Required.
    #[serde(default)]
    pub contract_address: String,

    /// First block to scan; unset follows from the current head.
    #[serde(default)]
    pub start_block: Option<u64>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,

    #[serde(default)]
    pub confirmations: u64,

    /// Blocks re-scanned after the node was unreachable.
    #[serde(default = "default_rescan_overlap")]
    pub rescan_overlap: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_max_block_range() -> u64 {
    2_000
}

fn default_rescan_overlap() -> u64 {
    20
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            contract_address: String::new(),
            start_block: None,
            poll_interval_ms: default_poll_interval_ms(),
            max_block_range: default_max_block_range(),
            confirmations: 0,
            rescan_overlap: default_rescan_overlap(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ChainConfig {
    pub fn contract(&self) -> Result<Address> {
        if self.contract_address.trim().is_empty() {
            bail!("chain.contract_address is not set (or set {ENV_CONTRACT_ADDRESS})");
        }
        Address::parse(&self.contract_address).context("chain.contract_address")
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            start_block: self.start_block,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            max_block_range: self.max_block_range.max(1),
            confirmations: self.confirmations,
            rescan_overlap: self.rescan_overlap,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret. Required.
    #[serde(default)]
    pub jwt_secret: String,

    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

fn default_token_ttl_secs() -> u64 {
    2 * 60 * 60
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> chrono::Duration {
        seconds(self.token_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file; `:memory:` keeps everything in memory.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("chaintask.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemindersConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_reminder_interval_secs")]
    pub interval_secs: u64,

    /// How long before the due date a reminder goes out.
    #[serde(default = "default_reminder_lead_secs")]
    pub lead_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_reminder_interval_secs() -> u64 {
    60
}

fn default_reminder_lead_secs() -> u64 {
    300
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reminder_interval_secs(),
            lead_secs: default_reminder_lead_secs(),
        }
    }
}

impl RemindersConfig {
    pub fn reminder_config(&self) -> ReminderConfig {
        ReminderConfig {
            interval: Duration::from_secs(self.interval_secs.max(1)),
            lead: seconds(self.lead_secs),
        }
    }
}

// chrono panics above i64::MAX milliseconds
fn seconds(secs: u64) -> chrono::Duration {
    const MAX_SECS: i64 = i64::MAX / 1_000;
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(MAX_SECS).min(MAX_SECS))
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("invalid configuration")
    }

    /// Load from `path`, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                Self::from_toml(&raw).with_context(|| format!("parsing {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply `CHAINTASK_*` overrides from `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup(ENV_JWT_SECRET) {
            self.auth.jwt_secret = secret;
        }
        if let Some(url) = lookup(ENV_RPC_URL) {
            self.chain.rpc_url = url;
        }
        if let Some(contract) = lookup(ENV_CONTRACT_ADDRESS) {
            self.chain.contract_address = contract;
        }
        if let Some(db) = lookup(ENV_DB) {
            self.store.path = PathBuf::from(db);
        }
    }

    /// Fails fast on settings the server cannot start without.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.trim().is_empty() {
            bail!("auth.jwt_secret is not set (or set {ENV_JWT_SECRET})");
        }
        self.chain.contract()?;
        Ok(())
    }
}
