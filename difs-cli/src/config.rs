use difs_core::{DifsError, KeyChain, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_forwarder_url")]
    pub forwarder_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// URL the forwarder uses to reach this process; derived from
    /// `listen_addr` when unset.
    #[serde(default)]
    pub advertise_url: Option<String>,
    #[serde(default = "default_interest_lifetime_ms")]
    pub interest_lifetime_ms: u64,
    #[serde(default = "default_freshness_period_ms")]
    pub freshness_period_ms: u64,
    #[serde(default = "default_check_period_ms")]
    pub check_period_ms: u64,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_identity")]
    pub default_identity: String,
    #[serde(default)]
    pub identity_for_data: Option<String>,
    #[serde(default)]
    pub identity_for_command: Option<String>,
    #[serde(default)]
    pub identities: Vec<IdentityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub name: String,
    /// Hex-encoded 32-byte Ed25519 seed.
    pub seed: String,
}

fn default_forwarder_url() -> String {
    "http://127.0.0.1:6363".to_string()
}

fn default_listen_addr() -> String {
    "127.0.0.1:6464".to_string()
}

fn default_interest_lifetime_ms() -> u64 {
    difs_core::DEFAULT_INTEREST_LIFETIME.as_millis() as u64
}

fn default_freshness_period_ms() -> u64 {
    difs_core::DEFAULT_FRESHNESS_PERIOD.as_millis() as u64
}

fn default_check_period_ms() -> u64 {
    difs_core::DEFAULT_CHECK_PERIOD.as_millis() as u64
}

fn default_block_size() -> usize {
    difs_core::DEFAULT_BLOCK_SIZE
}

fn default_identity() -> String {
    "/localhost/difs".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            forwarder_url: default_forwarder_url(),
            listen_addr: default_listen_addr(),
            advertise_url: None,
            interest_lifetime_ms: default_interest_lifetime_ms(),
            freshness_period_ms: default_freshness_period_ms(),
            check_period_ms: default_check_period_ms(),
            block_size: default_block_size(),
            default_identity: default_identity(),
            identity_for_data: None,
            identity_for_command: None,
            identities: Vec::new(),
        }
    }
}

impl Config {
    /// Layer `DIFS_*` environment variables over an optional config file.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path));
        }

        let settings = builder
            .add_source(::config::Environment::with_prefix("DIFS"))
            .build()
            .map_err(|e| DifsError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| DifsError::Config(e.to_string()))?;

        if config.block_size == 0 {
            return Err(DifsError::Config("block_size must be positive".to_string()));
        }
        Ok(config)
    }

    pub fn interest_lifetime(&self) -> Duration {
        Duration::from_millis(self.interest_lifetime_ms)
    }

    /// Key chain holding every configured identity. The default identity
    /// gets a fresh key when no seed is configured for it.
    pub fn keychain(&self) -> Result<KeyChain> {
        let mut keychain = KeyChain::generate(self.default_identity.clone());
        for identity in &self.identities {
            keychain.add_identity_hex(identity.name.clone(), &identity.seed)?;
        }
        Ok(keychain)
    }
}
