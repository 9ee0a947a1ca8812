//! Configuration management
//!
//! Loads configuration from config.toml, falling back to the copy embedded
//! in the binary:
//! - Server binding settings
//! - Auction timing and reward curve defaults
//! - Database location
//! - Signature backend used to settle verification requests

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::block::DEFAULT_GROWTH_SPEED;
use crate::device::{HardwareSigner, StreamChannel};
use crate::encoding::decode_hex;
use crate::engine::AcceptanceRule;
use crate::signing::{SignatureService, Sr25519Keyring};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub auction: AuctionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub signing: SigningConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Auction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionConfig {
    /// Seconds between auction rounds
    pub tick_interval_secs: u64,
    /// Lifetime of one auction loop
    pub round_duration_secs: u64,
    /// Growth speed applied when a block does not set its own
    pub default_growth_speed: f64,
    #[serde(default)]
    pub acceptance: AcceptanceRule,
}

impl AuctionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn round_duration(&self) -> Duration {
        Duration::from_secs(self.round_duration_secs)
    }
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 1,
            round_duration_secs: 3600,
            default_growth_speed: DEFAULT_GROWTH_SPEED,
            acceptance: AcceptanceRule::default(),
        }
    }
}

/// SQLite database location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "auction.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningBackend {
    /// `POST /requests/:id/check` is refused.
    #[default]
    None,
    /// In-process sr25519 keys.
    Keyring,
    /// Hardware signer on a serial device node.
    Device,
}

/// Signature collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    #[serde(default)]
    pub backend: SigningBackend,
    /// Keyring only: file holding a hex-encoded 32-byte seed.
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
    /// Keyring only: slot the seed is installed in.
    #[serde(default)]
    pub key_id: u8,
    /// Device only: node opened for reading and writing.
    #[serde(default)]
    pub device_path: Option<PathBuf>,
    /// Device only: wait between writing a command and reading the answer.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_settle_ms() -> u64 {
    100
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            backend: SigningBackend::None,
            seed_file: None,
            key_id: 0,
            device_path: None,
            settle_ms: default_settle_ms(),
        }
    }
}

impl SigningConfig {
    /// Build the configured signature collaborator, if any.
    pub fn build_signer(&self) -> Result<Option<Arc<dyn SignatureService>>> {
        match self.backend {
            SigningBackend::None => Ok(None),
            SigningBackend::Keyring => {
                let path = self
                    .seed_file
                    .as_ref()
                    .context("signing.seed_file is required for the keyring backend")?;
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read seed file {}", path.display()))?;
                let seed: [u8; 32] = decode_hex(text.trim())?
                    .try_into()
                    .map_err(|bytes: Vec<u8>| {
                        anyhow::anyhow!("seed must be 32 bytes, got {}", bytes.len())
                    })?;
                let keyring = Sr25519Keyring::new();
                keyring.insert_seed(self.key_id, &seed)?;
                Ok(Some(Arc::new(keyring)))
            }
            SigningBackend::Device => {
                let path = self
                    .device_path
                    .as_ref()
                    .context("signing.device_path is required for the device backend")?;
                let port = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(path)
                    .with_context(|| format!("Failed to open signing device {}", path.display()))?;
                let channel =
                    StreamChannel::with_settle(port, Duration::from_millis(self.settle_ms));
                Ok(Some(Arc::new(HardwareSigner::new(channel))))
            }
        }
    }
}

impl Config {
    /// Load from config.toml or use defaults
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load from specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let config: Self = if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse default config")?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let k = self.auction.default_growth_speed;
        if !k.is_finite() || k <= 0.0 {
            anyhow::bail!("auction.default_growth_speed must be positive, got {}", k);
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            auction: AuctionConfig::default(),
            storage: StorageConfig::default(),
            signing: SigningConfig::default(),
        })
    }
}
