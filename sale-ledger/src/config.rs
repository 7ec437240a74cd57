//! Configuration for the sale ledger

use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
///
/// Missing TOML tables and keys fall back to [`Config::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Namespace label mixed into every storage key
    pub namespace: String,

    /// Owning principal for configuration capability
    pub owner: Address,

    /// Sale timing defaults
    pub sale: SaleDefaults,

    /// Issuance collaborator contract
    pub issuance: IssuanceConfig,

    /// Allowlist verification
    pub allowlist: AllowlistConfig,

    /// Actor mailbox configuration
    pub actor: ActorConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/sale-ledger"),
            service_name: "sale-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            namespace: "default".to_string(),
            owner: Address::ZERO,
            sale: SaleDefaults::default(),
            issuance: IssuanceConfig::default(),
            allowlist: AllowlistConfig::default(),
            actor: ActorConfig::default(),
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// Sale timing defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleDefaults {
    /// Gap between sale start and redemption start applied by `configure` (seconds)
    pub redemption_delay_secs: i64,
}

impl SaleDefaults {
    /// Redemption delay as a duration
    pub fn redemption_delay(&self) -> crate::Result<chrono::Duration> {
        if self.redemption_delay_secs < 0 {
            return Err(crate::Error::Config(
                "sale.redemption_delay_secs must not be negative".to_string(),
            ));
        }
        chrono::Duration::try_seconds(self.redemption_delay_secs).ok_or_else(|| {
            crate::Error::Config(format!(
                "sale.redemption_delay_secs {} is out of range",
                self.redemption_delay_secs
            ))
        })
    }
}

impl Default for SaleDefaults {
    fn default() -> Self {
        Self {
            redemption_delay_secs: 86_400, // 1 day
        }
    }
}

/// Issuance collaborator contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuanceConfig {
    /// Smallest asset denomination minted per redeemed unit
    pub unit_scale: u64,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            unit_scale: 1_000_000_000_000_000_000, // 10^18
        }
    }
}

/// Allowlist verification mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowlistMode {
    /// Proofs are checked against the allowlist root
    Enforced,
    /// Every proof is accepted
    Disabled,
}

/// Allowlist configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowlistConfig {
    /// Verification mode
    pub mode: AllowlistMode,
}

impl Default for AllowlistConfig {
    fn default() -> Self {
        Self {
            mode: AllowlistMode::Disabled,
        }
    }
}

/// Actor mailbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Bounded mailbox capacity (messages)
    pub mailbox_capacity: usize,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// fsync every committed operation
    pub sync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 16,
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            sync_writes: true,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("SALE_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(namespace) = std::env::var("SALE_LEDGER_NAMESPACE") {
            config.namespace = namespace;
        }

        if let Ok(owner) = std::env::var("SALE_LEDGER_OWNER") {
            config.owner = owner.parse()?;
        }

        if let Ok(mode) = std::env::var("SALE_LEDGER_ALLOWLIST") {
            config.allowlist.mode = match mode.as_str() {
                "enforced" => AllowlistMode::Enforced,
                "disabled" => AllowlistMode::Disabled,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown allowlist mode: {}",
                        other
                    )))
                }
            };
        }

        Ok(config)
    }

    /// Sanity-check values that would otherwise fail late
    pub fn validate(&self) -> crate::Result<()> {
        if self.namespace.is_empty() {
            return Err(crate::Error::Config("namespace must not be empty".to_string()));
        }
        if self.owner.is_zero() {
            return Err(crate::Error::Config(
                "owner must be set to a non-zero address".to_string(),
            ));
        }
        self.sale.redemption_delay()?;
        if self.issuance.unit_scale == 0 {
            return Err(crate::Error::Config(
                "issuance.unit_scale must be positive".to_string(),
            ));
        }
        if self.actor.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "actor.mailbox_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
