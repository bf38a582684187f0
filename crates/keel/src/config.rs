//! Workspace configuration (`.keel/config.yaml`).
//!
//! Every section has defaults, so a file holding only `issue-prefix` loads.
//! The typed settings each engine consumes are derived from here rather
//! than read from the file directly.

use crate::consistency::{
    CheckerSettings, DEFAULT_CLOCK_SKEW_SECS, DEFAULT_MISMATCH_REPORT_CAP,
    DEFAULT_PREFIX_VARIANTS, DEFAULT_SAMPLE_CAP,
};
use crate::error::{Error, Result};
use crate::federation::{DEFAULT_PROBE_TIMEOUT, FederationSettings, ORIGIN};
use crate::graph::{DEFAULT_EXCLUDED_TYPES, DEFAULT_MAX_CYCLE_DEPTH, GraphSettings};
use crate::id_generation::{IdGeneratorConfig, IdScheme};
use crate::storage::BackendOptions;
use crate::sync::DEFAULT_EXPORT_FILE;
use crate::tombstone::{DEFAULT_TTL_DAYS, DEFAULT_WARN_DAYS, TombstonePolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Default issue prefix if none specified
pub const DEFAULT_PREFIX: &str = "proj";

/// Backend name of the in-memory store
pub const MEMORY_BACKEND: &str = "memory";

/// Backend name of the snapshot-persisted store
pub const EMBEDDED_BACKEND: &str = "embedded";

/// Default snapshot file inside `.keel/`
pub const DEFAULT_DATA_FILE: &str = "store.json";

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

/// Contents of `.keel/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeelConfig {
    /// Issue ID prefix (e.g., "proj" for "proj-a3f8")
    #[serde(rename = "issue-prefix")]
    pub issue_prefix: String,

    /// Storage configuration
    pub storage: StorageConfig,

    /// ID allocation
    pub ids: IdsConfig,

    /// Tombstone retention
    pub tombstones: TombstonesConfig,

    /// Consistency checker limits
    pub consistency: ConsistencyConfig,

    /// Graph query limits
    pub graph: GraphConfig,

    /// Ready-work filtering
    pub ready: ReadyConfig,

    /// Federation coordinator
    pub federation: FederationConfig,
}

/// Storage configuration section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Registered backend name (`memory` or `embedded`)
    pub backend: String,

    /// Snapshot file, relative to `.keel/`
    pub data_file: String,

    /// JSONL export file, relative to `.keel/`
    pub export_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: EMBEDDED_BACKEND.to_string(),
            data_file: DEFAULT_DATA_FILE.to_string(),
            export_file: DEFAULT_EXPORT_FILE.to_string(),
        }
    }
}

/// ID allocation section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdsConfig {
    /// `hash` or `sequential`
    pub scheme: IdScheme,
    /// Shortest hash token
    pub min_hash_length: usize,
    /// Longest hash token
    pub max_hash_length: usize,
    /// Collision bound used to pick the hash length
    pub max_collision_probability: f64,
}

impl Default for IdsConfig {
    fn default() -> Self {
        let defaults = IdGeneratorConfig::new(DEFAULT_PREFIX);
        Self {
            scheme: defaults.scheme,
            min_hash_length: defaults.min_hash_length,
            max_hash_length: defaults.max_hash_length,
            max_collision_probability: defaults.max_collision_probability,
        }
    }
}

/// Tombstone section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TombstonesConfig {
    /// Days before a tombstone may be pruned
    pub ttl_days: i64,
    /// Days before expiry that warnings start
    pub warn_days: i64,
}

impl Default for TombstonesConfig {
    fn default() -> Self {
        Self {
            ttl_days: DEFAULT_TTL_DAYS,
            warn_days: DEFAULT_WARN_DAYS,
        }
    }
}

/// Consistency checker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsistencyConfig {
    /// IDs sampled for content comparison
    pub sample_cap: usize,
    /// Mismatches listed per report
    pub mismatch_report_cap: usize,
    /// Tolerated timestamp skew
    pub clock_skew_secs: i64,
    /// Workflow suffixes that do not count as foreign prefixes
    pub prefix_variants: Vec<String>,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            sample_cap: DEFAULT_SAMPLE_CAP,
            mismatch_report_cap: DEFAULT_MISMATCH_REPORT_CAP,
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
            prefix_variants: strings(DEFAULT_PREFIX_VARIANTS),
        }
    }
}

/// Graph section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GraphConfig {
    /// Longest cycle searched for, in edges
    pub max_cycle_depth: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_cycle_depth: DEFAULT_MAX_CYCLE_DEPTH,
        }
    }
}

/// Ready-work section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReadyConfig {
    /// Issue types hidden from ready work
    pub excluded_types: Vec<String>,
}

impl Default for ReadyConfig {
    fn default() -> Self {
        Self {
            excluded_types: strings(DEFAULT_EXCLUDED_TYPES),
        }
    }
}

/// Federation section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FederationConfig {
    /// Bound on each peer call
    pub probe_timeout_secs: u64,
    /// Remotes that are not replication peers
    pub excluded_peers: Vec<String>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT.as_secs(),
            excluded_peers: vec![ORIGIN.to_string()],
        }
    }
}

impl Default for KeelConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl KeelConfig {
    /// Default configuration with the given prefix.
    pub fn new(prefix: &str) -> Self {
        Self {
            issue_prefix: prefix.to_string(),
            storage: StorageConfig::default(),
            ids: IdsConfig::default(),
            tombstones: TombstonesConfig::default(),
            consistency: ConsistencyConfig::default(),
            graph: GraphConfig::default(),
            ready: ReadyConfig::default(),
            federation: FederationConfig::default(),
        }
    }

    /// Load configuration from a file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse YAML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| Error::Config(format!("YAML error: {e}")))?;
        fs::write(path, content).await?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.ids.min_hash_length == 0 || self.ids.min_hash_length > self.ids.max_hash_length {
            return Err(Error::Config(format!(
                "ids.min_hash_length ({}) must be between 1 and ids.max_hash_length ({})",
                self.ids.min_hash_length, self.ids.max_hash_length
            )));
        }
        if !(0.0..=1.0).contains(&self.ids.max_collision_probability) {
            return Err(Error::Config(
                "ids.max_collision_probability must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.tombstones.ttl_days <= 0 || self.tombstones.warn_days < 0 {
            return Err(Error::Config(
                "tombstones.ttl_days must be positive and warn_days non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// ID allocator settings.
    #[must_use]
    pub fn id_generator(&self) -> IdGeneratorConfig {
        IdGeneratorConfig {
            prefix: self.issue_prefix.clone(),
            scheme: self.ids.scheme,
            min_hash_length: self.ids.min_hash_length,
            max_hash_length: self.ids.max_hash_length,
            max_collision_probability: self.ids.max_collision_probability,
        }
    }

    /// Absolute snapshot path for a `.keel` directory.
    #[must_use]
    pub fn data_file(&self, keel_dir: &Path) -> PathBuf {
        keel_dir.join(&self.storage.data_file)
    }

    /// Absolute export path for a `.keel` directory.
    #[must_use]
    pub fn export_file(&self, keel_dir: &Path) -> PathBuf {
        keel_dir.join(&self.storage.export_file)
    }

    /// Options for opening the configured backend.
    #[must_use]
    pub fn backend_options(&self, keel_dir: &Path) -> BackendOptions {
        let options = BackendOptions::new(self.id_generator());
        if self.storage.backend == MEMORY_BACKEND {
            options
        } else {
            options.with_data_file(self.data_file(keel_dir))
        }
    }

    /// Tombstone retention policy.
    #[must_use]
    pub fn tombstone_policy(&self) -> TombstonePolicy {
        TombstonePolicy::from_days(self.tombstones.ttl_days, self.tombstones.warn_days)
    }

    /// Consistency checker settings.
    #[must_use]
    pub fn checker_settings(&self) -> CheckerSettings {
        CheckerSettings {
            sample_cap: self.consistency.sample_cap,
            mismatch_report_cap: self.consistency.mismatch_report_cap,
            clock_skew: chrono::Duration::seconds(self.consistency.clock_skew_secs),
            prefix_variants: self.consistency.prefix_variants.clone(),
            tombstone_ttl: self.tombstone_policy().ttl,
        }
    }

    /// Graph query settings.
    #[must_use]
    pub fn graph_settings(&self) -> GraphSettings {
        GraphSettings {
            max_cycle_depth: self.graph.max_cycle_depth,
            excluded_types: self.ready.excluded_types.clone(),
        }
    }

    /// Federation coordinator settings.
    #[must_use]
    pub fn federation_settings(&self) -> FederationSettings {
        FederationSettings {
            probe_timeout: Duration::from_secs(self.federation.probe_timeout_secs),
            excluded_peers: self.federation.excluded_peers.clone(),
        }
    }
}
