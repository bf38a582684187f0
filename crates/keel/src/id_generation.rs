//! Identifier allocation for keel issues.
//!
//! Two top-level ID shapes are supported:
//!
//! - **Hash** (default): `{prefix}-{token}` where the token is a base36 slice of
//!   a SHA-256 digest. The token length adapts to the number of known IDs so
//!   that the birthday collision probability stays under a configured bound.
//! - **Sequential**: `{prefix}-{n}` with a monotonic counter.
//!
//! Hierarchical children extend a parent ID with a dotted counter
//! (`proj-a3f8.1`, `proj-a3f8.1.2`) up to [`MAX_HIERARCHY_DEPTH`] segments.
//!
//! The allocator state is fully reconstructable from the issue set:
//! [`IdGenerator::reserve`] records an existing ID and advances the per-parent
//! child counter and the sequential counter past it.
//!
//! # Example
//!
//! ```
//! use keel::id_generation::{IdGenerator, IdGeneratorConfig};
//!
//! let mut generator = IdGenerator::new(IdGeneratorConfig::new("proj"));
//! let id = generator.allocate("My Issue Title", "Issue description", Some("alice")).unwrap();
//! assert!(id.starts_with("proj-"));
//!
//! let child = generator.allocate_child(&id).unwrap();
//! assert_eq!(child, format!("{id}.1"));
//! ```

use crate::domain::{IssueId, MAX_HIERARCHY_DEPTH};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

const BASE36_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MAX_NONCE: u32 = 100;

/// Errors that can occur during ID allocation
#[derive(Debug, Error)]
pub enum IdGenerationError {
    /// Every nonce collided at every permitted length
    #[error("Unable to generate unique ID after {attempts} attempts")]
    CollisionExhausted {
        /// Total attempts made
        attempts: u32,
    },

    /// The parent of a hierarchical ID is unknown
    #[error("Parent issue not found: {0}")]
    ParentNotFound(String),

    /// The parent is already at maximum hierarchy depth
    #[error("{parent} is at maximum hierarchy depth {max_depth}")]
    DepthExceeded {
        /// Parent ID
        parent: String,
        /// Maximum dotted segments
        max_depth: usize,
    },

    /// Prefix is not 2-20 ASCII alphanumerics or hyphens
    #[error("Invalid prefix '{0}': must be 2-20 characters, alphanumeric or '-', not starting or ending with '-'")]
    InvalidPrefix(String),
}

/// ID shape for new top-level issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdScheme {
    /// Adaptive-length base36 hash token
    #[default]
    Hash,

    /// Monotonic integer counter
    Sequential,
}

/// Configuration for ID allocation
#[derive(Debug, Clone)]
pub struct IdGeneratorConfig {
    /// Prefix for all IDs (e.g., "proj")
    pub prefix: String,

    /// Top-level ID shape
    pub scheme: IdScheme,

    /// Shortest hash token
    pub min_hash_length: usize,

    /// Longest hash token
    pub max_hash_length: usize,

    /// Upper bound on the birthday collision probability for the chosen length
    pub max_collision_probability: f64,
}

impl IdGeneratorConfig {
    /// Hash scheme with 4-8 character tokens and a 25% collision bound.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            scheme: IdScheme::Hash,
            min_hash_length: 4,
            max_hash_length: 8,
            max_collision_probability: 0.25,
        }
    }

    /// Same configuration with the sequential scheme.
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.scheme = IdScheme::Sequential;
        self
    }
}

/// Counters that survive a purge.
///
/// Surviving IDs alone under-count once the highest sequential ID or the
/// last child of a parent has been purged, so stores persist this next to
/// their records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorState {
    /// Highest sequential number handed out
    #[serde(default)]
    pub sequence: u64,

    /// Highest child index handed out, per parent
    #[serde(default)]
    pub child_counters: BTreeMap<String, u32>,
}

/// Collision-resistant ID allocator.
///
/// Holds every ID it has allocated or been told about, so an ID is never
/// handed out twice within one generator's lifetime, including IDs of issues
/// that were later purged.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    config: IdGeneratorConfig,
    existing_ids: HashSet<String>,
    child_counters: HashMap<String, u32>,
    sequence: u64,
}

impl IdGenerator {
    /// Create a new ID generator with the given configuration
    pub fn new(config: IdGeneratorConfig) -> Self {
        Self {
            config,
            existing_ids: HashSet::new(),
            child_counters: HashMap::new(),
            sequence: 0,
        }
    }

    /// Create a generator and reserve every ID in `ids`.
    pub fn with_existing<'a>(
        config: IdGeneratorConfig,
        ids: impl IntoIterator<Item = &'a IssueId>,
    ) -> Self {
        let mut generator = Self::new(config);
        for id in ids {
            generator.reserve(id.as_str());
        }
        generator
    }

    /// The prefix used for new top-level IDs.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &IdGeneratorConfig {
        &self.config
    }

    /// Returns `true` if the ID has been allocated or reserved.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.existing_ids.contains(id)
    }

    /// Current child counter for `parent` (0 if it has no children).
    #[must_use]
    pub fn child_counter(&self, parent: &str) -> u32 {
        self.child_counters.get(parent).copied().unwrap_or(0)
    }

    /// Counters to persist alongside the records.
    #[must_use]
    pub fn state(&self) -> AllocatorState {
        AllocatorState {
            sequence: self.sequence,
            child_counters: self
                .child_counters
                .iter()
                .map(|(parent, counter)| (parent.clone(), *counter))
                .collect(),
        }
    }

    /// Raise the counters to at least those in `state`. Never lowers them.
    pub fn restore(&mut self, state: &AllocatorState) {
        self.sequence = self.sequence.max(state.sequence);
        for (parent, &counter) in &state.child_counters {
            let current = self.child_counters.entry(parent.clone()).or_insert(0);
            *current = (*current).max(counter);
        }
    }

    /// Record an externally supplied ID, for example on load or import.
    ///
    /// Advances the child counter of every ancestor and the sequential
    /// counter so that later allocations never reuse it.
    pub fn reserve(&mut self, id: &str) {
        self.existing_ids.insert(id.to_string());

        let mut current = IssueId::new(id);
        while let (Some(parent), Some(index)) = (current.parent(), current.child_index()) {
            let counter = self.child_counters.entry(parent.0.clone()).or_insert(0);
            *counter = (*counter).max(index);
            current = parent;
        }

        if let Some(n) = id
            .strip_prefix(self.config.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|token| token.parse::<u64>().ok())
        {
            self.sequence = self.sequence.max(n);
        }
    }

    /// Allocate a new top-level ID.
    ///
    /// # Errors
    ///
    /// Returns [`IdGenerationError::CollisionExhausted`] if every nonce collides
    /// at every permitted token length.
    pub fn allocate(
        &mut self,
        title: &str,
        description: &str,
        creator: Option<&str>,
    ) -> Result<String, IdGenerationError> {
        match self.config.scheme {
            IdScheme::Sequential => Ok(self.allocate_sequential()),
            IdScheme::Hash => self.allocate_hash(title, description, creator),
        }
    }

    fn allocate_sequential(&mut self) -> String {
        loop {
            self.sequence += 1;
            let id = format!("{}-{}", self.config.prefix, self.sequence);
            if self.existing_ids.insert(id.clone()) {
                return id;
            }
        }
    }

    fn allocate_hash(
        &mut self,
        title: &str,
        description: &str,
        creator: Option<&str>,
    ) -> Result<String, IdGenerationError> {
        let start_length = self.adaptive_length();
        let max_length = self.config.max_hash_length.max(start_length);
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut attempts = 0;

        for length in start_length..=max_length {
            for nonce in 0..MAX_NONCE {
                attempts += 1;
                let token = hash_token(title, description, creator, timestamp, nonce, length);
                let id = format!("{}-{}", self.config.prefix, token);
                if self.existing_ids.insert(id.clone()) {
                    if nonce > 0 {
                        debug!(nonce, length, "Generated unique ID after collision retries");
                    }
                    return Ok(id);
                }
            }
            warn!(
                length,
                max_nonce = MAX_NONCE,
                "All nonces exhausted, increasing ID length"
            );
        }

        Err(IdGenerationError::CollisionExhausted { attempts })
    }

    /// Allocate the next hierarchical child of `parent` (`parent.{n+1}`).
    ///
    /// # Errors
    ///
    /// - [`IdGenerationError::ParentNotFound`] if `parent` is unknown
    /// - [`IdGenerationError::DepthExceeded`] if `parent` already has
    ///   [`MAX_HIERARCHY_DEPTH`] dotted segments
    pub fn allocate_child(&mut self, parent: &str) -> Result<String, IdGenerationError> {
        if !self.existing_ids.contains(parent) {
            return Err(IdGenerationError::ParentNotFound(parent.to_string()));
        }
        if IssueId::new(parent).hierarchy_depth() >= MAX_HIERARCHY_DEPTH {
            return Err(IdGenerationError::DepthExceeded {
                parent: parent.to_string(),
                max_depth: MAX_HIERARCHY_DEPTH,
            });
        }

        let counter = self.child_counters.entry(parent.to_string()).or_insert(0);
        loop {
            *counter += 1;
            let child_id = format!("{parent}.{counter}");
            if self.existing_ids.insert(child_id.clone()) {
                return Ok(child_id);
            }
        }
    }

    /// Rewrite every known ID and counter key from `old` to `new` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`IdGenerationError::InvalidPrefix`] if `new` is not a valid prefix.
    pub fn rename_prefix(&mut self, old: &str, new: &str) -> Result<(), IdGenerationError> {
        validate_prefix(new)?;

        let rename = |id: &str| -> String {
            IssueId::new(id)
                .with_prefix(old, new)
                .map_or_else(|| id.to_string(), |renamed| renamed.0)
        };

        self.existing_ids = self.existing_ids.iter().map(|id| rename(id)).collect();
        self.child_counters = self
            .child_counters
            .iter()
            .map(|(parent, counter)| (rename(parent), *counter))
            .collect();
        if self.config.prefix == old {
            self.config.prefix = new.to_string();
        }
        Ok(())
    }

    /// Smallest token length within the configured range whose collision
    /// probability for one more ID stays under the bound.
    fn adaptive_length(&self) -> usize {
        let n = self.existing_ids.len() + 1;
        let min = self.config.min_hash_length.max(1);
        let max = self.config.max_hash_length.max(min);
        (min..=max)
            .find(|&length| collision_probability(n, length) <= self.config.max_collision_probability)
            .unwrap_or(max)
    }
}

/// Birthday-bound probability that `n` random tokens of `length` base36
/// characters contain at least one collision.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn collision_probability(n: usize, length: usize) -> f64 {
    let space = 36f64.powi(length as i32);
    let n = n as f64;
    1.0 - (-(n * n) / (2.0 * space)).exp()
}

fn hash_token(
    title: &str,
    description: &str,
    creator: Option<&str>,
    timestamp: i64,
    nonce: u32,
    length: usize,
) -> String {
    let content = format!(
        "{}|{}|{}|{}|{}",
        title,
        description,
        creator.unwrap_or(""),
        timestamp,
        nonce
    );

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash_bytes = hasher.finalize();

    let mut num = [0u8; 16];
    num.copy_from_slice(&hash_bytes[..16]);
    encode_base36(u128::from_be_bytes(num), length)
}

/// Encode the low digits of `n` as exactly `length` base36 characters.
fn encode_base36(mut n: u128, length: usize) -> String {
    let mut digits = Vec::with_capacity(length);
    while digits.len() < length {
        // n % 36 < 36, always a valid index
        #[allow(clippy::cast_possible_truncation)]
        let remainder = (n % 36) as usize;
        digits.push(char::from(BASE36_CHARS[remainder]));
        n /= 36;
    }
    digits.iter().rev().collect()
}

/// Validates a project prefix: 2-20 characters, ASCII alphanumerics or
/// hyphens, not starting or ending with a hyphen.
///
/// # Errors
///
/// Returns [`IdGenerationError::InvalidPrefix`] describing the rejected value.
pub fn validate_prefix(prefix: &str) -> Result<(), IdGenerationError> {
    let valid = (2..=20).contains(&prefix.len())
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !prefix.starts_with('-')
        && !prefix.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(IdGenerationError::InvalidPrefix(prefix.to_string()))
    }
}

/// Validate ID format
///
/// Valid formats:
/// - Base: `{prefix}-{token}` (e.g., "proj-a3f8", "proj-12")
/// - Hierarchical: `{prefix}-{token}.{child}` up to [`MAX_HIERARCHY_DEPTH`] children
#[must_use]
pub fn validate_id(id: &str, prefix: &str) -> bool {
    let Some(rest) = id
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
    else {
        return false;
    };

    let mut parts = rest.split('.');
    let token = parts.next().unwrap_or_default();
    if token.is_empty()
        || !token
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
    {
        return false;
    }

    let children: Vec<&str> = parts.collect();
    children.len() <= MAX_HIERARCHY_DEPTH && children.iter().all(|c| c.parse::<u32>().is_ok())
}

/// Best-effort guess whether a sample of IDs uses the hash scheme.
///
/// Any token containing a letter or a leading zero is hash-like. An
/// all-numeric sample is hash-like when its values are sparse rather than a
/// mostly contiguous run from a counter. Advisory only.
#[must_use]
pub fn looks_hash_based(sample: &[&str]) -> bool {
    let mut numbers = BTreeSet::new();

    for id in sample {
        let base = IssueId::new(*id);
        let Some((_, token)) = base.base().rsplit_once('-') else {
            continue;
        };
        if token.is_empty() {
            continue;
        }
        if token.chars().any(|c| c.is_ascii_alphabetic()) {
            return true;
        }
        if token.len() > 1 && token.starts_with('0') {
            return true;
        }
        if let Ok(n) = token.parse::<u64>() {
            numbers.insert(n);
        }
    }

    match (numbers.first(), numbers.last()) {
        (Some(&min), Some(&max)) if numbers.len() >= 2 => {
            let span = max - min + 1;
            // Counters leave gaps only where issues were purged.
            (numbers.len() as u64) * 2 < span
        }
        _ => false,
    }
}
