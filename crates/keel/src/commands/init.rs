//! Implementation of the `init` command.
//!
//! Creates the `.keel/` directory with a default configuration, an empty
//! export file and a `.gitignore` that keeps the local store out of git.

use crate::config::KeelConfig;
use crate::error::{Error, Result};
use crate::paths::{KEEL_DIR_NAME, WorkspacePaths, is_initialized};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

pub use crate::config::DEFAULT_PREFIX;

/// Name of the gitignore file within .keel
pub const GITIGNORE_FILE_NAME: &str = ".gitignore";

/// Accepted prefix lengths.
pub const PREFIX_LENGTH: std::ops::RangeInclusive<usize> = 2..=20;

/// What [`init`] created.
#[derive(Debug, Clone)]
pub struct InitResult {
    /// Resolved workspace paths
    pub paths: WorkspacePaths,

    /// Path to the config file
    pub config_file: PathBuf,

    /// Path to the empty export file
    pub export_file: PathBuf,

    /// Path to the `.gitignore` inside `.keel/`
    pub gitignore_file: PathBuf,

    /// The validated prefix
    pub prefix: String,
}

/// Check a new workspace prefix: 2-20 ASCII letters or digits.
///
/// Stricter than [`crate::id_generation::validate_prefix`], which also
/// accepts the hyphenated workflow variants an existing store may contain.
///
/// # Errors
///
/// `Error::Config` naming the violated rule.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    let rule = if prefix.len() < *PREFIX_LENGTH.start() {
        format!("must be at least {} characters", PREFIX_LENGTH.start())
    } else if prefix.len() > *PREFIX_LENGTH.end() {
        format!("cannot exceed {} characters", PREFIX_LENGTH.end())
    } else if !prefix.bytes().all(|b| b.is_ascii_alphanumeric()) {
        "must contain only alphanumeric characters".to_string()
    } else {
        return Ok(());
    };
    Err(Error::Config(format!("Prefix '{prefix}' {rule}")))
}

/// Initialize a new keel workspace in `base_dir`.
///
/// # Errors
///
/// Returns an error if:
/// - `.keel/` already exists
/// - The prefix is invalid
/// - File system operations fail
pub async fn init(base_dir: &Path, prefix: Option<&str>) -> Result<InitResult> {
    let prefix = prefix.unwrap_or(DEFAULT_PREFIX).trim();
    validate_prefix(prefix)?;

    if is_initialized(base_dir) {
        return Err(Error::Config(format!(
            "keel is already initialized in this directory. Found existing '{KEEL_DIR_NAME}'"
        )));
    }

    let paths = WorkspacePaths::at(base_dir);
    fs::create_dir_all(paths.keel_dir()).await?;

    let config_file = paths.config_file();
    let config = KeelConfig::new(prefix);
    config.save(&config_file).await?;

    let export_file = config.export_file(paths.keel_dir());
    fs::write(&export_file, "").await?;

    let gitignore_file = paths.keel_dir().join(GITIGNORE_FILE_NAME);
    let gitignore_content = format!(
        "# Local store state; the export file is what gets committed\n{}\n{}.tmp*\n",
        config.storage.data_file, config.storage.data_file
    );
    fs::write(&gitignore_file, gitignore_content).await?;

    info!(prefix, root = %base_dir.display(), "Initialized keel workspace");
    Ok(InitResult {
        paths,
        config_file,
        export_file,
        gitignore_file,
        prefix: prefix.to_string(),
    })
}
