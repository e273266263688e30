use crate::linalg::FactorizationOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_RANK: usize = 10;
pub const DEFAULT_MAX_ITER: usize = 4;

/// Where exact verification runs relative to the candidate scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Scan workers see only their slice of the embedding; candidates are
    /// verified afterwards by the coordinator.
    Local,
    /// Each worker scans and verifies its own partition against the shared
    /// standardized matrix.
    Distributed,
}

/// Every knob of a search except the query itself.
///
/// Loadable from a TOML file; missing keys fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Target embedding dimension `p`.
    pub rank: usize,
    /// Also report pairs whose correlation is at most `-t`.
    pub include_anti: bool,
    pub filter_mode: FilterMode,
    /// Stop after the factorization and return its state for reuse.
    pub dry_run: bool,
    /// Threshold relaxation passes allowed for [`crate::Query::Top`].
    pub max_iter: usize,
    pub factorization: FactorizationOptions,
    /// Worker threads for the rayon dispatcher; `None` uses every core.
    pub threads: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            rank: DEFAULT_RANK,
            include_anti: false,
            filter_mode: FilterMode::Distributed,
            dry_run: false,
            max_iter: DEFAULT_MAX_ITER,
            factorization: FactorizationOptions::default(),
            threads: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// Writes any serializable value as pretty TOML.
pub(crate) fn save_toml<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    let toml_string = toml::to_string_pretty(value)?;
    let mut file = BufWriter::new(fs::File::create(path)?);
    file.write_all(toml_string.as_bytes())?;
    file.flush()?;
    Ok(())
}

pub(crate) fn load_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let toml_string = fs::read_to_string(path)?;
    Ok(toml::from_str(&toml_string)?)
}

impl SearchOptions {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_toml(path.as_ref())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        save_toml(self, path.as_ref())
    }
}
