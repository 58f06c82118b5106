use std::path::PathBuf;

use anyhow::{Context, Result};

use ember_crypto::keys::{DEFAULT_ITERATIONS, MIN_ITERATIONS};
use ember_db::SNAPSHOT_KEY;
use ember_types::api::MAX_ATTACHMENT_BYTES;

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory backing `FileStorage`.
    pub data_dir: PathBuf,
    /// Storage key holding the store image.
    pub snapshot_key: String,
    pub kdf_iterations: u32,
    pub max_attachment_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("ember-data"),
            snapshot_key: SNAPSHOT_KEY.to_string(),
            kdf_iterations: DEFAULT_ITERATIONS,
            max_attachment_bytes: MAX_ATTACHMENT_BYTES,
        }
    }
}

impl Config {
    /// Read `EMBER_*` variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let data_dir = get("EMBER_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir);
        let snapshot_key = get("EMBER_SNAPSHOT_KEY").unwrap_or(defaults.snapshot_key);

        let kdf_iterations: u32 = match get("EMBER_KDF_ITERATIONS") {
            Some(raw) => raw.parse().context("EMBER_KDF_ITERATIONS must be an integer")?,
            None => defaults.kdf_iterations,
        };

        let max_attachment_bytes: u64 = match get("EMBER_MAX_ATTACHMENT_BYTES") {
            Some(raw) => raw.parse().context("EMBER_MAX_ATTACHMENT_BYTES must be an integer")?,
            None => defaults.max_attachment_bytes,
        };

        Ok(Self {
            data_dir,
            snapshot_key,
            kdf_iterations: kdf_iterations.max(MIN_ITERATIONS),
            max_attachment_bytes: max_attachment_bytes.min(MAX_ATTACHMENT_BYTES),
        })
    }
}
