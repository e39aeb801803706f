//! `config.toml`: cache, image and processing settings.
//!
//! Handles loading, validating, and merging `config.toml`. The file lives in
//! the content root and is never loaded as a content node. Stock defaults are
//! the base layer; user values override them key by key.
//!
//! ## Configuration Options
//!
//! ```toml
//! # Every key may be omitted; these are the defaults
//!
//! base_url = ""              # Prefix for absolute hrefs
//!
//! [cache]
//! directory = ".sitegraph-cache"  # Relative to the content root
//! heap_entries = 50          # Entries kept in memory per cache
//! disk_size_mb = 50          # Disk budget per cache
//!
//! [images]
//! webp = true                # Add a WebP alternate to every transform
//! quality = 90               # JPEG encoding quality (1-100)
//!
//! [processing]
//! max_processes = 4          # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys fail the load.

use crate::cache::{CacheCapacity, CacheError};
use crate::imaging::Quality;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the configuration file in the content root.
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config value: {0}")]
    Validation(String),
}

/// Settings read from the content root's `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Prefix for absolute hrefs, e.g. `https://example.com`.
    pub base_url: String,
    pub cache: CacheConfig,
    pub images: ImagesConfig,
    pub processing: ProcessingConfig,
}

impl SiteConfig {
    /// Range-check values that deserialize fine but make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url_ok = self.base_url.is_empty()
            || self.base_url.starts_with("http://")
            || self.base_url.starts_with("https://");
        let checks = [
            (base_url_ok, "base_url must be empty or start with http:// or https://"),
            (!self.cache.directory.trim().is_empty(), "cache.directory is empty"),
            (self.cache.heap_entries > 0, "cache.heap_entries must be at least 1"),
            (self.cache.disk_size_mb > 0, "cache.disk_size_mb must be at least 1"),
            ((1..=100).contains(&self.images.quality), "images.quality must be within 1..=100"),
        ];
        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, message)) => Err(ConfigError::Validation((*message).to_string())),
            None => Ok(()),
        }
    }
}

/// Derived-asset cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub directory: String,
    pub heap_entries: usize,
    pub disk_size_mb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: ".sitegraph-cache".to_string(),
            heap_entries: 50,
            disk_size_mb: 50,
        }
    }
}

impl CacheConfig {
    /// Cache root for a content directory.
    pub fn root(&self, content_root: &Path) -> PathBuf {
        content_root.join(&self.directory)
    }

    pub fn capacity(&self) -> Result<CacheCapacity, CacheError> {
        CacheCapacity::new(
            self.heap_entries,
            self.disk_size_mb.saturating_mul(1024 * 1024),
        )
    }
}

/// Image transform settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Whether transforms add a WebP alternate source.
    pub webp: bool,
    pub quality: u32,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            webp: true,
            quality: 90,
        }
    }
}

impl ImagesConfig {
    pub fn quality(&self) -> Quality {
        Quality::new(self.quality)
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Upper bound on rayon workers; unset means one per core.
    pub max_processes: Option<usize>,
}

/// Worker count: `max_processes` clamped to `1..=cores`, or `cores` when unset.
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Layered loading
// =============================================================================

/// `SiteConfig::default()` as a TOML table, the bottom layer of every load.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(SiteConfig::default())?)
}

/// Lay `overlay` over `base`. Tables merge per key, recursively; any other
/// overlay value replaces the base value outright.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the directory has no config file.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let path = dir.join(CONFIG_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    Ok(Some(toml::from_str(&fs::read_to_string(&path)?)?))
}

/// Load config from the content root, merged over stock defaults and
/// validated.
pub fn load_config(root: &Path) -> Result<SiteConfig, ConfigError> {
    let merged = match load_raw_config(root)? {
        Some(overlay) => merge_toml(stock_defaults_value()?, overlay),
        None => stock_defaults_value()?,
    };
    let config: SiteConfig = merged.try_into()?;
    config.validate()?;
    tracing::debug!(?config, "loaded config");
    Ok(config)
}

/// Documented `config.toml` printed by `sitegraph gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# sitegraph configuration
# =======================
# Every key is optional; delete whatever you leave at its default.
# Values shown below are the defaults. Unknown keys will cause an error.
#
# Place this file in the content root as config.toml.

# Prefix for absolute hrefs (e.g. "https://example.com"). Relative hrefs
# ("/blog/first/") are used when empty.
base_url = ""

# ---------------------------------------------------------------------------
# Derived-asset cache
# ---------------------------------------------------------------------------
[cache]
# Cache location, relative to the content root. Skipped when loading content.
directory = ".sitegraph-cache"

# Entries kept in memory per cache (least recently used are dropped first).
heap_entries = 50

# Disk budget per cache in megabytes, counting index records and artifacts.
disk_size_mb = 50

# ---------------------------------------------------------------------------
# Image transforms
# ---------------------------------------------------------------------------
[images]
# Produce a WebP alternate next to every resized image.
webp = true

# JPEG encoding quality (1 = worst, 100 = best). WebP output is lossless.
quality = 90

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers.
# Unset means one worker per CPU core.
# max_processes = 4
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = SiteConfig::default();
        assert_eq!(config.base_url, "");
        assert_eq!(config.cache.directory, ".sitegraph-cache");
        assert_eq!(config.cache.heap_entries, 50);
        assert_eq!(config.cache.disk_size_mb, 50);
        assert!(config.images.webp);
        assert_eq!(config.images.quality, 90);
        assert_eq!(config.processing.max_processes, None);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r##"
[images]
webp = false
"##;
        let config: SiteConfig = toml::from_str(toml).unwrap();
        assert!(!config.images.webp);
        // Unspecified values are defaults
        assert_eq!(config.images.quality, 90);
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn cache_capacity_from_config() {
        let config = CacheConfig {
            heap_entries: 10,
            disk_size_mb: 2,
            ..CacheConfig::default()
        };
        let capacity = config.capacity().unwrap();
        assert_eq!(capacity.heap_entries.get(), 10);
        assert_eq!(capacity.disk_bytes, 2 * 1024 * 1024);
    }

    #[test]
    fn cache_root_is_relative_to_content() {
        let config = CacheConfig::default();
        assert_eq!(
            config.root(Path::new("/site/content")),
            PathBuf::from("/site/content/.sitegraph-cache")
        );
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config, SiteConfig::default());
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILE),
            r##"
base_url = "https://example.com"

[cache]
heap_entries = 5
"##,
        )
        .unwrap();

        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.base_url, "https://example.com");
        assert_eq!(config.cache.heap_entries, 5);
        assert_eq!(config.cache.disk_size_mb, 50);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), "this is not valid toml [[[").unwrap();
        assert!(matches!(load_config(tmp.path()), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_key_rejected() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), "[cache]\nsize = 3\n").unwrap();
        assert!(load_config(tmp.path()).is_err());
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn validate_default_config_passes() {
        assert!(SiteConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut config = SiteConfig::default();
        config.cache.heap_entries = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = SiteConfig::default();
        config.cache.disk_size_mb = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_rejects_relative_base_url() {
        let config = SiteConfig {
            base_url: "example.com".into(),
            ..SiteConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_quality_bounds() {
        let mut config = SiteConfig::default();
        config.images.quality = 101;
        assert!(config.validate().is_err());
        config.images.quality = 100;
        assert!(config.validate().is_ok());
    }

    // =========================================================================
    // merge_toml
    // =========================================================================

    #[test]
    fn merge_toml_table_merge() {
        let base: toml::Value =
            toml::from_str("[cache]\nheap_entries = 50\ndisk_size_mb = 50\n").unwrap();
        let overlay: toml::Value = toml::from_str("[cache]\nheap_entries = 7\n").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["cache"]["heap_entries"].as_integer(), Some(7));
        assert_eq!(merged["cache"]["disk_size_mb"].as_integer(), Some(50));
    }

    #[test]
    fn merge_toml_scalar_override() {
        let merged = merge_toml(toml::Value::Integer(1), toml::Value::Integer(2));
        assert_eq!(merged.as_integer(), Some(2));
    }

    // =========================================================================
    // Threads
    // =========================================================================

    #[test]
    fn effective_threads_auto() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_threads(&ProcessingConfig::default()), cores);
    }

    #[test]
    fn effective_threads_user_constrains_down() {
        let config = ProcessingConfig {
            max_processes: Some(1),
        };
        assert_eq!(effective_threads(&config), 1);
    }

    // =========================================================================
    // Stock config
    // =========================================================================

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let config: SiteConfig = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(config, SiteConfig::default());
    }

    #[test]
    fn stock_defaults_value_has_all_sections() {
        let value = stock_defaults_value().unwrap();
        let table = value.as_table().unwrap();
        for key in ["base_url", "cache", "images", "processing"] {
            assert!(table.contains_key(key), "missing {key}");
        }
    }
}
