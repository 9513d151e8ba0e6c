//! Run configuration.
//!
//! Handles loading, validating, and merging `static-iiif.toml`. Stock defaults
//! are overridden by an optional user config file in the working directory.
//! The result is one immutable [`AppConfig`] that is passed explicitly to
//! every stage.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [static_outputs]
//! enabled = true            # Produce info.json, manifest.json, tiles, sizes
//! jpeg = true               # Primary format
//! webp = true               # Secondary format, advertised in extraFormats
//! make_pyramid = true       # Static tile pyramid
//! tile_size = 512
//! layout = "v3"             # "v2" (w,), "v3" (w,h) or "v2-and-v3"
//! max = "!1600,1600"        # Saved to full/max/0/; "" for none
//! sizes = ["!100,100", "!200,200", "!400,400", "500,", "!1000,1000"]
//! service_url = ""          # info.json id; "" uses the destination URI
//! quality = 90
//! allow_upscale = true      # false clamps sizes to the source dimensions
//!
//! [file_outputs]
//! # location = "s3://bucket/tiffs"   # Defaults to the destination
//!
//! [[file_outputs.outputs]]
//! format = "pyramidal-tiff"
//! tile_format = "jpg"       # or "webp"
//! quality = 90
//! tile_size = 512
//! # file_name = "custom.tif"
//!
//! [processing]
//! max_processes = 4         # Max parallel workers (omit for auto = CPU cores)
//! # scratch_dir = "/var/tmp/static-iiif"
//! keep_scratch = false
//!
//! [storage]
//! s3_region = "us-east-1"
//! # s3_endpoint = "http://localhost:9000"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::iiif::Layout;
use crate::job::TileFileOutput;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the config file looked up in the working directory.
pub const CONFIG_FILENAME: &str = "static-iiif.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration for one run, loaded from `static-iiif.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Tiles, sized renditions, info.json and manifest.json.
    pub static_outputs: StaticSettings,
    /// Standalone pyramidal files.
    pub file_outputs: FileOutputsConfig,
    /// Parallelism and scratch space.
    pub processing: ProcessingConfig,
    /// Object storage access.
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.static_outputs;
        if s.quality > 100 {
            return Err(ConfigError::Validation(
                "static_outputs.quality must be 0-100".into(),
            ));
        }
        if s.tile_size == 0 {
            return Err(ConfigError::Validation(
                "static_outputs.tile_size must be non-zero".into(),
            ));
        }
        if s.enabled && s.formats().is_empty() {
            return Err(ConfigError::Validation(
                "static_outputs needs at least one of jpeg or webp".into(),
            ));
        }
        for output in &self.file_outputs.outputs {
            if let TileFileOutput::PyramidalTiff {
                quality, tile_size, ..
            } = output
            {
                if *quality > 100 {
                    return Err(ConfigError::Validation(
                        "file_outputs quality must be 0-100".into(),
                    ));
                }
                if *tile_size == 0 || tile_size % 16 != 0 {
                    return Err(ConfigError::Validation(
                        "file_outputs tile_size must be a non-zero multiple of 16".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Settings for the static image service outputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StaticSettings {
    /// Produce static outputs at all.
    pub enabled: bool,
    /// Write JPEG tiles and renditions.
    pub jpeg: bool,
    /// Write WebP tiles and renditions.
    pub webp: bool,
    /// Build a static tile pyramid.
    pub make_pyramid: bool,
    /// Tile edge in pixels.
    pub tile_size: u32,
    /// Size segment layout for tiles and renditions.
    pub layout: Layout,
    /// Size request saved to `full/max/0/`. Blank means none.
    pub max: String,
    /// Size requests saved to `full/{size}/0/`, in order of preference.
    pub sizes: Vec<String>,
    /// The `id` of the generated info.json.
    pub service_url: String,
    /// Encoding quality for tiles and renditions (0 = worst, 100 = best).
    pub quality: u32,
    /// Let resolved sizes exceed the source dimensions.
    pub allow_upscale: bool,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            jpeg: true,
            webp: true,
            make_pyramid: true,
            tile_size: 512,
            layout: Layout::default(),
            max: "!1600,1600".to_string(),
            sizes: vec![
                "!100,100".to_string(),
                "!200,200".to_string(),
                "!400,400".to_string(),
                "500,".to_string(),
                "!1000,1000".to_string(),
            ],
            service_url: String::new(),
            quality: 90,
            allow_upscale: true,
        }
    }
}

impl StaticSettings {
    /// Enabled formats, primary first.
    pub fn formats(&self) -> Vec<crate::imaging::OutputFormat> {
        use crate::imaging::OutputFormat;
        let mut formats = Vec::new();
        if self.jpeg {
            formats.push(OutputFormat::Jpeg);
        }
        if self.webp {
            formats.push(OutputFormat::WebP);
        }
        formats
    }

    /// The `max` request, or `None` when blank.
    pub fn max_request(&self) -> Option<&str> {
        let max = self.max.trim();
        (!max.is_empty()).then_some(max)
    }
}

/// Standalone pyramidal file outputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileOutputsConfig {
    /// Where to write the files. Defaults to the destination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// One entry per file.
    pub outputs: Vec<TileFileOutput>,
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel image processing workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<usize>,
    /// Root for per-job scratch directories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
    /// Leave the scratch directory behind after the job (for debugging).
    pub keep_scratch: bool,
}

impl ProcessingConfig {
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("static-iiif"))
    }
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Object storage settings, used only when a location is `s3://`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub s3_region: String,
    /// Custom endpoint for S3-compatible services (MinIO etc).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_endpoint: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            s3_region: "us-east-1".to_string(),
            s3_endpoint: None,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer that user overrides are merged onto.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(AppConfig::default())
        .map_err(|e| ConfigError::Validation(format!("default config must serialize: {e}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
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

/// Load `static-iiif.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<AppConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: AppConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `static-iiif.toml` in the given directory.
pub fn load_config(dir: &Path) -> Result<AppConfig, ConfigError> {
    resolve_config(load_raw_config(dir)?)
}
