//! The unit of work: one source image and the outputs to derive from it.
//!
//! A [`Job`] is built once by the caller (the CLI builds it from its two
//! positional arguments plus [`AppConfig`]) and consumed by
//! [`process`](crate::process). Nothing downstream mutates it.

use crate::config::{AppConfig, StaticSettings};
use crate::imaging::OutputFormat;
use crate::storage::Location;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid job: {0}")]
pub struct InvalidJob(pub String);

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// URL-safe identifier; names the scratch directory and default file outputs.
    pub id: String,
    /// Source image.
    pub origin: Location,
    pub static_outputs: Option<StaticOutputs>,
    pub file_outputs: Option<FileOutputs>,
}

/// A static image service run: tiles, renditions, info.json, manifest.json.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticOutputs {
    pub location: Location,
    /// `service_url` is already resolved; it is never blank here.
    pub settings: StaticSettings,
}

impl StaticOutputs {
    pub fn service_id(&self) -> &str {
        &self.settings.service_url
    }
}

/// Standalone pyramidal files written next to (or away from) the static outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOutputs {
    pub location: Location,
    pub outputs: Vec<TileFileOutput>,
}

fn default_quality() -> u32 {
    90
}

fn default_tile_size() -> u32 {
    512
}

/// One standalone pyramidal file, tagged by container format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "kebab-case")]
pub enum TileFileOutput {
    /// Tiled multi-resolution TIFF, one IFD per level.
    PyramidalTiff {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        #[serde(default = "default_tile_format")]
        tile_format: OutputFormat,
        #[serde(default = "default_quality")]
        quality: u32,
        #[serde(default = "default_tile_size")]
        tile_size: u32,
    },
    /// Single-file JPEG 2000.
    Jpeg2000 {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        #[serde(default)]
        args: Vec<String>,
    },
}

fn default_tile_format() -> OutputFormat {
    OutputFormat::Jpeg
}

impl TileFileOutput {
    /// The explicit file name, or `{id}.{codec}.tif` / `{id}.jp2`.
    pub fn file_name(&self, job_id: &str) -> String {
        match self {
            TileFileOutput::PyramidalTiff {
                file_name: Some(name),
                ..
            }
            | TileFileOutput::Jpeg2000 {
                file_name: Some(name),
                ..
            } => name.clone(),
            TileFileOutput::PyramidalTiff { tile_format, .. } => {
                format!("{job_id}.{}.tif", tile_format.extension())
            }
            TileFileOutput::Jpeg2000 { .. } => format!("{job_id}.jp2"),
        }
    }

    /// Media type of the container.
    pub fn media_type(&self) -> &'static str {
        match self {
            TileFileOutput::PyramidalTiff { .. } => "image/tiff",
            TileFileOutput::Jpeg2000 { .. } => "image/jp2",
        }
    }

    /// Human-readable label, naming the tile codec.
    pub fn label(&self) -> String {
        match self {
            TileFileOutput::PyramidalTiff { tile_format, .. } => {
                format!("Pyramidal TIFF ({} tiles)", tile_format.extension())
            }
            TileFileOutput::Jpeg2000 { .. } => "JPEG 2000".to_string(),
        }
    }
}

/// Derive a stable job id from the source URI: the first 16 hex characters of
/// its SHA-256.
pub fn job_id_for(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

fn is_url_safe(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl Job {
    /// Build a job from the CLI's source and destination plus the loaded config.
    ///
    /// The destination receives the static outputs, and the file outputs too
    /// unless `file_outputs.location` points elsewhere. A blank
    /// `service_url` becomes the destination URI.
    pub fn from_cli(source: &str, destination: &str, config: &AppConfig) -> Result<Job, InvalidJob> {
        let origin: Location = source
            .parse()
            .map_err(|e| InvalidJob(format!("source: {e}")))?;
        let dest: Location = destination
            .parse()
            .map_err(|e| InvalidJob(format!("destination: {e}")))?;

        let static_outputs = config.static_outputs.enabled.then(|| {
            let mut settings = config.static_outputs.clone();
            if settings.service_url.trim().is_empty() {
                settings.service_url = dest.to_string();
            }
            settings.service_url = settings.service_url.trim_end_matches('/').to_string();
            StaticOutputs {
                location: dest.clone(),
                settings,
            }
        });

        let file_outputs = if config.file_outputs.outputs.is_empty() {
            None
        } else {
            let location = match &config.file_outputs.location {
                Some(loc) => loc
                    .parse()
                    .map_err(|e| InvalidJob(format!("file_outputs.location: {e}")))?,
                None => dest.clone(),
            };
            Some(FileOutputs {
                location,
                outputs: config.file_outputs.outputs.clone(),
            })
        };

        let job = Job {
            id: job_id_for(source),
            origin,
            static_outputs,
            file_outputs,
        };
        job.validate()?;
        Ok(job)
    }

    /// Check the invariants callers must uphold when building a job by hand.
    pub fn validate(&self) -> Result<(), InvalidJob> {
        if !is_url_safe(&self.id) {
            return Err(InvalidJob(format!("id {:?} is not URL-safe", self.id)));
        }
        if let Some(s) = &self.static_outputs {
            if s.service_id().trim().is_empty() {
                return Err(InvalidJob("static outputs need a service id".into()));
            }
            if s.settings.tile_size == 0 {
                return Err(InvalidJob("tile size must be positive".into()));
            }
            if s.settings.formats().is_empty() {
                return Err(InvalidJob("static outputs need an image format".into()));
            }
        }
        Ok(())
    }

    /// Every location the job reads from or writes to.
    pub fn locations(&self) -> Vec<&Location> {
        let mut locations = vec![&self.origin];
        if let Some(s) = &self.static_outputs {
            locations.push(&s.location);
        }
        if let Some(f) = &self.file_outputs {
            locations.push(&f.location);
        }
        locations
    }
}
