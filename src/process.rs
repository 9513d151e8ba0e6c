//! Job execution.
//!
//! Runs one [`Job`] from source image to published outputs:
//!
//! 1. Open the source and read its dimensions (the only fatal failure point).
//! 2. Plan the derivative sizes.
//! 3. Generate tiles, renditions and tile files ([`generate`]).
//! 4. Reconcile the plan with what was actually produced.
//! 5. Build and write `info.json`, then `manifest.json`.
//! 6. Publish staged outputs to remote locations.
//!
//! ## Where files are written
//!
//! Local output locations are written in place. Remote ones (`s3://...`) are
//! staged under the job's scratch directory and copied up at the end:
//!
//! ```text
//! {scratch}/{job id}/
//! ├── static/      # staged static outputs, when the destination is remote
//! └── files/       # staged tile files, when their location is remote
//! ```
//!
//! Tile files are published before the static outputs, and `info.json` and
//! `manifest.json` are published last. A reader never sees a manifest that
//! links to something missing.

use crate::config::AppConfig;
use crate::generate::{self, FileTarget, GenerationReport, OperationOutcome, StaticTarget};
use crate::iiif::image_service::{self, read_fragment};
use crate::iiif::presentation::{self, ManifestOptions, Rendering};
use crate::iiif::{ImageService, Manifest, Size};
use crate::imaging::{ImageEngine, OutputFormat, RustEngine};
use crate::job::{FileOutputs, InvalidJob, Job, StaticOutputs};
use crate::plan::{self, DerivativePlan};
use crate::storage::{BlobStore, Location, Storage, StorageError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const DESCRIPTOR_FILENAME: &str = "info.json";
pub const MANIFEST_FILENAME: &str = "manifest.json";

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Source unreadable: {0}")]
    SourceUnreadable(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    InvalidJob(#[from] InvalidJob),
}

/// The documents written for the static outputs.
#[derive(Debug, Clone)]
pub struct StaticResult {
    /// What was planned.
    pub plan: DerivativePlan,
    /// The plan restricted to what was produced; this is what the documents describe.
    pub produced: DerivativePlan,
    /// Formats advertised in the documents.
    pub formats: Vec<OutputFormat>,
    pub descriptor: ImageService,
    pub manifest: Manifest,
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub actual: Size,
    pub static_result: Option<StaticResult>,
    pub report: GenerationReport,
}

/// Run a job end to end with the built-in engine.
///
/// Scratch space lives at `{scratch_root}/{job.id}` and is removed afterwards
/// unless `keep_scratch` is set.
pub fn process(
    job: &Job,
    config: &AppConfig,
    events: Option<Sender<OperationOutcome>>,
) -> Result<JobOutcome, JobError> {
    job.validate()?;
    info!(job = %job.id, source = %job.origin, "starting job");

    let store = Storage::connect(&config.storage, job.locations())?;
    let work_root = config.processing.scratch_root().join(&job.id);
    let engine = open_engine(&store, &job.origin)?;

    let result = process_with_engine(&engine, &store, job, &work_root, events);

    if !config.processing.keep_scratch && work_root.exists() {
        if let Err(e) = fs::remove_dir_all(&work_root) {
            warn!(path = %work_root.display(), "could not remove scratch: {e}");
        }
    }
    result
}

/// Decode the source. Local files are opened in place; anything else is read
/// through the store.
fn open_engine(store: &impl BlobStore, origin: &Location) -> Result<RustEngine, JobError> {
    match origin.as_local() {
        Some(path) => RustEngine::open(path).map_err(|e| unreadable(origin, e)),
        None => {
            let bytes = store.read(origin).map_err(|e| unreadable(origin, e))?;
            RustEngine::from_bytes(&bytes).map_err(|e| unreadable(origin, e))
        }
    }
}

fn unreadable(origin: &Location, e: impl std::fmt::Display) -> JobError {
    JobError::SourceUnreadable(format!("{origin}: {e}"))
}

/// The local directory outputs for `location` are written to.
fn working_dir(location: &Location, work_root: &Path, staging: &str) -> PathBuf {
    location
        .as_local()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| work_root.join(staging))
}

/// Run a job against an already-open engine.
pub fn process_with_engine(
    engine: &impl ImageEngine,
    store: &impl BlobStore,
    job: &Job,
    work_root: &Path,
    events: Option<Sender<OperationOutcome>>,
) -> Result<JobOutcome, JobError> {
    let actual = engine.dimensions();
    info!(job = %job.id, width = actual.width, height = actual.height, "source opened");

    let static_dir = job
        .static_outputs
        .as_ref()
        .map(|s| working_dir(&s.location, work_root, "static"));
    let file_dir = job
        .file_outputs
        .as_ref()
        .map(|f| working_dir(&f.location, work_root, "files"));
    for dir in static_dir.iter().chain(file_dir.iter()) {
        store.ensure_dir(&Location::Local(dir.clone()))?;
    }

    let planned = job.static_outputs.as_ref().map(|s| {
        let p = plan::plan(&s.settings, actual);
        info!(
            sizes = p.sizes.len(),
            max = ?p.max,
            rejected = p.rejected.len(),
            "planned derivatives"
        );
        p
    });

    let static_target = match (&job.static_outputs, &static_dir, &planned) {
        (Some(s), Some(dir), Some(plan)) => Some(StaticTarget {
            dir,
            service_id: s.service_id(),
            settings: &s.settings,
            plan,
        }),
        _ => None,
    };
    let file_target = match (&job.file_outputs, &file_dir) {
        (Some(f), Some(dir)) => Some(FileTarget {
            dir,
            job_id: &job.id,
            outputs: &f.outputs,
        }),
        _ => None,
    };

    let report = generate::generate(engine, static_target, file_target, events);

    if let (Some(f), Some(dir)) = (&job.file_outputs, &file_dir) {
        if !f.location.is_local() {
            for (_, name) in report.tile_files() {
                store.copy(&Location::Local(dir.join(name)), &f.location.join(name))?;
            }
        }
    }

    let static_result = match (&job.static_outputs, &static_dir, planned) {
        (Some(s), Some(dir), Some(plan)) => {
            let result = write_documents(store, job, s, dir, actual, plan, &report)?;
            if !s.location.is_local() {
                let count = publish_dir(store, dir, &s.location)?;
                info!(files = count, to = %s.location, "published static outputs");
            }
            Some(result)
        }
        _ => None,
    };

    info!(
        job = %job.id,
        succeeded = report.succeeded(),
        failed = report.failures().count(),
        "job finished"
    );

    Ok(JobOutcome {
        job_id: job.id.clone(),
        actual,
        static_result,
        report,
    })
}

/// Public URL of a tile file, for the manifest's `rendering` list.
fn rendering_id(static_outputs: &StaticOutputs, files: &FileOutputs, name: &str) -> String {
    if files.location == static_outputs.location {
        format!("{}/{name}", static_outputs.service_id())
    } else {
        files.location.join(name).to_string()
    }
}

fn write_json<T: serde::Serialize>(
    store: &impl BlobStore,
    path: PathBuf,
    value: &T,
) -> Result<(), JobError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    store.write(&Location::Local(path), &bytes)?;
    Ok(())
}

/// Reconcile, then write `info.json` and `manifest.json` into `dir`.
fn write_documents(
    store: &impl BlobStore,
    job: &Job,
    s: &StaticOutputs,
    dir: &Path,
    actual: Size,
    plan: DerivativePlan,
    report: &GenerationReport,
) -> Result<StaticResult, JobError> {
    let enabled = s.settings.formats();
    let formats = report.available_formats(&enabled);
    // Sizes, max and the manifest body all come from the first surviving
    // format, so every advertised size exists in the body format.
    let primary: Vec<OutputFormat> = formats.first().copied().into_iter().collect();
    let produced = plan.restricted_to(
        &report.produced_sizes(&plan, &primary),
        report.max_produced(&primary),
    );
    if produced.sizes.len() < plan.sizes.len() {
        warn!(
            planned = plan.sizes.len(),
            produced = produced.sizes.len(),
            "some planned sizes were not produced"
        );
    }

    let descriptor_path = dir.join(DESCRIPTOR_FILENAME);
    let fragment = if report.pyramid_produced() {
        match read_fragment(&descriptor_path) {
            Ok(fragment) => Some(fragment),
            Err(e) => {
                warn!("{e}; synthesizing descriptor");
                None
            }
        }
    } else {
        None
    };

    let descriptor = image_service::build(fragment, s.service_id(), actual, &produced, &formats);
    write_json(store, descriptor_path, &descriptor)?;
    info!(id = %descriptor.id, sizes = descriptor.sizes.len(), "wrote info.json");

    let body_format = match primary.first() {
        Some(&format) => format,
        None => {
            let fallback = enabled.first().copied().unwrap_or(OutputFormat::Jpeg);
            warn!(
                format = fallback.extension(),
                "no format produced any derivative"
            );
            fallback
        }
    };
    let max_rendition = primary
        .first()
        .and_then(|&format| report.max_rendition(format));
    let renderings = job
        .file_outputs
        .as_ref()
        .map(|files| {
            report
                .tile_files()
                .into_iter()
                .map(|(output, name)| {
                    Rendering::new(
                        rendering_id(s, files, name),
                        output.media_type(),
                        &output.label(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let manifest = presentation::build(
        &descriptor,
        actual,
        &produced,
        ManifestOptions {
            label: job.origin.file_name().unwrap_or(&job.id),
            body_format,
            layout: s.settings.layout,
            max_rendition,
            renderings,
        },
    );
    write_json(store, dir.join(MANIFEST_FILENAME), &manifest)?;
    info!(id = %manifest.id, "wrote manifest.json");

    Ok(StaticResult {
        plan,
        produced,
        formats,
        descriptor,
        manifest,
    })
}

/// Copy everything under `dir` to `to`, keeping relative paths.
///
/// `info.json` and `manifest.json` at the top level go last. Returns the
/// number of files copied.
pub fn publish_dir(store: &impl BlobStore, dir: &Path, to: &Location) -> Result<usize, JobError> {
    let mut deferred = Vec::new();
    let mut count = 0;

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| JobError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if key == DESCRIPTOR_FILENAME || key == MANIFEST_FILENAME {
            deferred.push((entry.path().to_path_buf(), key));
            continue;
        }
        debug!(%key, "publishing");
        store.copy(&Location::Local(entry.path().to_path_buf()), &to.join(&key))?;
        count += 1;
    }

    // manifest.json sorts after info.json; publish the descriptor first
    for (path, key) in deferred {
        store.copy(&Location::Local(path), &to.join(&key))?;
        count += 1;
    }
    Ok(count)
}
