//! Derivative generation.
//!
//! Drives the [`ImageEngine`] through every operation a job asks for and
//! records how each one went. No single failure stops the run: each
//! operation's error is caught, logged, and kept in the [`GenerationReport`].
//!
//! ## Order of work
//!
//! 1. **Tile pyramids**, one per enabled format, jpg first. They run one
//!    after another because each writes the same `info.json` fragment; the
//!    last successful pyramid's fragment is the one left on disk.
//! 2. **Renditions and tile files**, in parallel on the rayon pool:
//!    - `full/max/0/default.{ext}` for the planned `max` size, or at the
//!      source size when nothing else is planned
//!    - `full/{w},{h}/0/default.{ext}` (or `full/{w},/0/...` for the v2
//!      layout) for every planned size
//!    - a `full/{w},/0/...` copy next to each `w,h` file for the v2-and-v3
//!      layout
//!    - one standalone pyramidal file per tile file output
//!
//! Results are collected in task order, so the report is deterministic.
//! Progress events go out over an optional channel as each operation
//! finishes.

use crate::config::StaticSettings;
use crate::iiif::Size;
use crate::imaging::{
    EngineError, ImageEngine, Jpeg2000Params, OutputFormat, PyramidParams, Quality, ResizeParams,
    TiffParams,
};
use crate::job::TileFileOutput;
use crate::plan::DerivativePlan;
use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{debug, warn};

/// Identity of one derivative operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    TilePyramid { format: OutputFormat },
    MaxRendition { size: Size, format: OutputFormat },
    Rendition { size: Size, format: OutputFormat },
    /// The `w,` copy of a rendition, for the v2-and-v3 layout.
    LegacyRendition { size: Size, format: OutputFormat },
    TileFile { file_name: String, output: TileFileOutput },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::TilePyramid { format } => write!(f, "tiles ({format})"),
            Operation::MaxRendition { size, format } => {
                write!(f, "full/max ({size} {format})")
            }
            Operation::Rendition { size, format } => write!(f, "full/{size} ({format})"),
            Operation::LegacyRendition { size, format } => {
                write!(f, "full/{}, ({format})", size.width)
            }
            Operation::TileFile { file_name, .. } => write!(f, "{file_name}"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{operation} failed: {message}")]
pub struct DerivativeOperationFailed {
    pub operation: Operation,
    pub message: String,
}

/// Result of one operation, also sent as a progress event.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    pub operation: Operation,
    /// File or directory the operation wrote to.
    pub path: PathBuf,
    pub result: Result<(), DerivativeOperationFailed>,
}

impl OperationOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Static outputs to produce, rooted at a local directory.
#[derive(Debug, Clone, Copy)]
pub struct StaticTarget<'a> {
    pub dir: &'a Path,
    pub service_id: &'a str,
    pub settings: &'a StaticSettings,
    pub plan: &'a DerivativePlan,
}

/// Standalone files to produce, rooted at a local directory.
#[derive(Debug, Clone, Copy)]
pub struct FileTarget<'a> {
    pub dir: &'a Path,
    pub job_id: &'a str,
    pub outputs: &'a [TileFileOutput],
}

/// Everything that happened during generation, in task order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationReport {
    pub outcomes: Vec<OperationOutcome>,
}

impl GenerationReport {
    pub fn failures(&self) -> impl Iterator<Item = &DerivativeOperationFailed> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    fn status(&self, matches: impl Fn(&Operation) -> bool) -> (usize, usize) {
        self.outcomes
            .iter()
            .filter(|o| matches(&o.operation))
            .fold((0, 0), |(attempted, ok), o| {
                (attempted + 1, ok + usize::from(o.is_ok()))
            })
    }

    /// True if any tile pyramid was written.
    pub fn pyramid_produced(&self) -> bool {
        self.status(|op| matches!(op, Operation::TilePyramid { .. })).1 > 0
    }

    /// The formats in `enabled` that still have a usable set of derivatives:
    /// the pyramid did not fail, and at least one rendition succeeded if any
    /// were attempted.
    pub fn available_formats(&self, enabled: &[OutputFormat]) -> Vec<OutputFormat> {
        enabled
            .iter()
            .copied()
            .filter(|format| {
                let (pyramids, pyramids_ok) = self.status(
                    |op| matches!(op, Operation::TilePyramid { format: f } if f == format),
                );
                let (renditions, renditions_ok) = self.status(|op| {
                    matches!(
                        op,
                        Operation::Rendition { format: f, .. }
                            | Operation::MaxRendition { format: f, .. }
                            if f == format
                    )
                });
                pyramids == pyramids_ok && (renditions == 0 || renditions_ok > 0)
            })
            .collect()
    }

    /// True if the `size` rendition was written in one of `formats`.
    fn rendition_ok(&self, size: Size, formats: &[OutputFormat]) -> bool {
        self.outcomes.iter().any(|o| {
            o.is_ok()
                && matches!(
                    o.operation,
                    Operation::Rendition { size: s, format } if s == size && formats.contains(&format)
                )
        })
    }

    /// Planned sizes with a successful rendition in at least one of `formats`.
    pub fn produced_sizes(&self, plan: &DerivativePlan, formats: &[OutputFormat]) -> Vec<Size> {
        plan.sizes
            .iter()
            .copied()
            .filter(|s| self.rendition_ok(*s, formats))
            .collect()
    }

    /// True if a `full/max` rendition exists in one of `formats`.
    pub fn max_produced(&self, formats: &[OutputFormat]) -> bool {
        self.outcomes.iter().any(|o| {
            o.is_ok()
                && matches!(o.operation, Operation::MaxRendition { format, .. } if formats.contains(&format))
        })
    }

    /// Size of the `full/max` rendition written in `format`, if any.
    pub fn max_rendition(&self, format: OutputFormat) -> Option<Size> {
        self.outcomes.iter().find_map(|o| match o.operation {
            Operation::MaxRendition { size, format: f } if o.is_ok() && f == format => Some(size),
            _ => None,
        })
    }

    /// Tile file outputs that were written, with their file names.
    pub fn tile_files(&self) -> Vec<(&TileFileOutput, &str)> {
        self.outcomes
            .iter()
            .filter(|o| o.is_ok())
            .filter_map(|o| match &o.operation {
                Operation::TileFile { file_name, output } => Some((output, file_name.as_str())),
                _ => None,
            })
            .collect()
    }
}

/// One unit of parallel work. A legacy mirror rides along with its rendition
/// so the copy always runs after the file it copies.
struct Task {
    operation: Operation,
    path: PathBuf,
    mirror: Option<(Operation, PathBuf)>,
}

fn rendition_path(dir: &Path, segment: &str, format: OutputFormat) -> PathBuf {
    dir.join("full")
        .join(segment)
        .join("0")
        .join(format!("default.{}", format.extension()))
}

fn plan_tasks(static_target: Option<StaticTarget<'_>>, file_target: Option<FileTarget<'_>>) -> Vec<Task> {
    let mut tasks = Vec::new();

    if let Some(t) = static_target {
        let formats = t.settings.formats();
        let layout = t.settings.layout;

        // An empty plan still gets a full-size image for the manifest body
        let max = t
            .plan
            .max
            .or_else(|| t.plan.is_empty().then_some(t.plan.actual));
        if let Some(max) = max {
            for &format in &formats {
                tasks.push(Task {
                    operation: Operation::MaxRendition { size: max, format },
                    path: rendition_path(t.dir, "max", format),
                    mirror: None,
                });
            }
        }

        for &size in &t.plan.sizes {
            for &format in &formats {
                let segment = layout.primary_segment(size.width, size.height);
                let mirror = layout.mirror_segment(size.width).map(|segment| {
                    (
                        Operation::LegacyRendition { size, format },
                        rendition_path(t.dir, &segment, format),
                    )
                });
                tasks.push(Task {
                    operation: Operation::Rendition { size, format },
                    path: rendition_path(t.dir, &segment, format),
                    mirror,
                });
            }
        }
    }

    if let Some(f) = file_target {
        for output in f.outputs {
            let file_name = output.file_name(f.job_id);
            tasks.push(Task {
                path: f.dir.join(&file_name),
                operation: Operation::TileFile {
                    file_name,
                    output: output.clone(),
                },
                mirror: None,
            });
        }
    }

    tasks
}

/// Run one non-pyramid operation.
fn run_operation(
    engine: &impl ImageEngine,
    operation: &Operation,
    path: &Path,
    quality: Quality,
) -> Result<(), EngineError> {
    match operation {
        Operation::TilePyramid { .. } => Err(EngineError::ProcessingFailed(
            "tile pyramids are not run as parallel tasks".into(),
        )),
        Operation::MaxRendition { size, format }
        | Operation::Rendition { size, format }
        | Operation::LegacyRendition { size, format } => engine.resize(&ResizeParams {
            output: path.to_path_buf(),
            width: size.width,
            height: size.height,
            format: *format,
            quality,
        }),
        Operation::TileFile { output, .. } => match output {
            TileFileOutput::PyramidalTiff {
                tile_format,
                quality,
                tile_size,
                ..
            } => engine.pyramidal_tiff(&TiffParams {
                output: path.to_path_buf(),
                tile_size: *tile_size,
                codec: *tile_format,
                quality: Quality::new(*quality),
            }),
            TileFileOutput::Jpeg2000 { args, .. } => engine.jpeg2000(&Jpeg2000Params {
                output: path.to_path_buf(),
                args: args.clone(),
            }),
        },
    }
}

fn copy_file(from: &Path, to: &Path) -> Result<(), EngineError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to)?;
    Ok(())
}

/// Turn an engine result into an outcome, log it, and publish it.
fn record(
    operation: Operation,
    path: PathBuf,
    result: Result<(), EngineError>,
    events: Option<&Sender<OperationOutcome>>,
) -> OperationOutcome {
    let result = result.map_err(|e| DerivativeOperationFailed {
        operation: operation.clone(),
        message: e.to_string(),
    });
    match &result {
        Ok(()) => debug!(%operation, path = %path.display(), "derivative written"),
        Err(e) => warn!(path = %path.display(), "{e}"),
    }
    let outcome = OperationOutcome {
        operation,
        path,
        result,
    };
    if let Some(tx) = events {
        // A closed channel only means nobody is listening
        tx.send(outcome.clone()).ok();
    }
    outcome
}

fn run_task(
    engine: &impl ImageEngine,
    task: &Task,
    quality: Quality,
    events: Option<&Sender<OperationOutcome>>,
) -> Vec<OperationOutcome> {
    let result = run_operation(engine, &task.operation, &task.path, quality);
    let primary_ok = result.is_ok();
    let mut outcomes = vec![record(task.operation.clone(), task.path.clone(), result, events)];

    if let Some((mirror_op, mirror_path)) = &task.mirror {
        let result = if primary_ok {
            copy_file(&task.path, mirror_path)
        } else {
            run_operation(engine, mirror_op, mirror_path, quality)
        };
        outcomes.push(record(mirror_op.clone(), mirror_path.clone(), result, events));
    }
    outcomes
}

/// Generate every derivative for one job.
///
/// Never fails as a whole; inspect the returned report for per-operation
/// results.
pub fn generate(
    engine: &impl ImageEngine,
    static_target: Option<StaticTarget<'_>>,
    file_target: Option<FileTarget<'_>>,
    events: Option<Sender<OperationOutcome>>,
) -> GenerationReport {
    let events = events.as_ref();
    let mut outcomes = Vec::new();

    let quality = static_target
        .map(|t| Quality::new(t.settings.quality))
        .unwrap_or_default();

    if let Some(t) = static_target.filter(|t| t.settings.make_pyramid) {
        for format in t.settings.formats() {
            let params = PyramidParams {
                output_dir: t.dir.to_path_buf(),
                service_id: t.service_id.to_string(),
                tile_size: t.settings.tile_size,
                format,
                quality,
                layout: t.settings.layout,
            };
            let result = engine.tile_pyramid(&params);
            outcomes.push(record(
                Operation::TilePyramid { format },
                t.dir.to_path_buf(),
                result,
                events,
            ));
        }
    }

    let tasks = plan_tasks(static_target, file_target);
    let results: Vec<Vec<OperationOutcome>> = tasks
        .par_iter()
        .map(|task| run_task(engine, task, quality, events))
        .collect();
    outcomes.extend(results.into_iter().flatten());

    GenerationReport { outcomes }
}
