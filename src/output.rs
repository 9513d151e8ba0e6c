//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Generation events
//!
//! One line per derivative operation, printed as it finishes:
//!
//! ```text
//!     ok    tiles (jpg)
//!     ok    full/max (1600,1067 jpg)
//!     ok    full/500,333 (webp)
//!     FAIL  img1.jp2: Unsupported: JPEG 2000 encoding is not available
//! ```
//!
//! ## Job summary
//!
//! ```text
//! Job 3f2a9c0d1e4b5a67 (3000x2000)
//!     Sizes: 100,67 200,133 400,267 500,333 1000,667 1600,1067
//!     Max: 1600,1067
//!     Formats: jpg, webp
//!     Descriptor: https://example.org/iiif/img1/info.json
//!     Manifest: https://example.org/iiif/img1/manifest.json
//!     Skipped size request: "bogus"
//! Generated 15 derivatives, 1 failed
//! ```
//!
//! # Architecture
//!
//! Each `format_*` function returns `Vec<String>` and has no side effects. The
//! `print_*` wrappers write to stdout.

use crate::generate::OperationOutcome;
use crate::iiif::Size;
use crate::process::JobOutcome;

// ============================================================================
// Generation events
// ============================================================================

pub fn format_operation_event(outcome: &OperationOutcome) -> Vec<String> {
    match &outcome.result {
        Ok(()) => vec![format!("    ok    {}", outcome.operation)],
        Err(e) => vec![format!("    FAIL  {}: {}", outcome.operation, e.message)],
    }
}

pub fn print_operation_event(outcome: &OperationOutcome) {
    for line in format_operation_event(outcome) {
        println!("{}", line);
    }
}

// ============================================================================
// Job summary
// ============================================================================

fn size_list(sizes: &[Size]) -> String {
    if sizes.is_empty() {
        return "(none)".to_string();
    }
    sizes
        .iter()
        .map(Size::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn format_job_summary(outcome: &JobOutcome) -> Vec<String> {
    let mut lines = vec![format!(
        "Job {} ({}x{})",
        outcome.job_id, outcome.actual.width, outcome.actual.height
    )];

    if let Some(result) = &outcome.static_result {
        lines.push(format!("    Sizes: {}", size_list(&result.produced.sizes)));
        if let Some(max) = result.produced.max {
            lines.push(format!("    Max: {max}"));
        }
        let formats: Vec<&str> = result.formats.iter().map(|f| f.extension()).collect();
        lines.push(format!("    Formats: {}", formats.join(", ")));
        lines.push(format!("    Descriptor: {}/info.json", result.descriptor.id));
        lines.push(format!("    Manifest: {}", result.manifest.id));
        for rejected in &result.plan.rejected {
            lines.push(format!("    Skipped size request: {:?}", rejected.0));
        }
    }

    for (_, name) in outcome.report.tile_files() {
        lines.push(format!("    File: {name}"));
    }

    let total = outcome.report.outcomes.len();
    let failed = outcome.report.failures().count();
    lines.push(if failed == 0 {
        format!("Generated {total} derivatives")
    } else {
        format!("Generated {total} derivatives, {failed} failed")
    });
    lines
}

pub fn print_job_summary(outcome: &JobOutcome) {
    for line in format_job_summary(outcome) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{DerivativeOperationFailed, GenerationReport, Operation};
    use crate::imaging::OutputFormat;
    use std::path::PathBuf;

    fn outcome(operation: Operation, error: Option<&str>) -> OperationOutcome {
        OperationOutcome {
            path: PathBuf::from("/out"),
            result: match error {
                None => Ok(()),
                Some(message) => Err(DerivativeOperationFailed {
                    operation: operation.clone(),
                    message: message.to_string(),
                }),
            },
            operation,
        }
    }

    #[test]
    fn event_ok_line() {
        let lines = format_operation_event(&outcome(
            Operation::TilePyramid {
                format: OutputFormat::Jpeg,
            },
            None,
        ));
        assert_eq!(lines, vec!["    ok    tiles (jpg)"]);
    }

    #[test]
    fn event_failure_line() {
        let lines = format_operation_event(&outcome(
            Operation::Rendition {
                size: Size::new(500, 333),
                format: OutputFormat::WebP,
            },
            Some("disk full"),
        ));
        assert_eq!(lines, vec!["    FAIL  full/500,333 (webp): disk full"]);
    }

    #[test]
    fn summary_without_static_outputs() {
        let job = JobOutcome {
            job_id: "abc".into(),
            actual: Size::new(30, 20),
            static_result: None,
            report: GenerationReport {
                outcomes: vec![outcome(
                    Operation::TilePyramid {
                        format: OutputFormat::Jpeg,
                    },
                    Some("boom"),
                )],
            },
        };
        assert_eq!(
            format_job_summary(&job),
            vec!["Job abc (30x20)", "Generated 1 derivatives, 1 failed"]
        );
    }

    #[test]
    fn size_list_formats() {
        assert_eq!(size_list(&[]), "(none)");
        assert_eq!(
            size_list(&[Size::new(100, 67), Size::new(500, 333)]),
            "100,67 500,333"
        );
    }
}
