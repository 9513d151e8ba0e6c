//! # Static IIIF
//!
//! Bakes one source image into a static IIIF image service: a tile pyramid,
//! fixed-size renditions, an Image API 3 descriptor (`info.json`) and a
//! single-canvas Presentation API 3 manifest (`manifest.json`). The output is
//! plain files, ready to be served from a web server or object storage without
//! a dynamic image server.
//!
//! # Pipeline
//!
//! ```text
//! source ──► plan ──► generate ──► reconcile ──► info.json ──► manifest.json
//!            sizes    tiles,       what was
//!                     renditions,  actually
//!                     tile files   produced
//! ```
//!
//! Each derivative operation succeeds or fails on its own. Failures are
//! recorded, never fatal, and the two documents describe only what exists on
//! disk. The one job-level failure is an unreadable source.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`iiif`] | IIIF size grammar, descriptor and manifest models and builders, path layouts |
//! | [`plan`] | Resolves configured size requests into a sorted, deduplicated size list |
//! | [`generate`] | Runs every derivative operation and collects a [`generate::GenerationReport`] |
//! | [`process`] | Runs one [`job::Job`] end to end, including staging and publishing |
//! | [`imaging`] | Pure-Rust image engine: resize, tile pyramids, pyramidal TIFF |
//! | [`storage`] | Local and S3 blob storage behind one [`storage::BlobStore`] trait |
//! | [`job`] | The unit of work and its output variants |
//! | [`config`] | `static-iiif.toml` loading, defaults and validation |
//! | [`output`] | CLI output formatting for progress events and job summaries |
//!
//! # Design Decisions
//!
//! ## Sizes Are Deduplicated by Width
//!
//! IIIF clients pick renditions by width. Two requests that resolve to the same
//! width would write to different `w,h` paths but advertise two entries a
//! client cannot tell apart, so the first one wins.
//!
//! ## Tile Pyramids Run in Sequence
//!
//! Every tiling step writes the same `info.json` fragment. Pyramids for the
//! enabled formats run one after another (jpg, then webp) and the last fragment
//! stands. The descriptor builder then rewrites `sizes` and the format lists
//! from the reconciled results, so the fragment only contributes tile
//! information.
//!
//! ## Pure-Rust Imaging
//!
//! The [`imaging`] module is built on the `image` crate alone, with no system
//! libraries. The binary is self-contained.

pub mod config;
pub mod generate;
pub mod iiif;
pub mod imaging;
pub mod job;
pub mod output;
pub mod plan;
pub mod process;
pub mod storage;

pub use process::{JobError, JobOutcome, process, process_with_engine};

#[cfg(test)]
pub(crate) mod test_helpers;
