//! IIIF Presentation API 3 manifest for a single image.
//!
//! The manifest has one canvas, one annotation page and one painting
//! annotation. The canvas carries the true source dimensions. The annotation
//! body is the largest rendition that exists and embeds the image service
//! descriptor in full.
//!
//! ```text
//! Manifest {svc}/manifest.json
//! └── Canvas {svc}/canvas                   (actual width × height)
//!     └── AnnotationPage {svc}/page
//!         └── Annotation {svc}/painting     (motivation: painting)
//!             └── body: Image {svc}/full/{w},{h}/0/default.jpg
//!                 └── service: [info.json without @context]
//! ```

use super::{Context, ImageService, Layout, PRESENTATION_3_CONTEXT, Size};
use crate::imaging::OutputFormat;
use crate::plan::DerivativePlan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Language code → values.
pub type LanguageMap = BTreeMap<String, Vec<String>>;

fn english(value: &str) -> LanguageMap {
    BTreeMap::from([("en".to_string(), vec![value.to_string()])])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "@context")]
    pub context: Context,
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub label: LanguageMap,
    pub items: Vec<Canvas>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rendering: Vec<Rendering>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub label: LanguageMap,
    pub width: u32,
    pub height: u32,
    pub items: Vec<AnnotationPage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationPage {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub items: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub motivation: String,
    pub body: ImageBody,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBody {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub service: Vec<ImageService>,
}

/// A link to an alternative, downloadable representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rendering {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub label: LanguageMap,
    pub format: String,
}

impl Rendering {
    pub fn new(id: String, media_type: &str, label: &str) -> Self {
        Self {
            id,
            type_: "Image".to_string(),
            label: english(label),
            format: media_type.to_string(),
        }
    }
}

impl Manifest {
    /// Add the Presentation 3 context if missing. Safe to call repeatedly.
    pub fn ensure_context(&mut self) {
        self.context.ensure(PRESENTATION_3_CONTEXT);
    }

    pub fn canvas(&self) -> Option<&Canvas> {
        self.items.first()
    }

    pub fn body(&self) -> Option<&ImageBody> {
        self.items
            .first()
            .and_then(|c| c.items.first())
            .and_then(|p| p.items.first())
            .map(|a| &a.body)
    }
}

/// Inputs besides the descriptor and plan.
#[derive(Debug, Clone)]
pub struct ManifestOptions<'a> {
    /// Shown as the manifest and canvas label.
    pub label: &'a str,
    /// Format of the annotation body.
    pub body_format: OutputFormat,
    pub layout: Layout,
    /// Size of the `full/max` rendition, if one was written in `body_format`.
    pub max_rendition: Option<Size>,
    /// One entry per standalone file that was written.
    pub renderings: Vec<Rendering>,
}

/// Id and dimensions of the body image.
///
/// The largest produced size wins, then `full/max`. With neither, the body
/// points at the image service itself at the source dimensions.
fn body_target(
    svc: &str,
    actual: Size,
    plan: &DerivativePlan,
    options: &ManifestOptions<'_>,
) -> (String, Size) {
    let ext = options.body_format.extension();
    if !plan.is_empty() {
        let largest = plan.largest;
        let segment = options.layout.primary_segment(largest.width, largest.height);
        (format!("{svc}/full/{segment}/0/default.{ext}"), largest)
    } else if let Some(max) = options.max_rendition {
        (format!("{svc}/full/max/0/default.{ext}"), max)
    } else {
        warn!(
            service = svc,
            "no rendition written, manifest body points at the image service"
        );
        (svc.to_string(), actual)
    }
}

/// Build the manifest.
///
/// `plan` should hold only sizes that were produced in `options.body_format`,
/// so the body never points at a missing file.
pub fn build(
    descriptor: &ImageService,
    actual: Size,
    plan: &DerivativePlan,
    options: ManifestOptions<'_>,
) -> Manifest {
    let svc = descriptor.id.trim_end_matches('/');
    let canvas_id = format!("{svc}/canvas");
    let (body_id, body_size) = body_target(svc, actual, plan, &options);

    let body = ImageBody {
        id: body_id,
        type_: "Image".to_string(),
        format: options.body_format.media_type().to_string(),
        width: body_size.width,
        height: body_size.height,
        service: vec![descriptor.embedded()],
    };

    let annotation = Annotation {
        id: format!("{svc}/painting"),
        type_: "Annotation".to_string(),
        motivation: "painting".to_string(),
        body,
        target: canvas_id.clone(),
    };

    let canvas = Canvas {
        id: canvas_id,
        type_: "Canvas".to_string(),
        label: english(options.label),
        width: actual.width,
        height: actual.height,
        items: vec![AnnotationPage {
            id: format!("{svc}/page"),
            type_: "AnnotationPage".to_string(),
            items: vec![annotation],
        }],
    };

    let mut manifest = Manifest {
        context: Context::default(),
        id: format!("{svc}/manifest.json"),
        type_: "Manifest".to_string(),
        label: english(options.label),
        items: vec![canvas],
        rendering: options.renderings,
    };
    manifest.ensure_context();
    manifest
}
