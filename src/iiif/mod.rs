//! IIIF document models and URL conventions.
//!
//! - [`size`]: Image API size parameters (`w,`, `!w,h`, `pct:n`, ...)
//! - [`image_service`]: the Image API 3 descriptor (`info.json`)
//! - [`presentation`]: the Presentation API 3 single-canvas manifest
//!
//! Shared here: the on-disk [`Layout`] of size path segments and the JSON-LD
//! [`Context`] value used by both documents.

pub mod image_service;
pub mod presentation;
pub mod size;

pub use image_service::{DescriptorReadFailed, ImageService};
pub use presentation::Manifest;
pub use size::{MalformedSizeRequest, Size, SizeRequest, resolve};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const IMAGE_3_CONTEXT: &str = "http://iiif.io/api/image/3/context.json";
pub const PRESENTATION_3_CONTEXT: &str = "http://iiif.io/api/presentation/3/context.json";

/// Which form of the `{size}` path segment static files are written under.
///
/// Image API 2 clients request `w,`; Image API 3 clients request `w,h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layout {
    /// Width-only segments (`full/500,/0/default.jpg`).
    V2,
    /// Width-and-height segments (`full/500,333/0/default.jpg`).
    #[default]
    V3,
    /// Both; the `w,` files are byte-identical copies of the `w,h` files.
    V2AndV3,
}

impl Layout {
    /// The segment a file is written under first.
    pub fn primary_segment(self, width: u32, height: u32) -> String {
        match self {
            Layout::V2 => format!("{width},"),
            Layout::V3 | Layout::V2AndV3 => format!("{width},{height}"),
        }
    }

    /// The `w,` mirror segment, when this layout keeps one next to `w,h`.
    pub fn mirror_segment(self, width: u32) -> Option<String> {
        match self {
            Layout::V2AndV3 => Some(format!("{width},")),
            Layout::V2 | Layout::V3 => None,
        }
    }
}

/// A JSON-LD `@context`: a single URI serializes as a string, several as an array.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Context(Vec<String>);

impl Context {
    pub fn new(uri: &str) -> Self {
        Self(vec![uri.to_string()])
    }

    /// Add `uri` unless it is already present. Calling this twice is harmless.
    pub fn ensure(&mut self, uri: &str) {
        if !self.contains(uri) {
            self.0.push(uri.to_string());
        }
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.0.iter().any(|c| c == uri)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Context {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [single] => serializer.serialize_str(single),
            many => many.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Context {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(uri) => Context(vec![uri]),
            Raw::Many(uris) => Context(uris),
        })
    }
}
