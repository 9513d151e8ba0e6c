//! IIIF Image API 3 image service descriptor (`info.json`).
//!
//! The tiling step writes a *fragment*: id, dimensions, tile metadata and a
//! `level0` profile. [`build`] starts from that fragment when there is one and
//! fills in what only the pipeline knows (the sizes that were rendered and
//! the extra formats that survived). With no fragment it synthesizes a
//! descriptor from the source dimensions.
//!
//! Unknown fields in a fragment are carried through untouched.

use super::{Context, IMAGE_3_CONTEXT, Size};
use crate::imaging::OutputFormat;
use crate::plan::DerivativePlan;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const TYPE: &str = "ImageService3";
const PROTOCOL: &str = "http://iiif.io/api/image";

#[derive(Error, Debug)]
#[error("cannot read descriptor {path}: {reason}")]
pub struct DescriptorReadFailed {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComplianceLevel {
    Level0,
    Level1,
    #[default]
    Level2,
}

/// One entry of the `tiles` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub width: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub scale_factors: Vec<u32>,
}

fn default_type() -> String {
    TYPE.to_string()
}

fn default_protocol() -> String {
    PROTOCOL.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageService {
    #[serde(rename = "@context", default, skip_serializing_if = "Context::is_empty")]
    pub context: Context,
    pub id: String,
    #[serde(rename = "type", default = "default_type")]
    pub type_: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub profile: ComplianceLevel,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tiles: Vec<Tile>,
    #[serde(default)]
    pub sizes: Vec<Size>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_formats: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_formats: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ImageService {
    /// A descriptor for an image with no static tiles.
    pub fn synthesize(service_id: &str, actual: Size) -> Self {
        Self {
            context: Context::new(IMAGE_3_CONTEXT),
            id: service_id.to_string(),
            type_: default_type(),
            protocol: default_protocol(),
            profile: ComplianceLevel::Level2,
            width: actual.width,
            height: actual.height,
            tiles: Vec::new(),
            sizes: Vec::new(),
            preferred_formats: Vec::new(),
            extra_formats: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// The fragment a tiling step writes alongside a static tile pyramid.
    pub fn tiled_fragment(
        service_id: &str,
        actual: Size,
        tile_size: u32,
        scale_factors: Vec<u32>,
    ) -> Self {
        Self {
            profile: ComplianceLevel::Level0,
            tiles: vec![Tile {
                width: tile_size,
                height: Some(tile_size),
                scale_factors,
            }],
            ..Self::synthesize(service_id, actual)
        }
    }

    /// A copy for embedding in another document, without `@context`.
    pub fn embedded(&self) -> Self {
        Self {
            context: Context::default(),
            ..self.clone()
        }
    }
}

/// Read an `info.json` fragment written by the tiling step.
pub fn read_fragment(path: &Path) -> Result<ImageService, DescriptorReadFailed> {
    let failed = |reason: String| DescriptorReadFailed {
        path: path.to_path_buf(),
        reason,
    };
    let bytes = fs::read(path).map_err(|e| failed(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| failed(e.to_string()))
}

/// Assemble the final descriptor.
///
/// `sizes` is always replaced with the plan's sizes. Every available format
/// other than JPEG (the IIIF default) is named in both `preferredFormats` and
/// `extraFormats`. When JPEG is the only one left, the lists name `jpg`.
pub fn build(
    existing: Option<ImageService>,
    service_id: &str,
    actual: Size,
    plan: &DerivativePlan,
    available_formats: &[OutputFormat],
) -> ImageService {
    let mut descriptor = existing.unwrap_or_else(|| ImageService::synthesize(service_id, actual));
    descriptor.context.ensure(IMAGE_3_CONTEXT);
    descriptor.sizes = plan.sizes.clone();

    let mut extra: Vec<String> = available_formats
        .iter()
        .filter(|f| **f != OutputFormat::Jpeg)
        .map(|f| f.extension().to_string())
        .collect();
    if extra.is_empty() && available_formats.contains(&OutputFormat::Jpeg) {
        extra.push(OutputFormat::Jpeg.extension().to_string());
    }
    descriptor.preferred_formats = extra.clone();
    descriptor.extra_formats = extra;
    descriptor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticSettings;
    use crate::plan;
    use serde_json::json;

    const ACTUAL: Size = Size {
        width: 3000,
        height: 2000,
    };

    fn sample_plan() -> DerivativePlan {
        let settings = StaticSettings {
            max: "!1600,1600".into(),
            sizes: vec!["!100,100".into(), "500,".into()],
            ..StaticSettings::default()
        };
        plan::plan(&settings, ACTUAL)
    }

    #[test]
    fn synthesized_descriptor_shape() {
        let d = build(
            None,
            "https://example.org/iiif/img1",
            ACTUAL,
            &sample_plan(),
            &[OutputFormat::Jpeg, OutputFormat::WebP],
        );
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(
            v,
            json!({
                "@context": IMAGE_3_CONTEXT,
                "id": "https://example.org/iiif/img1",
                "type": "ImageService3",
                "protocol": "http://iiif.io/api/image",
                "profile": "level2",
                "width": 3000,
                "height": 2000,
                "sizes": [
                    {"width": 100, "height": 67},
                    {"width": 500, "height": 333},
                    {"width": 1600, "height": 1067}
                ],
                "preferredFormats": ["webp"],
                "extraFormats": ["webp"]
            })
        );
    }

    #[test]
    fn fragment_fields_survive_and_sizes_are_replaced() {
        let mut fragment = ImageService::tiled_fragment("svc", ACTUAL, 512, vec![1, 2, 4, 8]);
        fragment.sizes = vec![Size::new(42, 28)];
        fragment
            .extra
            .insert("rights".into(), json!("http://rightsstatements.org/vocab/InC/1.0/"));

        let d = build(Some(fragment), "svc", ACTUAL, &sample_plan(), &[OutputFormat::Jpeg]);
        assert_eq!(d.profile, ComplianceLevel::Level0);
        assert_eq!(d.tiles[0].scale_factors, vec![1, 2, 4, 8]);
        assert_eq!(d.sizes.len(), 3);

        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["rights"], json!("http://rightsstatements.org/vocab/InC/1.0/"));
        assert_eq!(
            v["tiles"],
            json!([{"width": 512, "height": 512, "scaleFactors": [1, 2, 4, 8]}])
        );
    }

    #[test]
    fn only_surviving_secondary_format_listed() {
        let d = build(None, "svc", ACTUAL, &sample_plan(), &[OutputFormat::WebP]);
        assert_eq!(d.preferred_formats, vec!["webp".to_string()]);
        assert_eq!(d.extra_formats, vec!["webp".to_string()]);
    }

    #[test]
    fn jpeg_alone_is_listed() {
        let d = build(None, "svc", ACTUAL, &sample_plan(), &[OutputFormat::Jpeg]);
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["preferredFormats"], json!(["jpg"]));
        assert_eq!(v["extraFormats"], json!(["jpg"]));
    }

    #[test]
    fn no_surviving_format_omits_lists() {
        let d = build(None, "svc", ACTUAL, &sample_plan(), &[]);
        let v = serde_json::to_value(&d).unwrap();
        assert!(v.get("preferredFormats").is_none());
        assert!(v.get("extraFormats").is_none());
    }

    #[test]
    fn empty_plan_serializes_empty_sizes() {
        let settings = StaticSettings {
            max: String::new(),
            sizes: vec![],
            ..StaticSettings::default()
        };
        let p = plan::plan(&settings, ACTUAL);
        let d = build(None, "svc", ACTUAL, &p, &[OutputFormat::Jpeg]);
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["sizes"], json!([]));
    }

    #[test]
    fn context_added_once() {
        let fragment = ImageService::tiled_fragment("svc", ACTUAL, 512, vec![1]);
        let once = build(Some(fragment), "svc", ACTUAL, &sample_plan(), &[]);
        let twice = build(Some(once.clone()), "svc", ACTUAL, &sample_plan(), &[]);
        assert_eq!(once, twice);
        assert_eq!(serde_json::to_value(&twice).unwrap()["@context"], json!(IMAGE_3_CONTEXT));
    }

    #[test]
    fn embedded_drops_context() {
        let d = ImageService::synthesize("svc", ACTUAL);
        let v = serde_json::to_value(d.embedded()).unwrap();
        assert!(v.get("@context").is_none());
        assert_eq!(v["type"], json!("ImageService3"));
    }

    #[test]
    fn read_fragment_roundtrip_and_failures() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("info.json");

        assert!(read_fragment(&path).is_err());

        fs::write(&path, "{ not json").unwrap();
        let err = read_fragment(&path).unwrap_err();
        assert_eq!(err.path, path);

        let fragment = ImageService::tiled_fragment("svc", ACTUAL, 256, vec![1, 2]);
        fs::write(&path, serde_json::to_vec(&fragment).unwrap()).unwrap();
        assert_eq!(read_fragment(&path).unwrap(), fragment);
    }
}
