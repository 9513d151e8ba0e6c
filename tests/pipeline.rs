//! End-to-end runs of the real engine on a synthetic image.
//!
//! Each test writes a small JPEG into a temp dir, runs a local job through
//! `static_iiif::process`, and checks the file layout and both documents.

use image::{ImageEncoder, RgbImage};
use serde_json::{Value, json};
use static_iiif::config::{AppConfig, StaticSettings};
use static_iiif::iiif::Layout;
use static_iiif::imaging::OutputFormat;
use static_iiif::job::{FileOutputs, Job, StaticOutputs, TileFileOutput};
use static_iiif::storage::Location;
use std::path::Path;
use tempfile::TempDir;

const SVC: &str = "https://example.org/iiif/photo";

fn write_jpeg(path: &Path, width: u32, height: u32) {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 96])
    });
    let file = std::fs::File::create(path).unwrap();
    image::codecs::jpeg::JpegEncoder::new_with_quality(file, 90)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn config(tmp: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.processing.scratch_dir = Some(tmp.join("scratch"));
    config
}

fn job(tmp: &Path, settings: StaticSettings) -> Job {
    let source = tmp.join("photo.jpg");
    write_jpeg(&source, 600, 400);
    Job {
        id: "photo".into(),
        origin: Location::Local(source),
        static_outputs: Some(StaticOutputs {
            location: Location::Local(tmp.join("out")),
            settings: StaticSettings {
                service_url: SVC.into(),
                tile_size: 256,
                ..settings
            },
        }),
        file_outputs: None,
    }
}

fn settings(max: &str, sizes: &[&str]) -> StaticSettings {
    StaticSettings {
        max: max.into(),
        sizes: sizes.iter().map(|s| s.to_string()).collect(),
        ..StaticSettings::default()
    }
}

#[test]
fn local_job_writes_static_layout() {
    let tmp = TempDir::new().unwrap();
    let job = job(tmp.path(), settings("!300,300", &["!100,100", "200,"]));
    let outcome = static_iiif::process(&job, &config(tmp.path()), None).unwrap();

    assert_eq!(outcome.report.failures().count(), 0);
    let out = tmp.path().join("out");
    for rel in [
        "info.json",
        "manifest.json",
        "full/max/0/default.jpg",
        "full/max/0/default.webp",
        "full/100,67/0/default.jpg",
        "full/200,133/0/default.webp",
        "full/300,200/0/default.jpg",
        // tiles: 600x400 at 256 gives scale factors 1, 2, 4
        "0,0,256,256/256,256/0/default.jpg",
        "512,256,88,144/88,144/0/default.webp",
        "0,0,600,400/150,100/0/default.jpg",
    ] {
        assert!(out.join(rel).exists(), "missing {rel}");
    }
    assert_eq!(
        image::image_dimensions(out.join("full/200,133/0/default.jpg")).unwrap(),
        (200, 133)
    );
    assert_eq!(
        image::image_dimensions(out.join("full/max/0/default.jpg")).unwrap(),
        (300, 200)
    );
}

#[test]
fn documents_describe_outputs() {
    let tmp = TempDir::new().unwrap();
    let job = job(tmp.path(), settings("!300,300", &["!100,100", "200,"]));
    static_iiif::process(&job, &config(tmp.path()), None).unwrap();

    let info = read_json(&tmp.path().join("out/info.json"));
    assert_eq!(info["@context"], json!("http://iiif.io/api/image/3/context.json"));
    assert_eq!(info["type"], json!("ImageService3"));
    assert_eq!(info["protocol"], json!("http://iiif.io/api/image"));
    assert_eq!(info["id"], json!(SVC));
    assert_eq!(info["width"], json!(600));
    assert_eq!(info["height"], json!(400));
    assert_eq!(
        info["tiles"],
        json!([{"width": 256, "height": 256, "scaleFactors": [1, 2, 4]}])
    );
    assert_eq!(
        info["sizes"],
        json!([
            {"width": 100, "height": 67},
            {"width": 200, "height": 133},
            {"width": 300, "height": 200}
        ])
    );
    assert_eq!(info["extraFormats"], json!(["webp"]));

    let manifest = read_json(&tmp.path().join("out/manifest.json"));
    assert_eq!(
        manifest["@context"],
        json!("http://iiif.io/api/presentation/3/context.json")
    );
    assert_eq!(manifest["id"], json!(format!("{SVC}/manifest.json")));
    assert_eq!(manifest["label"], json!({"en": ["photo.jpg"]}));
    let canvas = &manifest["items"][0];
    assert_eq!((canvas["width"].clone(), canvas["height"].clone()), (json!(600), json!(400)));
    let annotation = &canvas["items"][0]["items"][0];
    assert_eq!(annotation["motivation"], json!("painting"));
    assert_eq!(annotation["target"], json!(format!("{SVC}/canvas")));
    assert_eq!(
        annotation["body"]["id"],
        json!(format!("{SVC}/full/300,200/0/default.jpg"))
    );
    assert_eq!(annotation["body"]["format"], json!("image/jpeg"));
    assert_eq!(annotation["body"]["service"][0]["type"], json!("ImageService3"));
}

#[test]
fn v2_and_v3_layout_writes_both_segments() {
    let tmp = TempDir::new().unwrap();
    let mut s = settings("", &["200,"]);
    s.layout = Layout::V2AndV3;
    s.webp = false;
    let job = job(tmp.path(), s);
    static_iiif::process(&job, &config(tmp.path()), None).unwrap();

    let out = tmp.path().join("out");
    assert_eq!(
        std::fs::read(out.join("full/200,133/0/default.jpg")).unwrap(),
        std::fs::read(out.join("full/200,/0/default.jpg")).unwrap()
    );
    assert!(out.join("0,0,256,256/256,/0/default.jpg").exists());
    assert!(out.join("0,0,256,256/256,256/0/default.jpg").exists());
}

#[test]
fn pyramidal_tiff_is_linked_from_manifest() {
    let tmp = TempDir::new().unwrap();
    let mut job = job(tmp.path(), settings("", &["200,"]));
    job.file_outputs = Some(FileOutputs {
        location: Location::Local(tmp.path().join("out")),
        outputs: vec![TileFileOutput::PyramidalTiff {
            file_name: None,
            tile_format: OutputFormat::Jpeg,
            quality: 85,
            tile_size: 256,
        }],
    });
    let outcome = static_iiif::process(&job, &config(tmp.path()), None).unwrap();

    assert_eq!(outcome.report.failures().count(), 0);
    let tif = std::fs::read(tmp.path().join("out/photo.jpg.tif")).unwrap();
    assert_eq!(&tif[0..4], b"II\x2a\x00");
    let manifest = read_json(&tmp.path().join("out/manifest.json"));
    assert_eq!(manifest["rendering"][0]["id"], json!(format!("{SVC}/photo.jpg.tif")));
    assert_eq!(manifest["rendering"][0]["format"], json!("image/tiff"));
}

#[test]
fn scratch_is_removed_after_job() {
    let tmp = TempDir::new().unwrap();
    let job = job(tmp.path(), settings("", &["200,"]));
    static_iiif::process(&job, &config(tmp.path()), None).unwrap();
    assert!(!tmp.path().join("scratch/photo").exists());
}

#[test]
fn job_from_cli_uses_destination_as_service_id() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("photo.jpg");
    write_jpeg(&source, 600, 400);
    let dest = tmp.path().join("out");

    let mut config = config(tmp.path());
    config.static_outputs.sizes = vec!["200,".into()];
    config.static_outputs.max = String::new();
    let job = Job::from_cli(
        source.to_str().unwrap(),
        dest.to_str().unwrap(),
        &config,
    )
    .unwrap();
    static_iiif::process(&job, &config, None).unwrap();

    let info = read_json(&dest.join("info.json"));
    assert_eq!(info["id"], json!(dest.to_str().unwrap()));
}
