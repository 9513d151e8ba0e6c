use clap::Parser;
use clap::error::ErrorKind;
use static_iiif::job::Job;
use static_iiif::{config, output, process};
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "static-iiif")]
#[command(about = "Bake a source image into a static IIIF image service")]
#[command(long_about = "\
Bake a source image into a static IIIF image service

Writes tiles, sized renditions, info.json and a single-canvas manifest.json
under the destination. Source and destination may be local paths, file://
URIs or s3://bucket/key URIs.

Output layout:

  {dest}/
  ├── info.json                          # Image API 3 descriptor
  ├── manifest.json                      # Presentation API 3 manifest
  ├── full/max/0/default.jpg             # max rendition
  ├── full/500,333/0/default.jpg         # one per configured size
  ├── 0,0,512,512/512,512/0/default.jpg  # tiles
  └── {id}.jpg.tif                       # pyramidal TIFF, if configured

Settings are read from ./static-iiif.toml when present. Log verbosity
follows RUST_LOG (default: static_iiif=info).")]
#[command(version)]
struct Cli {
    /// Source image path or URI
    source: String,

    /// Destination folder path or URI
    destination: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.print()?;
            return Ok(());
        }
        Err(_) => {
            eprintln!("Args should be source-image, dest-folder");
            return Ok(());
        }
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("static_iiif=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = config::load_config(Path::new("."))?;
    init_thread_pool(&config.processing);
    let job = Job::from_cli(&cli.source, &cli.destination, &config)?;

    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            output::print_operation_event(&event);
        }
    });
    let result = process::process(&job, &config, Some(tx));
    printer
        .join()
        .map_err(|_| "progress printer thread panicked")?;

    output::print_job_summary(&result?);
    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
