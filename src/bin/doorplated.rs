//! doorplated - door-number plate reader daemon
//!
//! This daemon:
//! 1. Starts the label worker and waits until both models are loaded
//! 2. Opens the capture device (bufferless, newest frame only)
//! 3. Extracts plate candidates from every frame it reads
//! 4. Publishes each accepted label as `{"label": ...}` over MQTT (QoS 1)
//! 5. Shuts down in order on Ctrl-C / SIGTERM or when the source ends

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use doorplate_reader::config::{device_uri_for_index, DoorplateConfig};
use doorplate_reader::detect::BackendRegistry;
use doorplate_reader::publish::publisher_from_settings;
use doorplate_reader::{ComponentLogger, Pipeline};

#[derive(Parser, Debug)]
#[command(author, version, about = "Read door-number plates from a camera and publish them")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "DOORPLATE_CONFIG")]
    config: Option<PathBuf>,

    /// Capture device: camera index, /dev/videoN, stub://NAME or file://DIR.
    #[arg(long)]
    device: Option<String>,

    /// Inference backend name (see --list-backends).
    #[arg(long)]
    backend: Option<String>,

    /// Log labels instead of publishing them.
    #[arg(long)]
    dry_run: bool,

    /// Print the compiled-in inference backends and exit.
    #[arg(long)]
    list_backends: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let registry = BackendRegistry::with_builtin();
    if args.list_backends {
        for name in registry.list() {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut config = DoorplateConfig::load_from(args.config.as_deref())?;
    if let Some(device) = args.device {
        config.capture.device = match device.parse::<u32>() {
            Ok(index) => device_uri_for_index(index),
            Err(_) => device,
        };
    }
    if let Some(backend) = args.backend {
        config.models.backend = backend.to_lowercase();
    }

    let logger = ComponentLogger::root();
    let shutdown = Arc::new(AtomicBool::new(false));
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        signal.store(true, Ordering::Release);
    })
    .context("error setting Ctrl-C handler")?;

    let publisher = publisher_from_settings(&config.mqtt, args.dry_run, logger.child("publish"))?;
    logger.info(format!(
        "doorplated {} starting (device {}, backend {}, publisher {})",
        env!("CARGO_PKG_VERSION"),
        config.capture.device,
        config.models.backend,
        publisher.name()
    ));

    let pipeline = Pipeline::start(config, &registry, publisher, logger.clone())?;
    let report = pipeline.run(&shutdown)?;

    if report.worker.is_none() {
        logger.error("label worker did not stop cleanly");
    }
    logger.info(format!(
        "final label '{}', {:.1} fps, {} frames dropped by capture",
        report.final_label, report.fps, report.capture.frames_dropped
    ));
    Ok(())
}
