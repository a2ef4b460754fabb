//! extract_candidates - run the candidate extractor on one image
//!
//! Prints every rectangle that passes the noise filter and, with `--out`,
//! writes the tight and context crops that would be sent to the classifiers.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use doorplate_reader::config::DoorplateConfig;
use doorplate_reader::{CandidateExtractor, ComponentLogger, Frame};

#[derive(Parser, Debug)]
#[command(author, version, about = "Show door-plate candidates found in an image")]
struct Args {
    /// Input image (PNG or JPEG).
    image: PathBuf,

    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "DOORPLATE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for `<n>_tight.png` / `<n>_context.png` crops.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Print raw contour rectangles before filtering as well.
    #[arg(long)]
    all: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = DoorplateConfig::load_from(args.config.as_deref())?;
    let image = image::open(&args.image)
        .with_context(|| format!("failed to open {}", args.image.display()))?
        .to_rgb8();
    let extractor = CandidateExtractor::new(
        config.extractor.clone(),
        ComponentLogger::root().child("extract"),
    );

    if args.all {
        let settings = extractor.settings();
        let edges =
            doorplate_reader::extract::edge_map(&image, settings.canny_low, settings.canny_high);
        for rect in doorplate_reader::extract::contour_rects(&edges) {
            let verdict = if doorplate_reader::is_noise(rect, extractor.window()) {
                "noise"
            } else {
                "keep"
            };
            println!("contour {:>4},{:>4} {:>4}x{:<4} {}", rect.x, rect.y, rect.w, rect.h, verdict);
        }
    }

    let frame = Frame::new(image, 1);
    let candidates = extractor.extract(&frame);
    println!(
        "{}: {} candidate(s) in {}x{} (window {}x{})",
        args.image.display(),
        candidates.len(),
        frame.width(),
        frame.height(),
        extractor.window().width,
        extractor.window().height
    );

    if let Some(out) = &args.out {
        std::fs::create_dir_all(out)
            .with_context(|| format!("failed to create {}", out.display()))?;
    }
    for (index, candidate) in candidates.iter().enumerate() {
        let bbox = candidate.bbox;
        println!("#{} x={} y={} w={} h={}", index, bbox.x, bbox.y, bbox.w, bbox.h);
        if let Some(out) = &args.out {
            candidate
                .tight
                .save(out.join(format!("{}_tight.png", index)))
                .context("failed to write tight crop")?;
            candidate
                .context
                .save(out.join(format!("{}_context.png", index)))
                .context("failed to write context crop")?;
        }
    }
    Ok(())
}
