//! Synthetic capture device (`stub://`).
//!
//! Renders a flat grey scene with one bright door plate whose position drifts
//! slowly across the frame. Every plate passes the extractor's geometric
//! filter, so the device exercises the full pipeline without a camera.

use anyhow::Result;
use image::{Rgb, RgbImage};
use std::time::{Duration, Instant};

use super::{CaptureDevice, Grab};
use crate::telemetry::ComponentLogger;

pub const PLATE_WIDTH: u32 = 60;
pub const PLATE_HEIGHT: u32 = 30;
const BACKGROUND: Rgb<u8> = Rgb([90, 90, 90]);
const PLATE: Rgb<u8> = Rgb([235, 235, 235]);
const INK: Rgb<u8> = Rgb([20, 20, 20]);

pub struct SyntheticDevice {
    name: String,
    width: u32,
    height: u32,
    frame_interval: Option<Duration>,
    frame_limit: Option<u64>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    opened: bool,
    logger: ComponentLogger,
}

impl SyntheticDevice {
    pub fn new(
        name: &str,
        width: u32,
        height: u32,
        target_fps: u32,
        frame_limit: Option<u64>,
        logger: ComponentLogger,
    ) -> Self {
        let frame_interval =
            (target_fps > 0).then(|| Duration::from_micros(1_000_000 / u64::from(target_fps)));
        Self {
            name: name.to_string(),
            width,
            height,
            frame_interval,
            frame_limit,
            frame_count: 0,
            last_frame_at: None,
            opened: false,
            logger,
        }
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame_at) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }
}

impl CaptureDevice for SyntheticDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        self.logger.info(format!(
            "rendering {} at {}x{}",
            self.name, self.width, self.height
        ));
        self.opened = true;
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn grab(&mut self) -> Result<Grab> {
        if !self.opened {
            return Ok(Grab::EndOfStream);
        }
        if self
            .frame_limit
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Ok(Grab::EndOfStream);
        }
        self.pace();
        self.frame_count += 1;
        Ok(Grab::Frame(render_scene(
            self.width,
            self.height,
            self.frame_count,
        )))
    }

    fn release(&mut self) {
        self.opened = false;
    }
}

/// Render the synthetic scene for frame number `frame`.
pub fn render_scene(width: u32, height: u32, frame: u64) -> RgbImage {
    let mut image = RgbImage::from_pixel(width, height, BACKGROUND);
    let span_x = width.saturating_sub(PLATE_WIDTH + 20).max(1);
    let x = 10 + (frame as u32 % span_x);
    let y = height.saturating_sub(PLATE_HEIGHT) / 2;
    draw_plate(&mut image, x, y);
    image
}

/// Draw a plate with three dark glyph strokes at `(x, y)`.
pub fn draw_plate(image: &mut RgbImage, x: u32, y: u32) {
    fill(image, x, y, PLATE_WIDTH, PLATE_HEIGHT, PLATE);
    for glyph in 0..3 {
        let gx = x + 10 + glyph * 16;
        fill(image, gx, y + 8, 6, PLATE_HEIGHT - 16, INK);
    }
}

fn fill(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x1 = (x + w).min(image.width());
    let y1 = (y + h).min(image.height());
    for py in y.min(y1)..y1 {
        for px in x.min(x1)..x1 {
            image.put_pixel(px, py, color);
        }
    }
}
