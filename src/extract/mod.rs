//! Candidate extraction.
//!
//! Per frame: grayscale, Canny, contour bounding rectangles, geometric noise
//! filter. Each surviving rectangle becomes a `Candidate` with a tight crop
//! (Stage-A input) and a wide context crop (Stage-B input), both resized to
//! the classifier input sizes.

mod contours;
mod geometry;

pub use contours::{bounding_rect, contour_rects, edge_map};
pub use geometry::{is_noise, Rect, Window};

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Deserialize;

use crate::config::ExtractorSettings;
use crate::frame::Frame;
use crate::telemetry::ComponentLogger;

/// Channel order of the crops handed to the classifiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// A frame region proposed as a door plate.
///
/// Owns its crops; nothing refers back to the source frame.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub bbox: Rect,
    pub tight: RgbImage,
    pub context: RgbImage,
    pub frame_sequence: u64,
}

pub struct CandidateExtractor {
    settings: ExtractorSettings,
    logger: ComponentLogger,
}

impl CandidateExtractor {
    pub fn new(settings: ExtractorSettings, logger: ComponentLogger) -> Self {
        Self { settings, logger }
    }

    pub fn window(&self) -> Window {
        Window::new(self.settings.window_width, self.settings.window_height)
    }

    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    /// Rectangles in `image` that pass the noise filter, in extraction order.
    pub fn regions(&self, image: &RgbImage) -> Vec<Rect> {
        let edges = edge_map(image, self.settings.canny_low, self.settings.canny_high);
        let window = self.window();
        contour_rects(&edges)
            .into_iter()
            .filter(|rect| !is_noise(*rect, window))
            .collect()
    }

    /// Extract every candidate in `frame`.
    pub fn extract(&self, frame: &Frame) -> Vec<Candidate> {
        let image = frame.image();
        let candidates: Vec<Candidate> = self
            .regions(image)
            .into_iter()
            .filter_map(|bbox| self.candidate(image, bbox, frame.sequence))
            .collect();
        if !candidates.is_empty() {
            self.logger.debug(format!(
                "frame {}: {} candidate(s)",
                frame.sequence,
                candidates.len()
            ));
        }
        candidates
    }

    fn candidate(&self, image: &RgbImage, bbox: Rect, frame_sequence: u64) -> Option<Candidate> {
        let s = &self.settings;
        let tight = self.crop(image, bbox, s.tight_padding, s.tight_size, s.tight_size)?;
        let context = self.crop(
            image,
            bbox,
            s.context_padding,
            s.context_width,
            s.context_height,
        )?;
        Some(Candidate {
            bbox,
            tight,
            context,
            frame_sequence,
        })
    }

    fn crop(
        &self,
        image: &RgbImage,
        bbox: Rect,
        padding: u32,
        out_width: u32,
        out_height: u32,
    ) -> Option<RgbImage> {
        let bound_w = image.width().min(self.settings.window_width);
        let bound_h = image.height().min(self.settings.window_height);
        let region = bbox.padded(padding, bound_w, bound_h);
        if region.is_empty() {
            return None;
        }
        let cropped = imageops::crop_imm(image, region.x, region.y, region.w, region.h).to_image();
        let mut resized = imageops::resize(&cropped, out_width, out_height, FilterType::Triangle);
        if self.settings.channel_order == ChannelOrder::Bgr {
            for pixel in resized.pixels_mut() {
                pixel.0.swap(0, 2);
            }
        }
        Some(resized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DoorplateConfig;
    use crate::ingest::synthetic::{render_scene, PLATE_HEIGHT, PLATE_WIDTH};

    fn extractor(order: ChannelOrder) -> CandidateExtractor {
        let mut settings = DoorplateConfig::default().extractor;
        settings.channel_order = order;
        CandidateExtractor::new(settings, ComponentLogger::root())
    }

    #[test]
    fn finds_synthetic_plate() {
        let frame = Frame::new(render_scene(640, 480, 1), 1);
        let candidates = extractor(ChannelOrder::Rgb).extract(&frame);
        assert!(!candidates.is_empty());

        let plate_y = (480 - PLATE_HEIGHT) / 2;
        let hit = candidates.iter().any(|c| {
            c.bbox.x.abs_diff(11) <= 2
                && c.bbox.y.abs_diff(plate_y) <= 2
                && c.bbox.w.abs_diff(PLATE_WIDTH) <= 3
        });
        assert!(hit, "{:?}", candidates.iter().map(|c| c.bbox).collect::<Vec<_>>());

        for candidate in &candidates {
            assert_eq!(candidate.tight.dimensions(), (48, 48));
            assert_eq!(candidate.context.dimensions(), (96, 48));
            assert_eq!(candidate.frame_sequence, 1);
        }
    }

    #[test]
    fn blank_frame_has_no_candidates() {
        let frame = Frame::new(RgbImage::from_pixel(640, 480, image::Rgb([90, 90, 90])), 1);
        assert!(extractor(ChannelOrder::Rgb).extract(&frame).is_empty());
    }

    #[test]
    fn bgr_order_swaps_channels() {
        let extractor = extractor(ChannelOrder::Bgr);
        let image = RgbImage::from_pixel(640, 480, image::Rgb([10, 20, 30]));
        let crop = extractor
            .crop(&image, Rect::new(100, 100, 60, 30), 5, 48, 48)
            .expect("crop");
        assert_eq!(crop.get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn crops_outside_frame_are_skipped() {
        let extractor = extractor(ChannelOrder::Rgb);
        let image = RgbImage::new(100, 100);
        assert!(extractor
            .crop(&image, Rect::new(150, 150, 60, 30), 0, 48, 48)
            .is_none());
    }
}
