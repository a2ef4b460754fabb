//! Image-sequence capture device (`file://<dir>`).
//!
//! Replays the decodable image files of a directory in lexical order. Files
//! that fail to decode are reported as failed grabs, like a camera read
//! error.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::{CaptureDevice, Grab};
use crate::telemetry::ComponentLogger;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub struct ImageSequenceDevice {
    name: String,
    dir: PathBuf,
    loop_playback: bool,
    frame_limit: Option<u64>,
    files: Vec<PathBuf>,
    cursor: usize,
    frames_read: u64,
    opened: bool,
    logger: ComponentLogger,
}

impl ImageSequenceDevice {
    pub fn new(
        dir: impl AsRef<Path>,
        loop_playback: bool,
        frame_limit: Option<u64>,
        logger: ComponentLogger,
    ) -> Self {
        let dir = dir.as_ref().to_path_buf();
        Self {
            name: format!("file://{}", dir.display()),
            dir,
            loop_playback,
            frame_limit,
            files: Vec::new(),
            cursor: 0,
            frames_read: 0,
            opened: false,
            logger,
        }
    }
}

impl CaptureDevice for ImageSequenceDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("read image directory {}", self.dir.display()))?
        {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    IMAGE_EXTENSIONS
                        .iter()
                        .any(|known| ext.eq_ignore_ascii_case(known))
                });
            if is_image && path.is_file() {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!("no images found in {}", self.dir.display()));
        }
        files.sort();
        self.logger.info(format!(
            "{} images in {}{}",
            files.len(),
            self.dir.display(),
            if self.loop_playback { " (looping)" } else { "" }
        ));
        self.files = files;
        self.cursor = 0;
        self.opened = true;
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn grab(&mut self) -> Result<Grab> {
        if !self.opened
            || self
                .frame_limit
                .is_some_and(|limit| self.frames_read >= limit)
        {
            return Ok(Grab::EndOfStream);
        }
        if self.cursor >= self.files.len() {
            if !self.loop_playback {
                return Ok(Grab::EndOfStream);
            }
            self.cursor = 0;
        }
        let path = &self.files[self.cursor];
        self.cursor += 1;
        let image = image::open(path)
            .with_context(|| format!("decode {}", path.display()))?
            .to_rgb8();
        self.frames_read += 1;
        Ok(Grab::Frame(image))
    }

    fn release(&mut self) {
        self.opened = false;
        self.files.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn replays_images_in_lexical_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        RgbImage::from_pixel(4, 4, image::Rgb([2, 2, 2])).save(dir.path().join("b.png"))?;
        RgbImage::from_pixel(4, 4, image::Rgb([1, 1, 1])).save(dir.path().join("a.png"))?;
        std::fs::write(dir.path().join("notes.txt"), "ignored")?;

        let mut device =
            ImageSequenceDevice::new(dir.path(), false, None, ComponentLogger::root());
        device.open()?;

        match device.grab()? {
            Grab::Frame(image) => assert_eq!(image.get_pixel(0, 0).0, [1, 1, 1]),
            other => panic!("expected frame, got {:?}", other),
        }
        assert!(matches!(device.grab()?, Grab::Frame(_)));
        assert!(matches!(device.grab()?, Grab::EndOfStream));
        Ok(())
    }

    #[test]
    fn loops_until_frame_limit() -> Result<()> {
        let dir = tempfile::tempdir()?;
        RgbImage::new(4, 4).save(dir.path().join("only.png"))?;

        let mut device =
            ImageSequenceDevice::new(dir.path(), true, Some(3), ComponentLogger::root());
        device.open()?;
        for _ in 0..3 {
            assert!(matches!(device.grab()?, Grab::Frame(_)));
        }
        assert!(matches!(device.grab()?, Grab::EndOfStream));
        Ok(())
    }

    #[test]
    fn empty_directory_fails_to_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut device =
            ImageSequenceDevice::new(dir.path(), false, None, ComponentLogger::root());
        assert!(device.open().is_err());
    }
}
