//! V4L2 capture device.
//!
//! Opens `/dev/videoN`, negotiates RGB3 (falling back to whatever the driver
//! keeps, as long as it is RGB3 or YUYV) and streams through mmap buffers.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{to_rgb_image, PixelFormat};
use super::{CaptureDevice, Grab};
use crate::telemetry::ComponentLogger;

const STREAM_BUFFERS: u32 = 4;

pub struct V4l2Device {
    path: String,
    width: u32,
    height: u32,
    target_fps: u32,
    state: Option<V4l2State>,
    active_width: u32,
    active_height: u32,
    pixel_format: PixelFormat,
    frames_captured: u64,
    logger: ComponentLogger,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Device {
    pub fn new(
        path: &str,
        width: u32,
        height: u32,
        target_fps: u32,
        logger: ComponentLogger,
    ) -> Self {
        Self {
            path: path.to_string(),
            width,
            height,
            target_fps,
            state: None,
            active_width: width,
            active_height: height,
            pixel_format: PixelFormat::Rgb24,
            frames_captured: 0,
            logger,
        }
    }
}

impl CaptureDevice for V4l2Device {
    fn name(&self) -> &str {
        &self.path
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.path)
            .with_context(|| format!("open v4l2 device {}", self.path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                self.logger
                    .warn(format!("failed to set RGB3 format on {}: {}", self.path, err));
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "{} delivers unsupported pixel format {}",
                self.path,
                format.fourcc
            )
        })?;

        if self.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
            if let Err(err) = device.set_params(&params) {
                self.logger
                    .warn(format!("failed to set {} fps on {}: {}", self.target_fps, self.path, err));
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        self.logger.info(format!(
            "connected to {} ({}x{} {:?})",
            self.path, self.active_width, self.active_height, self.pixel_format
        ));
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.state.is_some()
    }

    fn grab(&mut self) -> Result<Grab> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Ok(Grab::EndOfStream);
        };
        let (width, height, format) = (self.active_width, self.active_height, self.pixel_format);
        let image = state.with_stream_mut(|stream| -> Result<_> {
            let (buf, meta) = stream.next().context("capture v4l2 frame")?;
            if meta.bytesused == 0 {
                return Ok(None);
            }
            let used = (meta.bytesused as usize).min(buf.len());
            to_rgb_image(&buf[..used], width, height, format).map(Some)
        })?;

        match image {
            Some(image) => {
                self.frames_captured += 1;
                Ok(Grab::Frame(image))
            }
            None => Ok(Grab::Skipped),
        }
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            self.logger.info(format!(
                "released {} after {} frames",
                self.path, self.frames_captured
            ));
        }
    }
}
