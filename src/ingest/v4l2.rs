//! V4L2 capture.
//!
//! `V4l2Opener` maps each open strategy onto a device node and pixel format:
//! direct paths and indices negotiate RGB3 (falling back to whatever the
//! driver picks), the platform backend strategy asks for MJPG.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::path::{Path, PathBuf};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CameraDevice, CaptureSettings, DeviceOpener, OpenStrategy, Resolution};
use crate::frame::{Frame, FrameOrigin};

const CAPTURE_BUFFERS: u32 = 4;

#[derive(Clone, Copy, Debug, Default)]
pub struct V4l2Opener;

impl DeviceOpener for V4l2Opener {
    fn open(
        &self,
        strategy: &OpenStrategy,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn CameraDevice>> {
        let (path, format) = match strategy {
            OpenStrategy::DevicePath(path) => (path.clone(), PixelFormat::Rgb24),
            OpenStrategy::Index(index) => (index_path(*index), PixelFormat::Rgb24),
            OpenStrategy::PlatformBackend(index) => (index_path(*index), PixelFormat::Mjpeg),
            OpenStrategy::FallbackIndex0 => (index_path(0), PixelFormat::Rgb24),
        };
        Ok(Box::new(V4l2Device::connect(&path, format, settings)?))
    }
}

fn index_path(index: u32) -> PathBuf {
    PathBuf::from(format!("/dev/video{}", index))
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

/// An open V4L2 device with a running mmap stream.
pub struct V4l2Device {
    path: PathBuf,
    state: V4l2State,
    format: PixelFormat,
    active: Resolution,
    frames_captured: u64,
}

impl V4l2Device {
    fn connect(path: &Path, preferred: PixelFormat, settings: &CaptureSettings) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(path)
            .with_context(|| format!("open v4l2 device {}", path.display()))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = settings.resolution.width;
        format.height = settings.resolution.height;
        format.fourcc = v4l::FourCC::new(&preferred.fourcc());

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("v4l2 {}: failed to set format: {}", path.display(), err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 {}: unsupported pixel format {}",
                path.display(),
                format.fourcc
            )
        })?;

        if settings.frame_rate > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.frame_rate);
            if let Err(err) = device.set_params(&params) {
                log::warn!("v4l2 {}: failed to set fps: {}", path.display(), err);
            }
        }

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, CAPTURE_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        Ok(Self {
            path: path.to_path_buf(),
            state,
            format: pixel_format,
            active: Resolution::new(format.width, format.height),
            frames_captured: 0,
        })
    }
}

impl CameraDevice for V4l2Device {
    fn read_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.active.width, self.active.height, self.format);
        let image = self.state.with_mut(|fields| -> Result<image::RgbImage> {
            let (buf, meta) = fields.stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_rgb(&buf[..used], width, height, format)
        })?;
        self.frames_captured += 1;
        Ok(Frame::from_image(image, FrameOrigin::Device))
    }

    fn resolution(&self) -> Resolution {
        self.active
    }

    fn label(&self) -> String {
        format!("{} ({} frames)", self.path.display(), self.frames_captured)
    }
}
