use std::future::{ready, Ready};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use playout_core::{FrameBuffer, PixelFormat, PlayoutResult, VideoFormat};
use playout_render::{FrameConsumer, ReadFrame};

/// Keeps the most recent output frame so it can be written out after the run.
#[derive(Clone, Default)]
pub struct SnapshotConsumer {
    last: Arc<Mutex<Option<ReadFrame>>>,
}

impl SnapshotConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_frame(&self) -> Option<ReadFrame> {
        self.last.lock().clone()
    }

    /// Write the last frame as a PNG. Returns `false` if nothing arrived.
    pub fn save_png(&self, path: &Path) -> Result<bool> {
        let Some(frame) = self.last_frame() else {
            return Ok(false);
        };
        let image = to_rgba(frame.image())
            .with_context(|| format!("frame {}x{} has a short buffer", frame.width(), frame.height()))?;
        image
            .save(path)
            .with_context(|| format!("failed to write snapshot: {}", path.display()))?;
        Ok(true)
    }
}

fn to_rgba(buffer: &FrameBuffer) -> Option<image::RgbaImage> {
    let mut data = buffer.data.clone();
    if buffer.format == PixelFormat::Bgra8 {
        for px in data.chunks_exact_mut(4) {
            px.swap(0, 2);
        }
    }
    image::RgbaImage::from_raw(buffer.width, buffer.height, data)
}

impl FrameConsumer for SnapshotConsumer {
    fn initialize(&mut self, _format: &VideoFormat, _channel_index: u32) -> PlayoutResult<()> {
        *self.last.lock() = None;
        Ok(())
    }

    fn send(&self, frame: ReadFrame) -> Ready<bool> {
        *self.last.lock() = Some(frame);
        ready(true)
    }

    fn name(&self) -> &str {
        "snapshot"
    }

    fn print(&self) -> String {
        "snapshot[]".to_string()
    }

    fn index(&self) -> u32 {
        900
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgra_is_swizzled() {
        let buffer = FrameBuffer::solid(2, 1, PixelFormat::Bgra8, [1, 2, 3, 255]);
        let image = to_rgba(&buffer).unwrap();
        assert_eq!(image.get_pixel(1, 0).0, [3, 2, 1, 255]);
    }

    #[test]
    fn test_nothing_to_save() {
        let consumer = SnapshotConsumer::new();
        let path = std::env::temp_dir().join("playout-snapshot-never-written.png");
        assert!(!consumer.save_png(&path).unwrap());
        assert!(!path.exists());
    }
}
