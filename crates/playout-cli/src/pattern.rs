//! Synthetic input for headless runs.

use playout_core::{AudioBlock, FrameBuffer, PlayoutResult, VideoFormat};
use playout_render::{FrameSource, WriteFrame};

/// BGRA colour bars: white, yellow, cyan, green, magenta, red, blue, black.
const BARS: [[u8; 4]; 8] = [
    [235, 235, 235, 255],
    [16, 235, 235, 255],
    [235, 235, 16, 255],
    [16, 235, 16, 255],
    [235, 16, 235, 255],
    [16, 16, 235, 255],
    [235, 16, 16, 255],
    [16, 16, 16, 255],
];

/// Colour bars with a sweep line that moves one step per frame, plus silence.
#[derive(Debug, Default)]
pub struct TestPattern {
    frame: u64,
}

impl TestPattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// Column of the sweep line for the next frame.
    fn sweep(&self, width: u32) -> u32 {
        ((self.frame * 8) % u64::from(width.max(1))) as u32
    }

    fn draw(&self, format: &VideoFormat) -> FrameBuffer {
        let mut image = FrameBuffer::new(format.width, format.height, format.pixel_format());
        let bar_width = (format.width / BARS.len() as u32).max(1);
        let sweep = self.sweep(format.width);

        for y in 0..format.height {
            for x in 0..format.width {
                let bar = ((x / bar_width) as usize).min(BARS.len() - 1);
                let px = if x == sweep { [255, 255, 255, 255] } else { BARS[bar] };
                image.set_pixel(x, y, px);
            }
        }
        image
    }
}

impl FrameSource for TestPattern {
    fn next_frame(&mut self, format: &VideoFormat) -> PlayoutResult<Option<WriteFrame>> {
        let image = self.draw(format);
        let audio = AudioBlock::silence(format.audio_channels, format.audio_samples_per_frame());
        self.frame += 1;
        Ok(Some(WriteFrame::new(image, audio)))
    }
}
