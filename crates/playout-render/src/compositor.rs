use playout_core::{FrameBuffer, PlayoutError, PlayoutResult};

use crate::frame::WriteFrame;

/// The compositing stage: one persistent surface, cleared and drawn once
/// per tick.
pub trait Compositor: Send {
    /// Reset the compositing surface before a draw.
    fn clear(&mut self, surface: &mut FrameBuffer);

    /// Draw `frame` onto `surface`, applying the frame's transform.
    ///
    /// This is the only place per-frame visual state is consumed.
    fn draw(&mut self, frame: &WriteFrame, surface: &mut FrameBuffer) -> PlayoutResult<()>;
}

/// Software compositor: Porter-Duff "over" with opacity and pixel offset.
#[derive(Debug, Clone, Default)]
pub struct CpuCompositor {
    draws: u64,
}

impl CpuCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful draw calls.
    pub fn draws(&self) -> u64 {
        self.draws
    }
}

impl Compositor for CpuCompositor {
    fn clear(&mut self, surface: &mut FrameBuffer) {
        surface.clear();
    }

    fn draw(&mut self, frame: &WriteFrame, surface: &mut FrameBuffer) -> PlayoutResult<()> {
        let src = frame.image();
        if !src.same_geometry(surface) {
            return Err(PlayoutError::FormatMismatch {
                expected: format!("{}x{} {:?}", surface.width, surface.height, surface.format),
                actual: format!("{}x{} {:?}", src.width, src.height, src.format),
            });
        }

        let t = frame.transform();
        surface.composite_over(src, t.offset_x, t.offset_y, t.opacity);
        self.draws += 1;
        Ok(())
    }
}
