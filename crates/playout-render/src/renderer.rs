//! Triple-buffered frame renderer.
//!
//! Three roles advance once per accepted input:
//!
//! - **writing** receives the new input; its upload starts and is not waited on.
//! - **drawing** is the previous tick's writing frame, composited this tick.
//! - **reading** holds the published result of the last composite.
//!
//! The frame returned by a call is the composite of the input accepted by
//! the call before it, so output lags input by exactly one call. The very
//! first call composites the blank seed frame.

use std::panic::{self, AssertUnwindSafe};

use playout_core::{FrameBuffer, PlayoutError, PlayoutResult, VideoFormat};

use crate::compositor::Compositor;
use crate::frame::{frame_storage_pool, FrameStoragePool, PendingRead, ReadFrame, WriteFrame};
use crate::pool::PoolStats;

/// Role of a pipeline slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRole {
    Writing,
    Drawing,
    Reading,
}

/// The three pipeline slots. Only [`PipelineSlots::rotate`] moves frames
/// between the writing and drawing roles.
#[derive(Debug, Default)]
struct PipelineSlots {
    writing: Option<WriteFrame>,
    drawing: Option<WriteFrame>,
    reading: Option<ReadFrame>,
}

impl PipelineSlots {
    /// `drawing := writing`, `writing := input`. Returns the new writing frame.
    fn rotate(&mut self, input: WriteFrame) -> &mut WriteFrame {
        debug_assert!(self.drawing.is_none(), "drawing slot not released last tick");
        self.drawing = self.writing.take();
        self.writing.insert(input)
    }

    /// Close the previous result. It stays in the reading slot until a new
    /// composite replaces it.
    fn close_reading(&self) {
        if let Some(previous) = &self.reading {
            previous.end_read();
        }
    }

    fn publish(&mut self, frame: ReadFrame) {
        self.reading = Some(frame);
    }

    /// Drop the renderer's hold on the drawing frame.
    fn release_drawing(&mut self) {
        self.drawing = None;
    }

    fn occupied(&self, role: SlotRole) -> bool {
        match role {
            SlotRole::Writing => self.writing.is_some(),
            SlotRole::Drawing => self.drawing.is_some(),
            SlotRole::Reading => self.reading.is_some(),
        }
    }
}

/// Renders one output frame per accepted input frame.
///
/// Owned by a single thread; ticks never overlap.
pub struct FrameRenderer<C: Compositor> {
    format: VideoFormat,
    compositor: C,
    surface: FrameBuffer,
    pool: FrameStoragePool,
    slots: PipelineSlots,
    ticks: u64,
    failed_ticks: u64,
}

impl<C: Compositor> FrameRenderer<C> {
    /// Build a renderer for `format`.
    pub fn new(format: VideoFormat, compositor: C) -> PlayoutResult<Self> {
        let (surface, pool, slots) = Self::allocate(&format)?;
        tracing::info!(format = %format, "frame renderer created");

        Ok(Self {
            format,
            compositor,
            surface,
            pool,
            slots,
            ticks: 0,
            failed_ticks: 0,
        })
    }

    /// Reconstruct every format-dependent part for `format`.
    ///
    /// There is no in-place resize: the surface, pool and slots are replaced
    /// and the pipeline restarts from a blank seed. Only the compositor is
    /// kept. On error the renderer is left unchanged.
    pub fn rebuild(&mut self, format: VideoFormat) -> PlayoutResult<()> {
        let (surface, pool, slots) = Self::allocate(&format)?;
        tracing::info!(from = %self.format, to = %format, "frame renderer rebuilt");

        self.surface = surface;
        self.pool = pool;
        self.slots = slots;
        self.format = format;
        Ok(())
    }

    fn allocate(format: &VideoFormat) -> PlayoutResult<(FrameBuffer, FrameStoragePool, PipelineSlots)> {
        let surface = FrameBuffer::try_new(format.width, format.height, format.pixel_format())
            .ok_or_else(|| PlayoutError::allocation("compositing surface", format.size()))?;
        let seed = WriteFrame::blank(format)?;
        let slots = PipelineSlots {
            writing: Some(seed),
            drawing: None,
            reading: None,
        };
        Ok((surface, frame_storage_pool("read-frames", format), slots))
    }

    /// Advance the pipeline by one tick.
    ///
    /// - `None` input is a no-op and yields `Ok(None)`.
    /// - A compositing failure is logged and yields `Ok(None)`; the slots
    ///   have already rotated, so the failed input is not retried.
    /// - Running out of frame storage is returned as `Err` and is fatal.
    pub fn render(&mut self, input: Option<WriteFrame>) -> PlayoutResult<Option<ReadFrame>> {
        let Some(input) = input else {
            return Ok(None);
        };
        self.ticks += 1;

        // Note: the matching end_write happens when the frame is released.
        self.slots.rotate(input).begin_write();

        self.slots.close_reading();

        if let Err(err) = self.composite() {
            self.failed_ticks += 1;
            self.slots.release_drawing();
            tracing::error!(tick = self.ticks, error = %err, "failed to composite frame");
            return Ok(None);
        }

        let mut reading = PendingRead::new(self.pool.acquire()?);
        reading.begin_read(&self.surface)?;
        if let Some(drawing) = self.slots.drawing.as_mut() {
            reading.set_audio(drawing.audio_mut().take());
        }
        let reading = reading.publish();
        self.slots.publish(reading.clone());

        self.slots.release_drawing();

        Ok(Some(reading))
    }

    fn composite(&mut self) -> PlayoutResult<()> {
        let Self {
            compositor,
            surface,
            slots,
            ..
        } = self;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            compositor.clear(surface);
            match slots.drawing.as_ref() {
                Some(drawing) => compositor.draw(drawing, surface),
                None => Ok(()),
            }
        }));

        match result {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "compositor panicked".to_string());
                Err(PlayoutError::Render(message))
            }
        }
    }

    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    pub fn compositor(&self) -> &C {
        &self.compositor
    }

    /// Storage statistics of the output pool.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Accepted (non-empty) inputs so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Ticks that produced no output because compositing failed.
    pub fn failed_ticks(&self) -> u64 {
        self.failed_ticks
    }

    pub fn is_occupied(&self, role: SlotRole) -> bool {
        self.slots.occupied(role)
    }
}

impl<C: Compositor> std::fmt::Debug for FrameRenderer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRenderer")
            .field("format", &self.format.name)
            .field("ticks", &self.ticks)
            .field("failed_ticks", &self.failed_ticks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::CpuCompositor;
    use crate::frame::ReadState;
    use playout_core::{AudioBlock, PixelFormat};

    fn tiny() -> VideoFormat {
        VideoFormat::custom("tiny", 4, 4, 25, 1)
    }

    fn input(px: [u8; 4]) -> WriteFrame {
        WriteFrame::new(
            FrameBuffer::solid(4, 4, PixelFormat::Bgra8, px),
            AudioBlock::silence(2, 1),
        )
    }

    #[test]
    fn test_none_input_leaves_state_untouched() {
        let mut renderer = FrameRenderer::new(tiny(), CpuCompositor::new()).unwrap();
        assert!(renderer.render(None).unwrap().is_none());
        assert_eq!(renderer.ticks(), 0);
        assert!(!renderer.is_occupied(SlotRole::Reading));
        assert_eq!(renderer.pool_stats().created, 0);
    }

    #[test]
    fn test_first_call_yields_blank_seed() {
        let mut renderer = FrameRenderer::new(tiny(), CpuCompositor::new()).unwrap();
        let out = renderer.render(Some(input([1, 1, 1, 255]))).unwrap().unwrap();
        assert_eq!(out.image().get_pixel(0, 0), Some([0, 0, 0, 0]));
        assert_eq!(out.read_state(), ReadState::Open);
    }

    #[test]
    fn test_slots_after_tick() {
        let mut renderer = FrameRenderer::new(tiny(), CpuCompositor::new()).unwrap();
        renderer.render(Some(input([1, 1, 1, 255]))).unwrap();
        assert!(renderer.is_occupied(SlotRole::Writing));
        assert!(!renderer.is_occupied(SlotRole::Drawing));
        assert!(renderer.is_occupied(SlotRole::Reading));
    }

    #[test]
    fn test_previous_reading_is_closed_on_next_tick() {
        let mut renderer = FrameRenderer::new(tiny(), CpuCompositor::new()).unwrap();
        let first = renderer.render(Some(input([1, 1, 1, 255]))).unwrap().unwrap();
        renderer.render(Some(input([2, 2, 2, 255]))).unwrap();
        assert_eq!(first.read_state(), ReadState::Closed);
    }

    #[test]
    fn test_output_storage_is_recycled() {
        let mut renderer = FrameRenderer::new(tiny(), CpuCompositor::new()).unwrap();
        for i in 0..10u8 {
            let out = renderer.render(Some(input([i, i, i, 255]))).unwrap();
            drop(out);
        }
        // One frame held by the reading slot, one in flight while publishing.
        assert!(renderer.pool_stats().created <= 2);
    }

    #[test]
    fn test_rebuild_restarts_from_seed() {
        let mut renderer = FrameRenderer::new(tiny(), CpuCompositor::new()).unwrap();
        renderer.render(Some(input([5, 5, 5, 255]))).unwrap();

        let bigger = VideoFormat::custom("bigger", 8, 2, 25, 1);
        renderer.rebuild(bigger).unwrap();
        assert_eq!(renderer.format().name, "bigger");

        let out = renderer
            .render(Some(WriteFrame::new(
                FrameBuffer::solid(8, 2, PixelFormat::Bgra8, [7, 7, 7, 255]),
                AudioBlock::default(),
            )))
            .unwrap()
            .unwrap();
        assert_eq!(out.width(), 8);
        assert_eq!(out.image().get_pixel(0, 0), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_mismatched_input_is_transient() {
        let mut renderer = FrameRenderer::new(tiny(), CpuCompositor::new()).unwrap();
        let wrong = WriteFrame::new(FrameBuffer::new(2, 2, PixelFormat::Bgra8), AudioBlock::default());
        renderer.render(Some(wrong)).unwrap();
        assert!(renderer.render(Some(input([1, 1, 1, 255]))).unwrap().is_none());
        let out = renderer.render(Some(input([2, 2, 2, 255]))).unwrap().unwrap();
        assert_eq!(out.image().get_pixel(3, 3), Some([1, 1, 1, 255]));
    }

    #[test]
    fn test_panicking_compositor_yields_gap() {
        struct Flaky {
            calls: u32,
        }
        impl Compositor for Flaky {
            fn clear(&mut self, surface: &mut FrameBuffer) {
                surface.clear();
            }
            fn draw(&mut self, frame: &WriteFrame, surface: &mut FrameBuffer) -> PlayoutResult<()> {
                self.calls += 1;
                if self.calls == 2 {
                    panic!("shader blew up");
                }
                surface.composite_over(frame.image(), 0, 0, 1.0);
                Ok(())
            }
        }

        let mut renderer = FrameRenderer::new(tiny(), Flaky { calls: 0 }).unwrap();
        assert!(renderer.render(Some(input([1, 1, 1, 255]))).unwrap().is_some());
        assert!(renderer.render(Some(input([2, 2, 2, 255]))).unwrap().is_none());
        let out = renderer.render(Some(input([3, 3, 3, 255]))).unwrap().unwrap();
        assert_eq!(out.image().get_pixel(0, 0), Some([2, 2, 2, 255]));
        assert_eq!(renderer.failed_ticks(), 1);
    }

    #[test]
    fn test_failed_tick_keeps_closed_reading_frame() {
        let mut renderer = FrameRenderer::new(tiny(), CpuCompositor::new()).unwrap();
        let wrong = WriteFrame::new(FrameBuffer::new(2, 2, PixelFormat::Bgra8), AudioBlock::default());

        renderer.render(Some(wrong)).unwrap();
        let before = renderer.slots.reading.clone().unwrap();
        assert!(renderer.render(Some(input([1, 1, 1, 255]))).unwrap().is_none());

        assert!(renderer.is_occupied(SlotRole::Reading));
        let after = renderer.slots.reading.as_ref().unwrap();
        assert!(ReadFrame::ptr_eq(&before, after));
        assert_eq!(after.read_state(), ReadState::Closed);

        let out = renderer.render(Some(input([2, 2, 2, 255]))).unwrap().unwrap();
        assert!(!ReadFrame::ptr_eq(&before, &out));
        assert!(renderer.is_occupied(SlotRole::Reading));
    }
}
