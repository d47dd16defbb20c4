//! Presentation backends.
//!
//! A backend owns the window and the per-slot GPU objects. It is created on
//! the presentation thread and only ever touched from there until the thread
//! has been joined.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use playout_core::{
    hash_frame, ColourSpace, ContentHash, FrameBuffer, PlayoutError, PlayoutResult, ScreenConfig,
    VideoFormat,
};
use playout_render::ReadFrame;

use crate::fence::{Fence, SignaledFence};
use crate::geometry::{DrawCoords, ScreenGeometry};

/// Handle to one presentation buffer slot inside a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    Resized { width: u32, height: u32 },
    Closed,
    /// Input or focus traffic with no effect on presentation.
    Other,
}

/// Per-draw shader state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayFlags {
    pub key_only: bool,
    pub colour_space: ColourSpace,
    pub window_width: u32,
}

/// Window creation parameters derived from a screen configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub title: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub windowed: bool,
    pub borderless: bool,
    pub always_on_top: bool,
    pub vsync: bool,
    pub cursor_visible: bool,
    /// DataVideo colour spaces need nearest sampling.
    pub linear_filtering: bool,
}

impl WindowSpec {
    pub fn new(title: String, config: &ScreenConfig, geometry: &ScreenGeometry) -> Self {
        Self {
            title,
            x: geometry.screen_x,
            y: geometry.screen_y,
            width: geometry.window_width(),
            height: geometry.screen_height,
            windowed: config.windowed,
            borderless: config.borderless,
            always_on_top: config.always_on_top,
            vsync: config.vsync,
            cursor_visible: config.interactive,
            linear_filtering: !config.colour_space.is_datavideo(),
        }
    }
}

/// GPU side of the presentation stage.
pub trait PresentBackend: Send {
    /// Reject hardware that cannot present `format`. Runs once, before any slot
    /// exists.
    fn check_capabilities(&self, format: &VideoFormat) -> PlayoutResult<()>;

    /// Allocate a buffer + texture pair sized for `format`, cleared to black.
    fn create_slot(&mut self, format: &VideoFormat) -> PlayoutResult<SlotId>;

    /// Copy `frame` into the slot and return a fence for the transfer.
    fn upload(&mut self, slot: SlotId, frame: &ReadFrame) -> PlayoutResult<Box<dyn Fence>>;

    /// Draw the slot's texture using `coords`.
    fn display(&mut self, slot: SlotId, coords: &DrawCoords, flags: &DisplayFlags) -> PlayoutResult<()>;

    /// Swap the window buffers.
    fn present(&mut self) -> PlayoutResult<()>;

    fn poll_events(&mut self) -> Vec<WindowEvent>;

    /// Current client area of the window.
    fn window_size(&self) -> (u32, u32);

    /// Unmap and delete the slot's objects.
    fn destroy_slot(&mut self, slot: SlotId);
}

/// Builds a backend on the presentation thread.
pub type BackendFactory =
    Arc<dyn Fn(&WindowSpec) -> PlayoutResult<Box<dyn PresentBackend>> + Send + Sync>;

/// What a [`HeadlessBackend`] has shown so far, shared with observers.
#[derive(Debug, Clone, Default)]
pub struct HeadlessStats {
    pub uploads: u64,
    pub displays: u64,
    pub presents: u64,
    pub slots_created: u32,
    pub slots_destroyed: u32,
    /// Digest of the image last drawn by `display`.
    pub last_displayed: Option<ContentHash>,
    pub window_size: (u32, u32),
}

/// Observer handle for a [`HeadlessBackend`]: reads its stats and injects
/// window events.
#[derive(Debug, Clone, Default)]
pub struct HeadlessMonitor {
    stats: Arc<Mutex<HeadlessStats>>,
    events: Arc<Mutex<Vec<WindowEvent>>>,
}

impl HeadlessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> HeadlessStats {
        self.stats.lock().clone()
    }

    /// Queue an event for the backend's next `poll_events`.
    pub fn push_event(&self, event: WindowEvent) {
        self.events.lock().push(event);
    }

    /// A factory producing headless backends that report to this monitor.
    pub fn factory(&self) -> BackendFactory {
        let monitor = self.clone();
        Arc::new(move |spec: &WindowSpec| {
            let backend: Box<dyn PresentBackend> = Box::new(HeadlessBackend::new(spec, monitor.clone()));
            Ok(backend)
        })
    }
}

struct HeadlessSlot {
    mapped: FrameBuffer,
    texture: FrameBuffer,
}

/// CPU presentation backend with no window.
///
/// Each slot keeps a persistently mapped buffer and a texture. Uploads go
/// buffer → texture synchronously, so fences come back already signaled.
pub struct HeadlessBackend {
    monitor: HeadlessMonitor,
    slots: HashMap<SlotId, HeadlessSlot>,
    next_slot: u32,
    window_size: (u32, u32),
    max_dimension: u32,
}

impl HeadlessBackend {
    /// Largest texture edge the headless backend accepts.
    pub const MAX_DIMENSION: u32 = 8192;

    pub fn new(spec: &WindowSpec, monitor: HeadlessMonitor) -> Self {
        let window_size = (spec.width, spec.height);
        monitor.stats.lock().window_size = window_size;
        tracing::debug!(title = %spec.title, width = spec.width, height = spec.height, "headless window");
        Self {
            monitor,
            slots: HashMap::new(),
            next_slot: 0,
            window_size,
            max_dimension: Self::MAX_DIMENSION,
        }
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    fn slot_mut(&mut self, slot: SlotId) -> PlayoutResult<&mut HeadlessSlot> {
        self.slots
            .get_mut(&slot)
            .ok_or_else(|| PlayoutError::Backend(format!("unknown slot {}", slot.0)))
    }
}

impl PresentBackend for HeadlessBackend {
    fn check_capabilities(&self, format: &VideoFormat) -> PlayoutResult<()> {
        if format.width > self.max_dimension || format.height > self.max_dimension {
            return Err(PlayoutError::Unsupported(format!(
                "{}x{} exceeds the {} pixel texture limit",
                format.width, format.height, self.max_dimension
            )));
        }
        Ok(())
    }

    fn create_slot(&mut self, format: &VideoFormat) -> PlayoutResult<SlotId> {
        let alloc = || {
            FrameBuffer::try_new(format.width, format.height, format.pixel_format())
                .ok_or_else(|| PlayoutError::allocation("presentation slot", format.size()))
        };
        let slot = HeadlessSlot {
            mapped: alloc()?,
            texture: alloc()?,
        };

        let id = SlotId(self.next_slot);
        self.next_slot += 1;
        self.slots.insert(id, slot);
        self.monitor.stats.lock().slots_created += 1;
        Ok(id)
    }

    fn upload(&mut self, slot: SlotId, frame: &ReadFrame) -> PlayoutResult<Box<dyn Fence>> {
        let target = self.slot_mut(slot)?;
        if !target.mapped.copy_from(frame.image()) {
            return Err(PlayoutError::FormatMismatch {
                expected: format!("{}x{}", target.mapped.width, target.mapped.height),
                actual: format!("{}x{}", frame.width(), frame.height()),
            });
        }
        let HeadlessSlot { mapped, texture } = target;
        texture.data.copy_from_slice(&mapped.data);

        self.monitor.stats.lock().uploads += 1;
        Ok(Box::new(SignaledFence))
    }

    fn display(&mut self, slot: SlotId, _coords: &DrawCoords, flags: &DisplayFlags) -> PlayoutResult<()> {
        let texture = &self.slot_mut(slot)?.texture;
        let digest = if flags.key_only {
            let mut key = texture.clone();
            for px in key.data.chunks_exact_mut(4) {
                let a = px[3];
                px.copy_from_slice(&[a, a, a, 255]);
            }
            hash_frame(&key)
        } else {
            hash_frame(texture)
        };

        let mut stats = self.monitor.stats.lock();
        stats.displays += 1;
        stats.last_displayed = Some(digest);
        Ok(())
    }

    fn present(&mut self) -> PlayoutResult<()> {
        self.monitor.stats.lock().presents += 1;
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<WindowEvent> {
        let events: Vec<WindowEvent> = std::mem::take(&mut *self.monitor.events.lock());
        for event in &events {
            if let WindowEvent::Resized { width, height } = *event {
                self.window_size = (width, height);
                self.monitor.stats.lock().window_size = self.window_size;
            }
        }
        events
    }

    fn window_size(&self) -> (u32, u32) {
        self.window_size
    }

    fn destroy_slot(&mut self, slot: SlotId) {
        if self.slots.remove(&slot).is_some() {
            self.monitor.stats.lock().slots_destroyed += 1;
        }
    }
}
