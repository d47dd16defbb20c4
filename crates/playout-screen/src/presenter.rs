//! The presentation stage: a two-slot ring of upload/display buffers.
//!
//! Each tick takes one frame from the output queue, uploads it into the
//! least recently used slot once that slot's previous fence has signaled,
//! then displays the other slot (the one uploaded on the previous tick) and
//! rotates the ring. Waiting is cooperative: the loop keeps servicing window
//! events and sleeps briefly between polls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use playout_core::{DiagnosticsSink, Graph, PlayoutResult, ScreenConfig, VideoFormat};
use playout_render::ReadFrame;

use crate::backend::{DisplayFlags, PresentBackend, SlotId, WindowEvent};
use crate::fence::Fence;
use crate::geometry::{DrawCoords, ScreenGeometry};
use crate::queue::OutputQueue;

/// Sleep between polls while there is nothing to do.
pub const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Lifecycle of a presentation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Uploading,
    /// Upload issued, fence pending.
    Uploaded,
    Displaying,
}

struct PresentSlot {
    id: SlotId,
    state: SlotState,
    fence: Option<Box<dyn Fence>>,
    /// Held until the upload fence signals.
    frame: Option<ReadFrame>,
    last_used: u64,
}

impl PresentSlot {
    /// Drop the fence and the frame once the upload has completed.
    fn retire_fence(&mut self) -> bool {
        match &self.fence {
            Some(fence) if fence.is_signaled() => {
                self.fence = None;
                self.frame = None;
                if self.state == SlotState::Displaying {
                    self.state = SlotState::Idle;
                }
                true
            }
            Some(_) => false,
            None => true,
        }
    }
}

/// Result of a single [`Presenter::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Presented,
    /// The stop flag was observed before a frame could be presented.
    Stopped,
}

pub struct Presenter {
    backend: Box<dyn PresentBackend>,
    slots: [PresentSlot; 2],
    queue: Arc<OutputQueue<ReadFrame>>,
    running: Arc<AtomicBool>,
    graph: Graph,
    config: ScreenConfig,
    format: VideoFormat,
    geometry: ScreenGeometry,
    coords: DrawCoords,
    ticks: u64,
    last_tick: Instant,
    released: bool,
}

impl Presenter {
    /// Check capabilities and allocate both slots on `backend`.
    pub fn new(
        mut backend: Box<dyn PresentBackend>,
        config: ScreenConfig,
        format: VideoFormat,
        queue: Arc<OutputQueue<ReadFrame>>,
        running: Arc<AtomicBool>,
        graph: Graph,
    ) -> PlayoutResult<Self> {
        backend.check_capabilities(&format)?;

        let first = backend.create_slot(&format)?;
        let second = match backend.create_slot(&format) {
            Ok(id) => id,
            Err(err) => {
                backend.destroy_slot(first);
                return Err(err);
            }
        };
        let slot = |id| PresentSlot {
            id,
            state: SlotState::Idle,
            fence: None,
            frame: None,
            last_used: 0,
        };

        let geometry = ScreenGeometry::new(&config, &format);
        let mut presenter = Self {
            backend,
            slots: [slot(first), slot(second)],
            queue,
            running,
            graph,
            config,
            format,
            coords: geometry.draw_coords(),
            geometry,
            ticks: 0,
            last_tick: Instant::now(),
            released: false,
        };
        presenter.calculate_aspect();

        if presenter.config.vsync {
            tracing::info!("enabled vsync");
        }
        if presenter.config.colour_space.is_datavideo() {
            tracing::info!(colour_space = ?presenter.config.colour_space, "enabled DataVideo colour conversion");
        }
        Ok(presenter)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn calculate_aspect(&mut self) {
        if self.config.windowed {
            let (width, height) = self.backend.window_size();
            self.geometry.resize(width, height);
        }
        self.coords = self.geometry.draw_coords();
    }

    /// Service window events. Returns whether any arrived.
    fn poll(&mut self) -> bool {
        let events = self.backend.poll_events();
        for event in &events {
            match event {
                WindowEvent::Resized { .. } => self.calculate_aspect(),
                WindowEvent::Closed => {
                    tracing::info!("window closed");
                    self.running.store(false, Ordering::Release);
                }
                WindowEvent::Other => {}
            }
        }
        !events.is_empty()
    }

    /// Run ticks until the stop flag is cleared.
    pub fn run(&mut self) -> PlayoutResult<()> {
        while self.is_running() {
            self.tick()?;
        }
        Ok(())
    }

    /// Present at most one frame.
    pub fn tick(&mut self) -> PlayoutResult<TickOutcome> {
        // Window events are serviced on every pass, frames or not.
        let frame = loop {
            self.poll();
            if !self.is_running() {
                return Ok(TickOutcome::Stopped);
            }
            if let Some(frame) = self.queue.pop_timeout(POLL_INTERVAL) {
                break frame;
            }
        };

        let target = self.least_recently_used();
        if !self.wait_for_slot(target) {
            return Ok(TickOutcome::Stopped);
        }
        self.upload(target, frame)?;
        self.display(1 - target)?;
        self.backend.present()?;

        self.slots.rotate_left(1);
        self.ticks += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_tick).as_secs_f64();
        self.graph.set_value("tick-time", elapsed * self.format.fps() * 0.5);
        self.last_tick = now;

        Ok(TickOutcome::Presented)
    }

    fn least_recently_used(&self) -> usize {
        if self.slots[0].last_used <= self.slots[1].last_used {
            0
        } else {
            1
        }
    }

    /// Wait until the slot at `index` has no pending fence. Returns `false`
    /// if a stop was requested while waiting.
    fn wait_for_slot(&mut self, index: usize) -> bool {
        let started = Instant::now();
        let mut warned = false;

        while !self.slots[index].retire_fence() {
            if !self.is_running() {
                return false;
            }
            if !warned && started.elapsed() > self.format.frame_interval() {
                tracing::warn!(slot = self.slots[index].id.0, "upload fence pending longer than a frame");
                warned = true;
            }
            if !self.poll() {
                thread::sleep(POLL_INTERVAL);
            }
        }
        true
    }

    fn upload(&mut self, index: usize, frame: ReadFrame) -> PlayoutResult<()> {
        let slot = &mut self.slots[index];
        debug_assert!(slot.fence.is_none());
        slot.state = SlotState::Uploading;

        let fence = self.backend.upload(slot.id, &frame)?;
        slot.fence = Some(fence);
        slot.frame = Some(frame);
        slot.state = SlotState::Uploaded;
        slot.last_used = self.ticks + 1;
        Ok(())
    }

    fn display(&mut self, index: usize) -> PlayoutResult<()> {
        let flags = DisplayFlags {
            key_only: self.config.key_only,
            colour_space: self.config.colour_space,
            window_width: self.geometry.screen_width,
        };
        let slot = &mut self.slots[index];
        self.backend.display(slot.id, &self.coords, &flags)?;
        if slot.state == SlotState::Uploaded {
            slot.state = SlotState::Displaying;
        }
        Ok(())
    }

    /// States of the slots, least recently used first.
    pub fn slot_states(&self) -> [SlotState; 2] {
        [self.slots[0].state, self.slots[1].state]
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn geometry(&self) -> &ScreenGeometry {
        &self.geometry
    }

    pub fn draw_coords(&self) -> &DrawCoords {
        &self.coords
    }

    /// Release every GPU object. Dropping the presenter does the same, so
    /// an unwinding presentation thread still frees its slots.
    pub fn destroy(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for slot in self.slots.iter_mut() {
            slot.fence = None;
            slot.frame = None;
            slot.state = SlotState::Idle;
            self.backend.destroy_slot(slot.id);
        }
        tracing::debug!(ticks = self.ticks, "presentation resources released");
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Presenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Presenter")
            .field("format", &self.format.name)
            .field("ticks", &self.ticks)
            .field("slots", &self.slot_states())
            .finish()
    }
}
