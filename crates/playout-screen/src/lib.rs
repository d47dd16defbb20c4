//! # playout-screen
//!
//! The consuming side of a Playout channel. Finished frames cross a bounded
//! [`OutputQueue`] to a presentation thread that double-buffers uploads
//! against display, gated by per-slot [`Fence`]s.

pub mod backend;
pub mod consumer;
pub mod fence;
pub mod geometry;
pub mod presenter;
pub mod queue;
#[cfg(feature = "wgpu")]
pub mod wgpu_backend;

pub use backend::{
    BackendFactory, DisplayFlags, HeadlessBackend, HeadlessMonitor, HeadlessStats, PresentBackend,
    SlotId, WindowEvent, WindowSpec,
};
pub use consumer::{ScreenConsumer, ScreenConsumerProxy};
pub use fence::{Fence, ManualFence, SignaledFence};
pub use geometry::{Coord, DrawCoords, ScreenGeometry};
pub use presenter::{Presenter, SlotState, TickOutcome, POLL_INTERVAL};
pub use queue::OutputQueue;
#[cfg(feature = "wgpu")]
pub use wgpu_backend::{WgpuBackend, WgpuFence};
