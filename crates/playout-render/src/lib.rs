//! # playout-render
//!
//! The producing side of a Playout channel. Input frames enter a
//! triple-buffered [`FrameRenderer`], are composited once per tick, and leave
//! as shared [`ReadFrame`]s backed by a [`FramePool`]. A [`Channel`] runs the
//! renderer on its own thread and fans each output frame out to the
//! registered [`FrameConsumer`]s.

pub mod channel;
pub mod compositor;
pub mod consumer;
pub mod frame;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod pool;
pub mod renderer;

pub use channel::{Channel, ChannelOptions, ChannelReport, ControlOp, FrameSource};
pub use compositor::{Compositor, CpuCompositor};
pub use consumer::FrameConsumer;
pub use frame::{
    frame_storage_pool, FrameStorage, FrameStoragePool, ReadFrame, ReadState, WriteFrame,
    WriteState,
};
#[cfg(feature = "gpu")]
pub use gpu::GpuContext;
pub use pool::{FramePool, PoolLease, PoolStats, Recycle, Shared};
pub use renderer::{FrameRenderer, SlotRole};
