use std::future::Ready;

use playout_core::{PlayoutResult, VideoFormat};

use crate::frame::ReadFrame;

/// A downstream stage that receives finished frames from a channel.
pub trait FrameConsumer: Send {
    /// (Re)bind output resources to a channel's format.
    ///
    /// Failure is a construction error and is not retried.
    fn initialize(&mut self, format: &VideoFormat, channel_index: u32) -> PlayoutResult<()>;

    /// Offer a frame. Resolves to whether the consumer is still running; a
    /// dropped frame still resolves `true`.
    fn send(&self, frame: ReadFrame) -> Ready<bool>;

    fn name(&self) -> &str;

    /// Human-readable identity for logs.
    fn print(&self) -> String;

    /// Stable index used to order consumers on a channel.
    fn index(&self) -> u32;

    fn has_synchronization_clock(&self) -> bool {
        false
    }
}
