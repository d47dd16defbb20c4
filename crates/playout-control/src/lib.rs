//! # playout-control
//!
//! Commands from a control protocol run one at a time on a per-client
//! [`CommandQueue`]. Failures are classified into a closed [`CommandError`]
//! set and answered with a fixed [`ReplyStatus`].

pub mod command;
pub mod error;
pub mod queue;

pub use command::{ChannelCommand, Command, ReplySink};
pub use error::{CommandError, ReplyStatus};
pub use queue::{CommandQueue, QueueHandle, QueueRegistry, OVERFLOW_THRESHOLD};
