//! # playout-core
//!
//! Core types and primitives for the Playout frame pipeline.
//! This crate contains the foundational types shared across all Playout crates:
//! pixel buffers, audio blocks, video formats, configuration, diagnostics and
//! error types.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod format;
pub mod frame;
pub mod hash;

pub use config::*;

pub use diagnostics::{DiagnosticsSink, Graph, GraphSnapshot, TagSeverity};
pub use error::{PlayoutError, PlayoutResult};
pub use format::{FieldMode, VideoFormat};
pub use frame::{AudioBlock, FrameBuffer, FrameTransform, PixelFormat};
pub use hash::{hash_frame, ContentHash};
