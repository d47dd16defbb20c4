//! Frames flowing through the pipeline.
//!
//! Input arrives as a [`WriteFrame`]: exclusively owned, with an upload that
//! starts when it enters the renderer's writing slot. Output leaves as a
//! [`ReadFrame`]: shared and read-only, backed by pooled storage that goes
//! back to the renderer's pool once every stage has let go of it.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use playout_core::{
    AudioBlock, FrameBuffer, FrameTransform, PlayoutError, PlayoutResult, VideoFormat,
};

use crate::pool::{FramePool, PoolLease, Shared};

static NEXT_STORAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Readback state of output storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadState {
    /// Freshly allocated or recycled.
    Idle = 0,
    /// Composited pixels are being read back into this storage.
    Open = 1,
    /// Readback finished; the storage is closed for further GPU reads.
    Closed = 2,
}

impl ReadState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ReadState::Open,
            2 => ReadState::Closed,
            _ => ReadState::Idle,
        }
    }
}

/// Upload state of input storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Idle,
    /// Pixels are being transferred to the compositor.
    Uploading,
}

/// Pixel and audio storage shared by input and output frames.
#[derive(Debug)]
pub struct FrameStorage {
    id: u64,
    pub image: FrameBuffer,
    pub audio: AudioBlock,
    read_state: AtomicU8,
    write_state: WriteState,
}

impl FrameStorage {
    pub fn new(image: FrameBuffer, audio: AudioBlock) -> Self {
        Self {
            id: NEXT_STORAGE_ID.fetch_add(1, Ordering::Relaxed),
            image,
            audio,
            read_state: AtomicU8::new(ReadState::Idle as u8),
            write_state: WriteState::Idle,
        }
    }

    /// Allocate blank storage sized for `format`.
    pub fn for_format(format: &VideoFormat) -> PlayoutResult<Self> {
        let image = FrameBuffer::try_new(format.width, format.height, format.pixel_format())
            .ok_or_else(|| PlayoutError::allocation("frame storage", format.size()))?;
        Ok(Self::new(image, AudioBlock::new(format.audio_channels)))
    }

    /// Stable identity of this storage across pool round-trips.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn read_state(&self) -> ReadState {
        ReadState::from_u8(self.read_state.load(Ordering::Acquire))
    }

    fn set_read_state(&self, state: ReadState) {
        self.read_state.store(state as u8, Ordering::Release);
    }

    pub fn write_state(&self) -> WriteState {
        self.write_state
    }
}

/// Pool of output storage sized for one format.
pub type FrameStoragePool = FramePool<FrameStorage>;

/// Create a pool whose misses allocate storage for `format`.
pub fn frame_storage_pool(label: &'static str, format: &VideoFormat) -> FrameStoragePool {
    let format = format.clone();
    FramePool::new(label, move || FrameStorage::for_format(&format))
}

/// Input frame owned by exactly one stage at a time.
#[derive(Debug)]
pub struct WriteFrame {
    storage: PoolLease<FrameStorage>,
    transform: FrameTransform,
}

impl WriteFrame {
    /// Wrap caller-owned pixels and audio.
    pub fn new(image: FrameBuffer, audio: AudioBlock) -> Self {
        Self {
            storage: PoolLease::detached(FrameStorage::new(image, audio)),
            transform: FrameTransform::default(),
        }
    }

    /// Wrap storage acquired from a pool; it is recycled when the frame drops.
    pub fn from_lease(storage: PoolLease<FrameStorage>) -> Self {
        Self {
            storage,
            transform: FrameTransform::default(),
        }
    }

    /// A transparent, silent frame for `format`.
    pub fn blank(format: &VideoFormat) -> PlayoutResult<Self> {
        Ok(Self {
            storage: PoolLease::detached(FrameStorage::for_format(format)?),
            transform: FrameTransform::default(),
        })
    }

    pub fn with_transform(mut self, transform: FrameTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn transform(&self) -> &FrameTransform {
        &self.transform
    }

    pub fn image(&self) -> &FrameBuffer {
        &self.storage.image
    }

    pub fn image_mut(&mut self) -> &mut FrameBuffer {
        &mut self.storage.image
    }

    pub fn audio(&self) -> &AudioBlock {
        &self.storage.audio
    }

    pub fn audio_mut(&mut self) -> &mut AudioBlock {
        &mut self.storage.audio
    }

    pub fn storage_id(&self) -> u64 {
        self.storage.id()
    }

    pub fn write_state(&self) -> WriteState {
        self.storage.write_state
    }

    /// Start the transfer of this frame's pixels to the compositor.
    ///
    /// Completion is not awaited here. The matching `end_write` runs when the
    /// frame is released.
    pub fn begin_write(&mut self) {
        self.storage.write_state = WriteState::Uploading;
    }

    fn end_write(&mut self) {
        if self.storage.write_state == WriteState::Uploading {
            tracing::trace!(storage = self.storage.id(), "write finished");
        }
        self.storage.write_state = WriteState::Idle;
    }
}

impl Drop for WriteFrame {
    fn drop(&mut self) {
        self.end_write();
    }
}

/// Finished output frame. Read-only; clones share the same storage.
#[derive(Debug, Clone)]
pub struct ReadFrame {
    storage: Shared<FrameStorage>,
}

impl ReadFrame {
    pub(crate) fn from_shared(storage: Shared<FrameStorage>) -> Self {
        Self { storage }
    }

    pub fn image(&self) -> &FrameBuffer {
        &self.storage.image
    }

    pub fn audio(&self) -> &AudioBlock {
        &self.storage.audio
    }

    pub fn width(&self) -> u32 {
        self.storage.image.width
    }

    pub fn height(&self) -> u32 {
        self.storage.image.height
    }

    pub fn storage_id(&self) -> u64 {
        self.storage.id()
    }

    pub fn read_state(&self) -> ReadState {
        self.storage.read_state()
    }

    /// Number of live handles to this frame's storage.
    pub fn ref_count(&self) -> usize {
        self.storage.ref_count()
    }

    pub fn ptr_eq(a: &ReadFrame, b: &ReadFrame) -> bool {
        Shared::ptr_eq(&a.storage, &b.storage)
    }

    /// Mark the readback of this frame finished.
    pub(crate) fn end_read(&self) {
        self.storage.set_read_state(ReadState::Closed);
    }
}

/// Output storage between acquisition and publication.
pub(crate) struct PendingRead {
    storage: PoolLease<FrameStorage>,
}

impl PendingRead {
    pub(crate) fn new(storage: PoolLease<FrameStorage>) -> Self {
        Self { storage }
    }

    /// Copy the composited surface into this storage and open it for reads.
    pub(crate) fn begin_read(&mut self, surface: &FrameBuffer) -> PlayoutResult<()> {
        if !self.storage.image.copy_from(surface) {
            return Err(PlayoutError::FormatMismatch {
                expected: format!("{}x{}", self.storage.image.width, self.storage.image.height),
                actual: format!("{}x{}", surface.width, surface.height),
            });
        }
        self.storage.set_read_state(ReadState::Open);
        Ok(())
    }

    pub(crate) fn set_audio(&mut self, audio: AudioBlock) {
        self.storage.audio = audio;
    }

    pub(crate) fn publish(self) -> ReadFrame {
        ReadFrame::from_shared(self.storage.share())
    }
}
