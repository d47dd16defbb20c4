//! Screen consumer: owns the presentation thread for one channel.

use std::future::{ready, Ready};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel;
use playout_core::{
    DiagnosticsSink, Graph, PlayoutError, PlayoutResult, ScreenConfig, TagSeverity, VideoFormat,
};
use playout_render::{FrameConsumer, ReadFrame};

use crate::backend::{BackendFactory, WindowSpec};
use crate::geometry::ScreenGeometry;
use crate::presenter::Presenter;
use crate::queue::OutputQueue;

/// Presents one channel's frames through a [`crate::PresentBackend`].
pub struct ScreenConsumer {
    config: ScreenConfig,
    format: VideoFormat,
    channel_index: u32,
    queue: Arc<OutputQueue<ReadFrame>>,
    running: Arc<AtomicBool>,
    graph: Graph,
    dropped: AtomicU64,
    thread: Option<JoinHandle<Option<Presenter>>>,
}

impl ScreenConsumer {
    /// Start the presentation thread.
    ///
    /// The backend is built and checked on that thread; if either step fails
    /// the error is returned here and nothing keeps running.
    pub fn new(
        config: ScreenConfig,
        format: VideoFormat,
        channel_index: u32,
        queue_capacity: usize,
        factory: BackendFactory,
    ) -> PlayoutResult<Self> {
        Self::with_sink(config, format, channel_index, queue_capacity, factory, None)
    }

    /// Like [`ScreenConsumer::new`], forwarding diagnostics to `sink`.
    pub fn with_sink(
        config: ScreenConfig,
        format: VideoFormat,
        channel_index: u32,
        queue_capacity: usize,
        factory: BackendFactory,
        sink: Option<Arc<dyn DiagnosticsSink>>,
    ) -> PlayoutResult<Self> {
        let config = config.sanitize();
        let queue = Arc::new(OutputQueue::new(queue_capacity));
        let running = Arc::new(AtomicBool::new(true));
        let graph = match sink {
            Some(sink) => Graph::new().with_sink(sink),
            None => Graph::new(),
        };

        let mut consumer = Self {
            config,
            format,
            channel_index,
            queue,
            running,
            graph,
            dropped: AtomicU64::new(0),
            thread: None,
        };
        consumer.graph.set_text(consumer.print());

        let geometry = ScreenGeometry::new(&consumer.config, &consumer.format);
        let spec = WindowSpec::new(consumer.print(), &consumer.config, &geometry);

        let (ready_tx, ready_rx) = channel::bounded::<PlayoutResult<()>>(1);
        let config = consumer.config.clone();
        let format = consumer.format.clone();
        let queue = consumer.queue.clone();
        let running = consumer.running.clone();
        let graph = consumer.graph.clone();
        let name = consumer.print();

        let handle = thread::Builder::new()
            .name(format!("screen-{channel_index}"))
            .spawn(move || {
                let started = factory(&spec).and_then(|backend| {
                    Presenter::new(backend, config, format, queue, running.clone(), graph)
                });
                let mut presenter = match started {
                    Ok(presenter) => {
                        let _ = ready_tx.send(Ok(()));
                        presenter
                    }
                    Err(err) => {
                        running.store(false, Ordering::Release);
                        let _ = ready_tx.send(Err(err));
                        return None;
                    }
                };

                match panic::catch_unwind(AssertUnwindSafe(|| presenter.run())) {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::error!(consumer = %name, error = %err, "presentation failed");
                        running.store(false, Ordering::Release);
                    }
                    Err(_) => {
                        tracing::error!(consumer = %name, "presentation thread panicked");
                        // Dropping the presenter releases its slots.
                        drop(presenter);
                        running.store(false, Ordering::Release);
                        return None;
                    }
                }
                Some(presenter)
            })?;
        consumer.thread = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!(consumer = %consumer.print(), "screen consumer started");
                Ok(consumer)
            }
            Ok(Err(err)) => {
                consumer.stop();
                Err(err)
            }
            Err(_) => {
                consumer.stop();
                Err(PlayoutError::Backend("presentation thread exited during startup".into()))
            }
        }
    }

    /// Offer a frame without blocking. A full queue drops the frame and
    /// counts it; the result is whether the consumer is still running.
    /// Frames offered after a stop are refused without counting.
    pub fn send(&self, frame: ReadFrame) -> Ready<bool> {
        if !self.is_running() || self.queue.is_aborted() {
            return ready(false);
        }
        if let Err(frame) = self.queue.try_push(frame) {
            if self.queue.is_aborted() {
                return ready(false);
            }
            let dropped = self.dropped.fetch_add(1, Ordering::AcqRel) + 1;
            self.graph.set_tag(TagSeverity::Warning, "dropped-frame");
            tracing::debug!(consumer = %self.print(), storage = frame.storage_id(), dropped, "dropped frame");
        }
        ready(self.is_running())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop presenting: clear the running flag, abort the queue, join the
    /// thread, then release GPU objects. Safe to call more than once.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.queue.abort();

        let Some(handle) = self.thread.take() else {
            return;
        };
        match handle.join() {
            Ok(Some(presenter)) => presenter.destroy(),
            Ok(None) => {}
            Err(_) => tracing::error!(consumer = %self.print(), "presentation thread panicked"),
        }
        tracing::info!(consumer = %self.print(), "screen consumer stopped");
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Acquire)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn config(&self) -> &ScreenConfig {
        &self.config
    }

    pub fn channel_and_format(&self) -> String {
        format!("[{}|{}]", self.channel_index, self.format.name)
    }

    pub fn print(&self) -> String {
        format!("{} {}", self.config.name, self.channel_and_format())
    }
}

impl Drop for ScreenConsumer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ScreenConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenConsumer")
            .field("name", &self.print())
            .field("running", &self.is_running())
            .field("dropped", &self.dropped_frames())
            .finish()
    }
}

/// Channel-facing wrapper that rebuilds the screen consumer on every
/// `initialize`.
pub struct ScreenConsumerProxy {
    config: ScreenConfig,
    queue_capacity: usize,
    factory: BackendFactory,
    sink: Option<Arc<dyn DiagnosticsSink>>,
    consumer: Option<ScreenConsumer>,
}

impl ScreenConsumerProxy {
    pub fn new(config: ScreenConfig, queue_capacity: usize, factory: BackendFactory) -> Self {
        Self {
            config,
            queue_capacity,
            factory,
            sink: None,
            consumer: None,
        }
    }

    /// Forward the diagnostics of every consumer this proxy builds.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The live consumer, once initialized.
    pub fn consumer(&self) -> Option<&ScreenConsumer> {
        self.consumer.as_ref()
    }
}

impl FrameConsumer for ScreenConsumerProxy {
    fn initialize(&mut self, format: &VideoFormat, channel_index: u32) -> PlayoutResult<()> {
        // The old window must be gone before a new one opens.
        self.consumer = None;
        self.consumer = Some(ScreenConsumer::with_sink(
            self.config.clone(),
            format.clone(),
            channel_index,
            self.queue_capacity,
            self.factory.clone(),
            self.sink.clone(),
        )?);
        Ok(())
    }

    fn send(&self, frame: ReadFrame) -> Ready<bool> {
        match &self.consumer {
            Some(consumer) => consumer.send(frame),
            None => ready(false),
        }
    }

    fn name(&self) -> &str {
        "screen"
    }

    fn print(&self) -> String {
        match &self.consumer {
            Some(consumer) => consumer.print(),
            None => "[screen_consumer]".to_string(),
        }
    }

    fn index(&self) -> u32 {
        600 + if self.config.key_only { 10 } else { 0 } + self.config.screen_index
    }

    fn has_synchronization_clock(&self) -> bool {
        false
    }
}
