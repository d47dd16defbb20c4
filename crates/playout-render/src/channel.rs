//! Channel driver: runs renderer ticks on a dedicated producer thread.
//!
//! Control operations arrive over a channel and are applied strictly between
//! ticks. A reconfigure rebuilds the renderer for the new format and
//! re-initializes every consumer.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use playout_core::{DiagnosticsSink, Graph, PlayoutError, PlayoutResult, TagSeverity, VideoFormat};

use crate::compositor::Compositor;
use crate::consumer::FrameConsumer;
use crate::frame::WriteFrame;
use crate::renderer::FrameRenderer;

/// Produces input frames, one call per tick.
pub trait FrameSource: Send {
    /// Next input for `format`. `Ok(None)` means nothing new this tick.
    fn next_frame(&mut self, format: &VideoFormat) -> PlayoutResult<Option<WriteFrame>>;
}

impl<F> FrameSource for F
where
    F: FnMut(&VideoFormat) -> PlayoutResult<Option<WriteFrame>> + Send,
{
    fn next_frame(&mut self, format: &VideoFormat) -> PlayoutResult<Option<WriteFrame>> {
        self(format)
    }
}

/// Operations accepted between ticks.
#[derive(Debug, Clone)]
pub enum ControlOp {
    Reconfigure(VideoFormat),
    Stop,
}

#[derive(Clone)]
pub struct ChannelOptions {
    pub index: u32,
    /// Stop on its own after this many ticks.
    pub max_ticks: Option<u64>,
    /// Sleep out the rest of each frame interval.
    pub paced: bool,
    /// Receives every value and tag the channel's graph records.
    pub sink: Option<Arc<dyn DiagnosticsSink>>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            index: 1,
            max_ticks: None,
            paced: true,
            sink: None,
        }
    }
}

impl std::fmt::Debug for ChannelOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelOptions")
            .field("index", &self.index)
            .field("max_ticks", &self.max_ticks)
            .field("paced", &self.paced)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// What a channel did before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelReport {
    pub ticks: u64,
    pub frames_out: u64,
    pub empty_ticks: u64,
    pub reconfigurations: u64,
    /// Consumers removed because `send` resolved `false`.
    pub consumers_removed: usize,
    pub final_format: String,
}

/// Handle to a running channel.
pub struct Channel {
    index: u32,
    control: Sender<ControlOp>,
    graph: Graph,
    handle: Option<JoinHandle<PlayoutResult<ChannelReport>>>,
}

impl Channel {
    /// Start a channel. Consumers are initialized before the thread starts;
    /// an initialization failure is returned here and nothing runs.
    pub fn spawn<C, S>(
        format: VideoFormat,
        compositor: C,
        source: S,
        mut consumers: Vec<Box<dyn FrameConsumer>>,
        options: ChannelOptions,
    ) -> PlayoutResult<Self>
    where
        C: Compositor + 'static,
        S: FrameSource + 'static,
    {
        let renderer = FrameRenderer::new(format.clone(), compositor)?;
        for consumer in consumers.iter_mut() {
            consumer.initialize(&format, options.index)?;
        }

        let graph = match options.sink.clone() {
            Some(sink) => Graph::new().with_sink(sink),
            None => Graph::new(),
        };
        graph.set_text(format!("channel-{} [{}]", options.index, format));

        let (control, rx) = channel::unbounded();
        let index = options.index;
        let worker = Worker {
            renderer,
            source,
            consumers,
            control: rx,
            graph: graph.clone(),
            options,
            report: ChannelReport::default(),
        };

        let handle = thread::Builder::new()
            .name(format!("channel-{index}"))
            .spawn(move || worker.run())?;

        tracing::info!(channel = index, format = %format, "channel started");

        Ok(Self {
            index,
            control,
            graph,
            handle: Some(handle),
        })
    }

    /// Queue a control operation. Returns `false` once the channel is gone.
    pub fn send_control(&self, op: ControlOp) -> bool {
        self.control.send(op).is_ok()
    }

    /// A sender that other threads (e.g. a command executor) can hold.
    pub fn control_sender(&self) -> Sender<ControlOp> {
        self.control.clone()
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Wait for the producer thread and surface any fatal error.
    pub fn join(mut self) -> PlayoutResult<ChannelReport> {
        self.join_inner()
    }

    /// Ask the channel to stop, then join it.
    pub fn stop(self) -> PlayoutResult<ChannelReport> {
        let _ = self.control.send(ControlOp::Stop);
        self.join()
    }

    fn join_inner(&mut self) -> PlayoutResult<ChannelReport> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| PlayoutError::Render("channel thread panicked".into()))?,
            None => Err(PlayoutError::ShuttingDown),
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.control.send(ControlOp::Stop);
            if let Err(err) = self.join_inner() {
                tracing::error!(channel = self.index, error = %err, "channel stopped with error");
            }
        }
    }
}

struct Worker<C: Compositor, S: FrameSource> {
    renderer: FrameRenderer<C>,
    source: S,
    consumers: Vec<Box<dyn FrameConsumer>>,
    control: Receiver<ControlOp>,
    graph: Graph,
    options: ChannelOptions,
    report: ChannelReport,
}

impl<C: Compositor, S: FrameSource> Worker<C, S> {
    fn run(mut self) -> PlayoutResult<ChannelReport> {
        let index = self.options.index;
        let mut deadline = Instant::now();

        let result = loop {
            if let Some(limit) = self.options.max_ticks {
                if self.report.ticks >= limit {
                    break Ok(());
                }
            }

            match self.apply_control() {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(err) => break Err(err),
            }

            if let Err(err) = self.tick() {
                break Err(err);
            }

            if self.options.paced {
                deadline += self.renderer.format().frame_interval();
                let now = Instant::now();
                if deadline > now {
                    thread::sleep(deadline - now);
                } else {
                    deadline = now;
                }
            }
        };

        self.report.final_format = self.renderer.format().name.clone();
        match result {
            Ok(()) => {
                tracing::info!(channel = index, ticks = self.report.ticks, "channel stopped");
                Ok(self.report)
            }
            Err(err) => {
                tracing::error!(channel = index, error = %err, "channel failed");
                Err(err)
            }
        }
    }

    /// Drain pending control operations. `Ok(false)` means stop.
    fn apply_control(&mut self) -> PlayoutResult<bool> {
        loop {
            match self.control.try_recv() {
                Ok(ControlOp::Stop) | Err(TryRecvError::Disconnected) => return Ok(false),
                Ok(ControlOp::Reconfigure(format)) => self.reconfigure(format)?,
                Err(TryRecvError::Empty) => return Ok(true),
            }
        }
    }

    fn reconfigure(&mut self, format: VideoFormat) -> PlayoutResult<()> {
        self.renderer.rebuild(format)?;
        let format = self.renderer.format().clone();
        for consumer in self.consumers.iter_mut() {
            consumer.initialize(&format, self.options.index)?;
        }
        self.graph
            .set_text(format!("channel-{} [{}]", self.options.index, format));
        self.report.reconfigurations += 1;
        Ok(())
    }

    fn tick(&mut self) -> PlayoutResult<()> {
        let started = Instant::now();
        self.report.ticks += 1;

        let format = self.renderer.format().clone();
        let input = match self.source.next_frame(&format) {
            Ok(input) => input,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                tracing::warn!(error = %err, "frame source failed");
                None
            }
        };

        let output = self.renderer.render(input)?;

        match output {
            Some(frame) => {
                self.report.frames_out += 1;
                let before = self.consumers.len();
                self.consumers.retain(|consumer| {
                    let running = consumer.send(frame.clone()).into_inner();
                    if !running {
                        tracing::info!(consumer = %consumer.print(), "consumer stopped, removing");
                    }
                    running
                });
                self.report.consumers_removed += before - self.consumers.len();
            }
            None => self.report.empty_ticks += 1,
        }

        let elapsed = started.elapsed().as_secs_f64();
        self.graph.set_value("frame-time", elapsed * format.fps());
        if elapsed > format.frame_interval().as_secs_f64() {
            self.graph.set_tag(TagSeverity::Warning, "late-frame");
        }
        Ok(())
    }
}
