use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use playout_core::{
    AudioBlock, DiagnosticsSink, FrameBuffer, Graph, PixelFormat, PlayoutResult, ScreenConfig,
    TagSeverity, VideoFormat,
};
use playout_render::{
    Channel, ChannelOptions, CpuCompositor, FrameConsumer, FrameRenderer, ReadFrame, WriteFrame,
};
use playout_screen::{
    BackendFactory, DisplayFlags, DrawCoords, Fence, HeadlessMonitor, ManualFence, OutputQueue,
    PresentBackend, Presenter, ScreenConsumer, ScreenConsumerProxy, SignaledFence, SlotId,
    TickOutcome, WindowEvent, WindowSpec,
};

fn tiny() -> VideoFormat {
    VideoFormat::custom("tiny", 4, 4, 50, 1)
}

/// Render `count` distinct output frames for `tiny()`.
fn frames(count: usize) -> Vec<ReadFrame> {
    let mut renderer = FrameRenderer::new(tiny(), CpuCompositor::new()).unwrap();
    (0..count)
        .map(|i| {
            let px = [i as u8, 0, 0, 255];
            let image = FrameBuffer::solid(4, 4, PixelFormat::Bgra8, px);
            let input = WriteFrame::new(image, AudioBlock::default());
            renderer.render(Some(input)).unwrap().unwrap()
        })
        .collect()
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_capacity_one_drops_newest() {
    let queue = OutputQueue::new(1);
    let graph = Graph::new();
    let frames = frames(5);
    let first = frames[0].storage_id();

    let mut failed = 0;
    for frame in frames {
        if queue.try_push(frame).is_err() {
            failed += 1;
            graph.set_tag(TagSeverity::Warning, "dropped-frame");
        }
    }

    assert_eq!(failed, 4);
    assert_eq!(graph.tag_count("dropped-frame"), 4);
    assert_eq!(queue.try_pop().map(|f| f.storage_id()), Some(first));
    assert!(queue.try_pop().is_none());
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Upload(SlotId),
    Display(SlotId),
    Destroy(SlotId),
}

/// Backend handing out manual fences and logging every call.
#[derive(Clone, Default)]
struct Recording {
    log: Arc<Mutex<Vec<Event>>>,
    fences: Arc<Mutex<Vec<(SlotId, ManualFence)>>>,
    violations: Arc<Mutex<u32>>,
    next_slot: u32,
}

impl Recording {
    fn uploads(&self) -> Vec<SlotId> {
        self.log
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Upload(slot) => Some(*slot),
                _ => None,
            })
            .collect()
    }

    fn destroyed(&self) -> Vec<SlotId> {
        self.log
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Destroy(slot) => Some(*slot),
                _ => None,
            })
            .collect()
    }

    fn signal(&self, index: usize) {
        self.fences.lock()[index].1.signal();
    }
}

impl PresentBackend for Recording {
    fn check_capabilities(&self, _format: &VideoFormat) -> PlayoutResult<()> {
        Ok(())
    }

    fn create_slot(&mut self, _format: &VideoFormat) -> PlayoutResult<SlotId> {
        let id = SlotId(self.next_slot);
        self.next_slot += 1;
        Ok(id)
    }

    fn upload(&mut self, slot: SlotId, _frame: &ReadFrame) -> PlayoutResult<Box<dyn Fence>> {
        let mut fences = self.fences.lock();
        if let Some((_, previous)) = fences.iter().rev().find(|(s, _)| *s == slot) {
            if !previous.is_signaled() {
                *self.violations.lock() += 1;
            }
        }
        let fence = ManualFence::new();
        fences.push((slot, fence.clone()));
        self.log.lock().push(Event::Upload(slot));
        Ok(Box::new(fence))
    }

    fn display(&mut self, slot: SlotId, _coords: &DrawCoords, _flags: &DisplayFlags) -> PlayoutResult<()> {
        self.log.lock().push(Event::Display(slot));
        Ok(())
    }

    fn present(&mut self) -> PlayoutResult<()> {
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<WindowEvent> {
        Vec::new()
    }

    fn window_size(&self) -> (u32, u32) {
        (4, 4)
    }

    fn destroy_slot(&mut self, slot: SlotId) {
        self.log.lock().push(Event::Destroy(slot));
    }
}

struct Stage {
    queue: Arc<OutputQueue<ReadFrame>>,
    running: Arc<AtomicBool>,
    thread: thread::JoinHandle<Presenter>,
}

impl Stage {
    fn start(backend: Recording) -> Self {
        let queue = Arc::new(OutputQueue::new(1));
        let running = Arc::new(AtomicBool::new(true));
        let mut presenter = Presenter::new(
            Box::new(backend),
            ScreenConfig::default(),
            tiny(),
            queue.clone(),
            running.clone(),
            Graph::new(),
        )
        .unwrap();
        let thread = thread::spawn(move || {
            presenter.run().unwrap();
            presenter
        });
        Self {
            queue,
            running,
            thread,
        }
    }

    fn push(&self, frame: ReadFrame) {
        let mut frame = Some(frame);
        wait_until("queue space", || match self.queue.try_push(frame.take().unwrap()) {
            Ok(()) => true,
            Err(back) => {
                frame = Some(back);
                false
            }
        });
    }

    /// Stop in the documented order and return how long it took.
    fn stop(self) -> Duration {
        let started = Instant::now();
        self.running.store(false, Ordering::Release);
        self.queue.abort();
        let presenter = self.thread.join().unwrap();
        presenter.destroy();
        started.elapsed()
    }
}

#[test]
fn test_slot_not_reused_before_fence_signals() {
    let backend = Recording::default();
    let stage = Stage::start(backend.clone());
    let mut frames = frames(3).into_iter();

    stage.push(frames.next().unwrap());
    wait_until("first upload", || backend.uploads().len() == 1);
    stage.push(frames.next().unwrap());
    wait_until("second upload", || backend.uploads().len() == 2);

    let uploads = backend.uploads();
    assert_ne!(uploads[0], uploads[1]);

    stage.push(frames.next().unwrap());
    thread::sleep(Duration::from_millis(50));
    assert_eq!(backend.uploads().len(), 2, "upload went ahead of a pending fence");

    backend.signal(0);
    wait_until("third upload", || backend.uploads().len() == 3);
    assert_eq!(backend.uploads()[2], uploads[0]);
    assert_eq!(*backend.violations.lock(), 0);

    stage.stop();
}

#[test]
fn test_display_uses_the_other_slot() {
    let backend = Recording::default();
    let stage = Stage::start(backend.clone());

    for frame in frames(2) {
        stage.push(frame);
    }
    wait_until("two uploads", || backend.uploads().len() == 2);
    stage.stop();

    let log = backend.log.lock().clone();
    let Event::Upload(first) = log[0].clone() else {
        panic!("expected upload first, got {:?}", log[0]);
    };
    assert!(matches!(log[1], Event::Display(slot) if slot != first));
    assert!(matches!(log[3], Event::Display(slot) if slot == first));
}

#[test]
fn test_stop_during_fence_wait() {
    let backend = Recording::default();
    let stage = Stage::start(backend.clone());

    for frame in frames(3) {
        stage.push(frame);
    }
    wait_until("two uploads", || backend.uploads().len() == 2);
    thread::sleep(Duration::from_millis(20));

    let took = stage.stop();
    assert!(took < Duration::from_secs(1), "teardown took {took:?}");

    let mut destroyed = backend.destroyed();
    destroyed.sort();
    assert_eq!(destroyed, vec![SlotId(0), SlotId(1)]);
}

/// Backend whose uploads block until the test releases them.
struct Gate {
    started: Sender<()>,
    release: Receiver<()>,
}

impl PresentBackend for Gate {
    fn check_capabilities(&self, _format: &VideoFormat) -> PlayoutResult<()> {
        Ok(())
    }

    fn create_slot(&mut self, _format: &VideoFormat) -> PlayoutResult<SlotId> {
        Ok(SlotId(0))
    }

    fn upload(&mut self, _slot: SlotId, _frame: &ReadFrame) -> PlayoutResult<Box<dyn Fence>> {
        let _ = self.started.send(());
        let _ = self.release.recv_timeout(Duration::from_secs(5));
        Ok(Box::new(SignaledFence))
    }

    fn display(&mut self, _slot: SlotId, _coords: &DrawCoords, _flags: &DisplayFlags) -> PlayoutResult<()> {
        Ok(())
    }

    fn present(&mut self) -> PlayoutResult<()> {
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<WindowEvent> {
        Vec::new()
    }

    fn window_size(&self) -> (u32, u32) {
        (4, 4)
    }

    fn destroy_slot(&mut self, _slot: SlotId) {}
}

#[test]
fn test_consumer_counts_dropped_frames() {
    let (started_tx, started_rx) = channel::unbounded();
    let (release_tx, release_rx) = channel::unbounded();
    let factory: BackendFactory = Arc::new(move |_spec: &WindowSpec| {
        let backend: Box<dyn PresentBackend> = Box::new(Gate {
            started: started_tx.clone(),
            release: release_rx.clone(),
        });
        Ok(backend)
    });

    let mut consumer = ScreenConsumer::new(ScreenConfig::default(), tiny(), 1, 1, factory).unwrap();
    let mut frames = frames(6).into_iter();

    assert!(consumer.send(frames.next().unwrap()).into_inner());
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    for frame in frames {
        assert!(consumer.send(frame).into_inner());
    }
    assert_eq!(consumer.dropped_frames(), 4);
    assert_eq!(consumer.graph().tag_count("dropped-frame"), 4);

    for _ in 0..2 {
        let _ = release_tx.send(());
    }
    consumer.stop();
    assert!(!consumer.send(crate::frames(1).remove(0)).into_inner());
}

#[test]
fn test_window_close_stops_consumer() {
    let monitor = HeadlessMonitor::new();
    let consumer = ScreenConsumer::new(ScreenConfig::default(), tiny(), 1, 1, monitor.factory()).unwrap();
    assert!(consumer.is_running());

    monitor.push_event(WindowEvent::Closed);
    wait_until("close", || !consumer.is_running());
    assert!(!consumer.send(frames(1).remove(0)).into_inner());
}

#[test]
fn test_resize_recalculates_geometry() {
    let monitor = HeadlessMonitor::new();
    let config = ScreenConfig {
        stretch: playout_core::Stretch::None,
        ..ScreenConfig::default()
    };
    let spec = WindowSpec::new(
        "test".into(),
        &config,
        &playout_screen::ScreenGeometry::new(&config, &tiny()),
    );
    let factory = monitor.factory();
    let backend = factory(&spec).unwrap();

    let queue = Arc::new(OutputQueue::new(1));
    let running = Arc::new(AtomicBool::new(true));
    let mut presenter =
        Presenter::new(backend, config, tiny(), queue.clone(), running, Graph::new()).unwrap();
    assert_eq!(presenter.geometry().screen_width, 4);

    monitor.push_event(WindowEvent::Resized { width: 8, height: 4 });
    let frame = frames(1).remove(0);
    let feeder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        queue.try_push(frame).ok();
    });

    assert_eq!(presenter.tick().unwrap(), TickOutcome::Presented);
    feeder.join().unwrap();

    assert_eq!(presenter.geometry().screen_width, 8);
    assert_eq!(presenter.draw_coords().vertices[1].x, 0.5);
    presenter.destroy();
}

#[test]
fn test_startup_failure_is_reported() {
    let monitor = HeadlessMonitor::new();
    let huge = VideoFormat::custom("huge", 20_000, 16, 25, 1);
    let err = ScreenConsumer::new(ScreenConfig::default(), huge, 1, 1, monitor.factory()).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_channel_to_headless_screen() {
    let monitor = HeadlessMonitor::new();
    let proxy = ScreenConsumerProxy::new(ScreenConfig::default(), 1, monitor.factory());
    let index = proxy.index();
    assert_eq!(index, 600);

    let source = |format: &VideoFormat| -> PlayoutResult<Option<WriteFrame>> {
        let image = FrameBuffer::solid(format.width, format.height, PixelFormat::Bgra8, [9, 9, 9, 255]);
        Ok(Some(WriteFrame::new(image, AudioBlock::default())))
    };
    let channel = Channel::spawn(
        VideoFormat::custom("tiny", 4, 4, 200, 1),
        CpuCompositor::new(),
        source,
        vec![Box::new(proxy)],
        ChannelOptions {
            index: 1,
            max_ticks: Some(20),
            paced: true,
            ..ChannelOptions::default()
        },
    )
    .unwrap();
    let report = channel.join().unwrap();
    assert_eq!(report.frames_out, 20);

    let stats = monitor.stats();
    assert!(stats.uploads >= 1);
    assert!(stats.uploads <= 20);
    assert_eq!(stats.slots_created, 2);
    assert_eq!(stats.slots_destroyed, 2);
}

#[test]
fn test_stopped_consumer_refuses_without_counting() {
    let monitor = HeadlessMonitor::new();
    let mut consumer = ScreenConsumer::new(ScreenConfig::default(), tiny(), 1, 1, monitor.factory()).unwrap();
    consumer.stop();

    for frame in frames(3) {
        assert!(!consumer.send(frame).into_inner());
    }
    assert_eq!(consumer.dropped_frames(), 0);
    assert_eq!(consumer.graph().tag_count("dropped-frame"), 0);
}

/// Backend whose first upload panics.
struct Exploding {
    destroyed: Arc<Mutex<Vec<SlotId>>>,
    next_slot: u32,
}

impl PresentBackend for Exploding {
    fn check_capabilities(&self, _format: &VideoFormat) -> PlayoutResult<()> {
        Ok(())
    }

    fn create_slot(&mut self, _format: &VideoFormat) -> PlayoutResult<SlotId> {
        let id = SlotId(self.next_slot);
        self.next_slot += 1;
        Ok(id)
    }

    fn upload(&mut self, _slot: SlotId, _frame: &ReadFrame) -> PlayoutResult<Box<dyn Fence>> {
        panic!("device lost during upload");
    }

    fn display(&mut self, _slot: SlotId, _coords: &DrawCoords, _flags: &DisplayFlags) -> PlayoutResult<()> {
        Ok(())
    }

    fn present(&mut self) -> PlayoutResult<()> {
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<WindowEvent> {
        Vec::new()
    }

    fn window_size(&self) -> (u32, u32) {
        (4, 4)
    }

    fn destroy_slot(&mut self, slot: SlotId) {
        self.destroyed.lock().push(slot);
    }
}

#[test]
fn test_panicking_presentation_thread_releases_slots() {
    let destroyed = Arc::new(Mutex::new(Vec::new()));
    let shared = destroyed.clone();
    let factory: BackendFactory = Arc::new(move |_spec: &WindowSpec| {
        let backend: Box<dyn PresentBackend> = Box::new(Exploding {
            destroyed: shared.clone(),
            next_slot: 0,
        });
        Ok(backend)
    });

    let mut consumer = ScreenConsumer::new(ScreenConfig::default(), tiny(), 1, 1, factory).unwrap();
    let _ = consumer.send(frames(1).remove(0));
    wait_until("presentation thread exit", || !consumer.is_running());

    let mut slots = destroyed.lock().clone();
    slots.sort();
    assert_eq!(slots, vec![SlotId(0), SlotId(1)]);

    consumer.stop();
    assert_eq!(destroyed.lock().len(), 2);
    assert!(!consumer.send(frames(1).remove(0)).into_inner());
    assert_eq!(consumer.dropped_frames(), 0);
}

/// Sink that remembers everything forwarded to it.
#[derive(Default)]
struct Collected {
    values: Mutex<Vec<String>>,
    tags: Mutex<Vec<(TagSeverity, String)>>,
}

impl DiagnosticsSink for Collected {
    fn set_value(&self, name: &str, _value: f64) {
        self.values.lock().push(name.to_string());
    }

    fn set_tag(&self, severity: TagSeverity, name: &str) {
        self.tags.lock().push((severity, name.to_string()));
    }
}

#[test]
fn test_external_sink_receives_channel_and_screen_diagnostics() {
    let sink = Arc::new(Collected::default());

    let monitor = HeadlessMonitor::new();
    let proxy = ScreenConsumerProxy::new(ScreenConfig::default(), 1, monitor.factory()).with_sink(sink.clone());
    let source = |format: &VideoFormat| -> PlayoutResult<Option<WriteFrame>> {
        let image = FrameBuffer::solid(format.width, format.height, PixelFormat::Bgra8, [3, 3, 3, 255]);
        Ok(Some(WriteFrame::new(image, AudioBlock::default())))
    };
    let playout = Channel::spawn(
        VideoFormat::custom("tiny", 4, 4, 200, 1),
        CpuCompositor::new(),
        source,
        vec![Box::new(proxy)],
        ChannelOptions {
            max_ticks: Some(10),
            sink: Some(sink.clone()),
            ..ChannelOptions::default()
        },
    )
    .unwrap();
    playout.join().unwrap();

    let values = sink.values.lock().clone();
    assert!(values.iter().any(|name| name == "frame-time"));
    assert!(values.iter().any(|name| name == "tick-time"));
    sink.tags.lock().clear();

    let (started_tx, started_rx) = channel::unbounded();
    let (release_tx, release_rx) = channel::unbounded();
    let factory: BackendFactory = Arc::new(move |_spec: &WindowSpec| {
        let backend: Box<dyn PresentBackend> = Box::new(Gate {
            started: started_tx.clone(),
            release: release_rx.clone(),
        });
        Ok(backend)
    });
    let mut consumer =
        ScreenConsumer::with_sink(ScreenConfig::default(), tiny(), 1, 1, factory, Some(sink.clone())).unwrap();
    let mut frames = frames(3).into_iter();
    assert!(consumer.send(frames.next().unwrap()).into_inner());
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    for frame in frames {
        assert!(consumer.send(frame).into_inner());
    }
    drop(release_tx);
    consumer.stop();

    assert_eq!(consumer.dropped_frames(), 1);
    let tags = sink.tags.lock().clone();
    assert_eq!(tags, vec![(TagSeverity::Warning, "dropped-frame".to_string())]);
}
