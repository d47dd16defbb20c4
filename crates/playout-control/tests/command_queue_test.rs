use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use playout_core::{AudioBlock, FrameBuffer, PixelFormat, PlayoutResult, VideoFormat};
use playout_control::{
    ChannelCommand, Command, CommandError, CommandQueue, QueueRegistry, ReplySink,
    OVERFLOW_THRESHOLD,
};
use playout_render::{Channel, ChannelOptions, CpuCompositor, WriteFrame};

/// Command driven by a closure, replying into a channel.
struct Scripted {
    name: String,
    body: Box<dyn FnMut() -> Result<(), CommandError> + Send>,
    replies: Sender<String>,
}

impl Scripted {
    fn new(
        name: &str,
        replies: &Sender<String>,
        body: impl FnMut() -> Result<(), CommandError> + Send + 'static,
    ) -> Box<dyn Command> {
        Box::new(Self {
            name: name.to_string(),
            body: Box::new(body),
            replies: replies.clone(),
        })
    }
}

impl Command for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        (self.body)()
    }

    fn send_reply(&self, reply: &str) {
        let _ = self.replies.send(reply.to_string());
    }
}

fn replies() -> (Sender<String>, Receiver<String>) {
    channel::unbounded()
}

fn next_reply(rx: &Receiver<String>) -> String {
    rx.recv_timeout(Duration::from_secs(5)).unwrap()
}

#[test]
fn test_commands_run_in_submission_order() {
    let registry = QueueRegistry::new();
    let queue = CommandQueue::new("ordered", &registry).unwrap();
    let (tx, _rx) = replies();
    let seen = Arc::new(Mutex::new(Vec::new()));

    for i in 0..50 {
        let seen = seen.clone();
        queue.add_command(Scripted::new("PUSH", &tx, move || {
            seen.lock().push(i);
            Ok(())
        }));
    }
    drop(queue);

    assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
}

#[test]
fn test_failure_replies() {
    let registry = QueueRegistry::new();
    let queue = CommandQueue::new("failures", &registry).unwrap();
    let (tx, rx) = replies();

    let cases: Vec<(&str, CommandError, &str)> = vec![
        ("LOAD", CommandError::NotFound("clip.mov".into()), "404 LOAD FAILED\r\n"),
        ("PLAY", CommandError::ExpectedUserError("busy".into()), "403 PLAY FAILED\r\n"),
        ("CG", CommandError::UserError("syntax".into()), "403 CG FAILED\r\n"),
        ("MIXER", CommandError::MissingParameter("layer".into()), "402 MIXER FAILED\r\n"),
        ("CALL", CommandError::InvalidParameter("seek".into()), "403 CALL FAILED\r\n"),
        ("DATA", CommandError::Internal("io".into()), "501 DATA FAILED\r\n"),
    ];
    for (name, err, expected) in cases {
        queue.add_command(Scripted::new(name, &tx, move || Err(err.clone())));
        assert_eq!(next_reply(&rx), expected);
    }
}

#[test]
fn test_panic_maps_to_internal() {
    let registry = QueueRegistry::new();
    let queue = CommandQueue::new("panics", &registry).unwrap();
    let (tx, rx) = replies();

    queue.add_command(Scripted::new("CRASH", &tx, || panic!("boom")));
    assert_eq!(next_reply(&rx), "501 CRASH FAILED\r\n");

    // The executor survives and keeps serving.
    queue.add_command(Scripted::new("NEXT", &tx, || Err(CommandError::NotFound("x".into()))));
    assert_eq!(next_reply(&rx), "404 NEXT FAILED\r\n");
}

#[test]
fn test_overflow_reply_still_queues() {
    let registry = QueueRegistry::new();
    let queue = CommandQueue::new("flood", &registry).unwrap();
    let (tx, rx) = replies();
    let (started_tx, started_rx) = channel::bounded::<()>(1);
    let (release_tx, release_rx) = channel::bounded::<()>(1);

    queue.add_command(Scripted::new("BLOCK", &tx, move || {
        let _ = started_tx.send(());
        let _ = release_rx.recv_timeout(Duration::from_secs(5));
        Ok(())
    }));
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let ran = Arc::new(Mutex::new(0usize));
    for _ in 0..=OVERFLOW_THRESHOLD {
        let ran = ran.clone();
        queue.add_command(Scripted::new("QUIET", &tx, move || {
            *ran.lock() += 1;
            Ok(())
        }));
    }
    assert!(rx.try_recv().is_err());
    assert_eq!(queue.pending(), OVERFLOW_THRESHOLD + 1);

    let ran_late = ran.clone();
    queue.add_command(Scripted::new("LATE", &tx, move || {
        *ran_late.lock() += 1;
        Ok(())
    }));
    assert_eq!(rx.try_recv().unwrap(), "500 FAILED\r\n");

    let _ = release_tx.send(());
    drop(queue);
    assert_eq!(*ran.lock(), OVERFLOW_THRESHOLD + 2);
}

#[test]
fn test_lookup_routes_to_live_queue() {
    let registry = QueueRegistry::new();
    let _a = CommandQueue::new("a", &registry).unwrap();
    let b = CommandQueue::new("b", &registry).unwrap();
    let (tx, rx) = replies();

    let handle = registry.lookup("b").unwrap();
    handle.add_command(Scripted::new("PING", &tx, || Err(CommandError::UserError("no".into()))));
    assert_eq!(next_reply(&rx), "403 PING FAILED\r\n");

    drop(b);
    assert!(registry.lookup("b").is_none());
    assert_eq!(registry.names(), vec!["a".to_string()]);
}

#[test]
fn test_stop_command_ends_channel() {
    let source = |format: &VideoFormat| -> PlayoutResult<Option<WriteFrame>> {
        let image = FrameBuffer::solid(format.width, format.height, PixelFormat::Bgra8, [1, 1, 1, 255]);
        Ok(Some(WriteFrame::new(image, AudioBlock::default())))
    };
    let channel = Channel::spawn(
        VideoFormat::custom("tiny", 4, 4, 100, 1),
        CpuCompositor::new(),
        source,
        Vec::new(),
        ChannelOptions::default(),
    )
    .unwrap();

    let registry = QueueRegistry::new();
    let queue = CommandQueue::new("operator", &registry).unwrap();
    let (tx, rx) = replies();
    let sink: Arc<dyn ReplySink> = Arc::new(tx);

    queue.add_command(Box::new(ChannelCommand::set_format(
        Some(channel.control_sender()),
        Some("pal"),
        sink.clone(),
    )));
    assert_eq!(next_reply(&rx), "202 SET OK\r\n");

    queue.add_command(Box::new(ChannelCommand::stop(Some(channel.control_sender()), sink)));
    assert_eq!(next_reply(&rx), "202 STOP OK\r\n");

    let report = channel.join().unwrap();
    assert_eq!(report.final_format, "pal");
    assert_eq!(report.reconfigurations, 1);
}
