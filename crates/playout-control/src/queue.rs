//! Per-client command execution.
//!
//! Every queue owns one executor thread, so commands from the same client run
//! strictly in submission order and never overlap.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use playout_core::{PlayoutError, PlayoutResult};

use crate::command::Command;
use crate::error::{CommandError, ReplyStatus};

/// Pending commands above this count get an overflow reply.
pub const OVERFLOW_THRESHOLD: usize = 128;

struct Inner {
    name: String,
    sender: Mutex<Option<Sender<Box<dyn Command>>>>,
    pending: AtomicUsize,
}

impl Inner {
    fn add_command(&self, command: Box<dyn Command>) {
        let pending = self.pending.load(Ordering::Acquire);
        if pending > OVERFLOW_THRESHOLD {
            tracing::error!(queue = %self.name, command = command.name(), pending, "command queue overflow");
            reply(command.as_ref(), ReplyStatus::Overflow);
        }

        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            tracing::warn!(queue = %self.name, command = command.name(), "command queue closed");
            reply(command.as_ref(), ReplyStatus::Internal);
            return;
        };

        self.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(err) = sender.send(command) {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            reply(err.0.as_ref(), ReplyStatus::Internal);
        }
    }
}

/// Send a failure reply, surviving a panicking reply path.
fn reply(command: &dyn Command, status: ReplyStatus) {
    let line = status.reply(command.name());
    if panic::catch_unwind(AssertUnwindSafe(|| command.send_reply(&line))).is_err() {
        tracing::error!(command = command.name(), "failed to send reply");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "command panicked".to_string())
}

fn execute(queue: &str, mut command: Box<dyn Command>) {
    let name = command.name().to_string();
    let started = Instant::now();
    tracing::debug!(queue, command = %name, "executing command");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| command.execute()))
        .unwrap_or_else(|payload| Err(CommandError::Internal(panic_message(payload.as_ref()))));

    match outcome {
        Ok(()) => {
            tracing::debug!(queue, command = %name, elapsed = ?started.elapsed(), "executed command");
        }
        Err(CommandError::ExpectedUserError(reason)) => {
            tracing::debug!(queue, command = %name, %reason, "command refused");
            reply(command.as_ref(), ReplyStatus::Rejected);
        }
        Err(err) => {
            match err.hint() {
                Some(hint) => tracing::error!(queue, command = %name, error = %err, hint, "command failed"),
                None => tracing::error!(queue, command = %name, error = %err, "failed to execute command"),
            }
            reply(command.as_ref(), err.status());
        }
    }
    tracing::trace!(queue, "ready for a new command");
}

/// Shared handle to a registered queue.
#[derive(Clone)]
pub struct QueueHandle {
    inner: Arc<Inner>,
}

impl QueueHandle {
    pub fn add_command(&self, command: Box<dyn Command>) {
        self.inner.add_command(command);
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHandle")
            .field("name", &self.inner.name)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Live command queues by name.
///
/// Queues register themselves on creation and leave on drop; the registry
/// never keeps a queue alive.
#[derive(Clone, Default)]
pub struct QueueRegistry {
    queues: Arc<Mutex<HashMap<String, Weak<Inner>>>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, inner: &Arc<Inner>) -> PlayoutResult<()> {
        let mut queues = self.queues.lock();
        if queues.get(&inner.name).is_some_and(|q| q.strong_count() > 0) {
            return Err(PlayoutError::config(
                format!("command queue '{}' already exists", inner.name),
                None,
            ));
        }
        queues.insert(inner.name.clone(), Arc::downgrade(inner));
        Ok(())
    }

    fn unregister(&self, inner: &Arc<Inner>) {
        let mut queues = self.queues.lock();
        if queues
            .get(&inner.name)
            .is_some_and(|q| Weak::ptr_eq(q, &Arc::downgrade(inner)))
        {
            queues.remove(&inner.name);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<QueueHandle> {
        self.queues
            .lock()
            .get(name)
            .and_then(Weak::upgrade)
            .map(|inner| QueueHandle { inner })
    }

    /// Names of the registered queues, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.queues.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRegistry").field("queues", &self.names()).finish()
    }
}

/// A named, serialized command executor.
pub struct CommandQueue {
    inner: Arc<Inner>,
    registry: QueueRegistry,
    thread: Option<JoinHandle<()>>,
}

impl CommandQueue {
    /// Start the executor and register it under `name`.
    pub fn new(name: impl Into<String>, registry: &QueueRegistry) -> PlayoutResult<Self> {
        let name = name.into();
        let (sender, receiver) = channel::unbounded::<Box<dyn Command>>();
        let inner = Arc::new(Inner {
            name: name.clone(),
            sender: Mutex::new(Some(sender)),
            pending: AtomicUsize::new(0),
        });
        registry.register(&inner)?;

        let worker = inner.clone();
        let spawned = thread::Builder::new()
            .name(format!("command-queue {name}"))
            .spawn(move || {
                for command in receiver.iter() {
                    worker.pending.fetch_sub(1, Ordering::AcqRel);
                    execute(&worker.name, command);
                }
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                registry.unregister(&inner);
                return Err(err.into());
            }
        };

        tracing::debug!(queue = %name, "command queue started");
        Ok(Self {
            inner,
            registry: registry.clone(),
            thread: Some(thread),
        })
    }

    /// Queue `command` behind everything already submitted.
    pub fn add_command(&self, command: Box<dyn Command>) {
        self.inner.add_command(command);
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Commands submitted but not yet started.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for CommandQueue {
    /// Commands already queued still run before the executor exits.
    fn drop(&mut self) {
        self.registry.unregister(&self.inner);
        self.inner.sender.lock().take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(queue = %self.inner.name, "command executor panicked");
            }
        }
        tracing::debug!(queue = %self.inner.name, "command queue stopped");
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("name", &self.inner.name)
            .field("pending", &self.pending())
            .finish()
    }
}
