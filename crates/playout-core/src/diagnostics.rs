//! Per-tick observability values.
//!
//! Stages publish plain numbers here (processing time, dropped frames).
//! Nothing in the pipeline reads them back to make decisions.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Severity attached to a tag event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagSeverity {
    Info,
    Warning,
    Error,
}

/// Receiver of diagnostics values. Implemented by external collectors.
pub trait DiagnosticsSink: Send + Sync {
    /// Record the latest value of a series.
    fn set_value(&self, name: &str, value: f64);
    /// Record a discrete event, e.g. a dropped frame.
    fn set_tag(&self, severity: TagSeverity, name: &str);
}

/// Serializable view of a [`Graph`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphSnapshot {
    pub text: String,
    /// Last value written per series.
    pub values: BTreeMap<String, f64>,
    /// Number of tag events per name.
    pub tags: BTreeMap<String, u64>,
}

#[derive(Default)]
struct GraphState {
    text: String,
    values: BTreeMap<String, f64>,
    tags: BTreeMap<String, u64>,
}

/// In-memory diagnostics graph. Cheap to clone, all clones share state.
#[derive(Clone, Default)]
pub struct Graph {
    state: Arc<Mutex<GraphState>>,
    forward: Option<Arc<dyn DiagnosticsSink>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also forward every value to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.forward = Some(sink);
        self
    }

    /// Label shown next to the graph by a collector.
    pub fn set_text(&self, text: impl Into<String>) {
        self.state.lock().text = text.into();
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.state.lock().values.get(name).copied()
    }

    /// Number of tag events recorded under `name`.
    pub fn tag_count(&self, name: &str) -> u64 {
        self.state.lock().tags.get(name).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let state = self.state.lock();
        GraphSnapshot {
            text: state.text.clone(),
            values: state.values.clone(),
            tags: state.tags.clone(),
        }
    }
}

impl DiagnosticsSink for Graph {
    fn set_value(&self, name: &str, value: f64) {
        self.state.lock().values.insert(name.to_string(), value);
        if let Some(sink) = &self.forward {
            sink.set_value(name, value);
        }
    }

    fn set_tag(&self, severity: TagSeverity, name: &str) {
        *self.state.lock().tags.entry(name.to_string()).or_insert(0) += 1;
        if let Some(sink) = &self.forward {
            sink.set_tag(severity, name);
        }
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph").field("state", &self.snapshot()).finish()
    }
}
