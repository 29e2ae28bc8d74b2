//! Diagnostics for individual permission and meta lookups.

use crate::context::ContextSet;
use crate::types::{CheckOrigin, HolderId};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

pub const VERBOSE_TARGET: &str = "permweave::verbose";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Permission,
    Meta,
}

/// One lookup, as reported to a [`VerboseSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerboseEvent {
    pub kind: CheckKind,
    pub origin: CheckOrigin,
    pub holder: HolderId,
    pub contexts: ContextSet,
    pub key: String,
    /// `true`/`false`/`undefined` for permissions, the value for meta.
    pub result: String,
    pub processor: Option<&'static str>,
}

/// Receives every lookup. Must not block; the result of the lookup does not
/// depend on what the sink does.
pub trait VerboseSink: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }

    fn record(&self, event: VerboseEvent);
}

/// Emits lookups as `trace` events under the `permweave::verbose` target.
#[derive(Debug)]
pub struct TracingVerboseSink {
    enabled: AtomicBool,
}

impl TracingVerboseSink {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

impl VerboseSink for TracingVerboseSink {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn record(&self, event: VerboseEvent) {
        trace!(
            target: VERBOSE_TARGET,
            kind = ?event.kind,
            origin = %event.origin,
            holder = %event.holder,
            contexts = %event.contexts,
            key = %event.key,
            result = %event.result,
            processor = event.processor.unwrap_or("-"),
            "lookup"
        );
    }
}

/// Keeps every event in memory. Handy for tests and for short-lived
/// diagnostic sessions.
#[derive(Debug, Default)]
pub struct RecordingVerboseSink {
    events: Mutex<Vec<VerboseEvent>>,
}

impl RecordingVerboseSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<VerboseEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<VerboseEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl VerboseSink for RecordingVerboseSink {
    fn record(&self, event: VerboseEvent) {
        self.events.lock().push(event);
    }
}
