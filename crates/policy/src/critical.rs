//! Critical-error escalation.
//!
//! Ordinary denials go back to the caller. Critical ones (integrity failures)
//! also pass through a [`CriticalSink`] owned by the host process, which
//! counts them and hands each one to a [`CriticalHandler`] exactly once.

use crate::error::{Denial, DenialKind};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

/// A critical event reported by the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticalEvent {
    pub kind: DenialKind,
    pub tool: String,
    pub reason: String,
}

impl fmt::Display for CriticalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in tool '{}': {}", self.kind, self.tool, self.reason)
    }
}

/// Decides what happens on a critical event: abort, alert, quarantine.
pub trait CriticalHandler: Send + Sync {
    fn on_critical(&self, event: &CriticalEvent);
}

/// Default handler: log and abort the process.
#[derive(Debug, Default)]
pub struct AbortOnCritical;

impl CriticalHandler for AbortOnCritical {
    fn on_critical(&self, event: &CriticalEvent) {
        error!(
            kind = %event.kind,
            tool = %event.tool,
            reason = %event.reason,
            "critical policy failure, aborting"
        );
        std::process::abort();
    }
}

/// Counts critical events and dispatches them to the installed handler.
pub struct CriticalSink {
    handler: Arc<dyn CriticalHandler>,
    count: AtomicU64,
}

impl CriticalSink {
    pub fn new(handler: Arc<dyn CriticalHandler>) -> Self {
        Self {
            handler,
            count: AtomicU64::new(0),
        }
    }

    /// Report a critical denial for `tool`.
    ///
    /// Non-critical denials are ignored.
    pub fn report(&self, tool: &str, denial: &Denial) {
        if !denial.is_critical() {
            return;
        }
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        error!(
            kind = %denial.kind,
            tool,
            reason = %denial.reason,
            count = n,
            "critical policy failure"
        );
        self.handler.on_critical(&CriticalEvent {
            kind: denial.kind,
            tool: tool.to_string(),
            reason: denial.reason.clone(),
        });
    }

    /// Critical events reported so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Default for CriticalSink {
    fn default() -> Self {
        Self::new(Arc::new(AbortOnCritical))
    }
}

impl fmt::Debug for CriticalSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalSink")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<CriticalEvent>>);

    impl CriticalHandler for Recorder {
        fn on_critical(&self, event: &CriticalEvent) {
            self.0.lock().push(event.clone());
        }
    }

    #[test]
    fn reports_only_critical_denials() {
        let recorder = Arc::new(Recorder::default());
        let sink = CriticalSink::new(recorder.clone());

        sink.report("fs.read", &Denial::new(DenialKind::Policy, "nope"));
        assert_eq!(sink.count(), 0);

        sink.report(
            "fs.read",
            &Denial::new(DenialKind::SubsystemCompromised, "checksum mismatch"),
        );
        assert_eq!(sink.count(), 1);

        let events = recorder.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tool, "fs.read");
        assert!(events[0].to_string().contains("checksum mismatch"));
    }
}
