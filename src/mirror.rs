//! The event mirror (§4.7): a hot multicast stream of reporter/logger
//! actions produced once by a compilation and replayed, in the producer's
//! emission order, to every subscriber — including late joiners that
//! dedup onto an already-running compilation.

use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// Diagnostic severity, as surfaced by `ReporterAction::Problem`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warn,
    Info,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub path: Option<std::path::PathBuf>,
    pub line: Option<u32>,
    /// Wall-clock time the external compiler raised this diagnostic, not
    /// when it was replayed — a late subscriber may see it long after.
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

/// Table 1 — reporter actions, in the order a fresh compile emits them.
#[derive(Debug, Clone)]
pub enum ReporterAction {
    StartCompilation,
    StartIncrementalCycle {
        sources: Vec<std::path::PathBuf>,
        output_dirs: Vec<std::path::PathBuf>,
    },
    Problem(Diagnostic),
    DiagnosticsSummary { errors: usize, warnings: usize },
    NextPhase { name: String },
    Progress { current: u64, total: u64 },
    EndIncrementalCycle { duration_ms: u64, success: bool },
    Cancelled,
    EndCompilation { exit_code: i32 },
}

/// Table 1 — logger actions. `Trace` is demoted to `Debug` on replay, per
/// the mapping the spec calls out explicitly.
#[derive(Debug, Clone)]
pub enum LoggerAction {
    Error(String),
    Warn(String),
    Info(String),
    Debug(String),
    Trace(String),
}

impl LoggerAction {
    /// Apply the trace-to-debug demotion used by the replay path.
    pub fn demoted(self) -> Self {
        match self {
            LoggerAction::Trace(msg) => LoggerAction::Debug(msg),
            other => other,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MirrorEvent {
    Reporter(ReporterAction),
    Logger(LoggerAction),
}

struct MirrorInner {
    events: Vec<MirrorEvent>,
    closed: bool,
}

/// A hot, append-only, replayable multicast stream.
///
/// The producer (the running compilation) calls [`EventMirror::emit`] as it
/// progresses and [`EventMirror::close`] when it finishes; this never
/// blocks on subscribers because the buffer is unbounded, matching the
/// spec's "buffering is required to prevent slow subscribers from stalling
/// compilation." A subscriber calls [`EventMirror::subscribe`] at any point
/// — even after the producer has already emitted everything — and receives
/// the full emission history followed by anything still to come, in order.
#[derive(Clone)]
pub struct EventMirror {
    inner: Arc<Mutex<MirrorInner>>,
    notify: Arc<Notify>,
}

impl EventMirror {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MirrorInner {
                events: Vec::new(),
                closed: false,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    pub async fn emit(&self, event: MirrorEvent) {
        let mut inner = self.inner.lock().await;
        inner.events.push(event);
        self.notify.notify_waiters();
    }

    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        self.notify.notify_waiters();
    }

    /// Start a replay cursor. Reading from it yields every event emitted so
    /// far, then blocks for new ones until the mirror is closed.
    pub fn subscribe(&self) -> MirrorSubscription {
        MirrorSubscription {
            inner: self.inner.clone(),
            notify: self.notify.clone(),
            cursor: 0,
        }
    }
}

impl Default for EventMirror {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MirrorSubscription {
    inner: Arc<Mutex<MirrorInner>>,
    notify: Arc<Notify>,
    cursor: usize,
}

impl MirrorSubscription {
    /// Await the next event, or `None` once the mirror is closed and fully
    /// drained. Cancel-safe: dropping a pending call loses nothing, the
    /// cursor only advances once an event is actually returned.
    pub async fn next(&mut self) -> Option<MirrorEvent> {
        loop {
            {
                let inner = self.inner.lock().await;
                if self.cursor < inner.events.len() {
                    let event = inner.events[self.cursor].clone();
                    self.cursor += 1;
                    return Some(event);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Replays a subscription's events into a reporter and logger, demoting
/// trace to debug, until the mirror closes. Used by the deduplication
/// registry (§4.3) to give late subscribers the same output a fresh
/// compile would have produced; runs on the I/O pool (§5), never on the
/// computation pool, so a slow subscriber can't stall other compiles.
///
/// `previous_diagnostics` are reported first, ahead of anything the live
/// mirror replays: §4.3's dedup path reconstructs the shared
/// `previousLastSuccessful`'s problems and surfaces them at the start of
/// the replay, so a deduplicated client sees the same problems a fresh
/// compile against that same previous result would have reported.
pub async fn replay(
    mut subscription: MirrorSubscription,
    previous_diagnostics: &[Diagnostic],
    reporter: &dyn crate::interfaces::Reporter,
    logger: &dyn crate::interfaces::Logger,
) {
    for diagnostic in previous_diagnostics {
        reporter
            .report(ReporterAction::Problem(diagnostic.clone()))
            .await;
    }
    while let Some(event) = subscription.next().await {
        match event {
            MirrorEvent::Reporter(action) => reporter.report(action).await,
            MirrorEvent::Logger(action) => logger.log(action.demoted()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn late_subscriber_sees_full_history_in_order() {
        let mirror = EventMirror::new();
        mirror
            .emit(MirrorEvent::Reporter(ReporterAction::StartCompilation))
            .await;
        mirror
            .emit(MirrorEvent::Logger(LoggerAction::Info("building".into())))
            .await;

        let mut late = mirror.subscribe();
        mirror
            .emit(MirrorEvent::Reporter(ReporterAction::EndCompilation {
                exit_code: 0,
            }))
            .await;
        mirror.close().await;

        let mut seen = Vec::new();
        while let Some(event) = late.next().await {
            seen.push(format!("{:?}", event));
        }
        assert_eq!(seen.len(), 3);
        assert!(seen[0].contains("StartCompilation"));
        assert!(seen[2].contains("EndCompilation"));
    }

    #[tokio::test]
    async fn subscription_ends_when_mirror_closes_with_no_more_events() {
        let mirror = EventMirror::new();
        let mut sub = mirror.subscribe();
        mirror.close().await;
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn replay_surfaces_previous_diagnostics_before_live_events() {
        use crate::interfaces::{Logger, Reporter};
        use async_trait::async_trait;
        use tokio::sync::Mutex as AsyncMutex;

        struct RecordingReporter(AsyncMutex<Vec<String>>);
        #[async_trait]
        impl Reporter for RecordingReporter {
            async fn report(&self, action: ReporterAction) {
                self.0.lock().await.push(format!("{:?}", action));
            }
        }
        struct NullLogger;
        #[async_trait]
        impl Logger for NullLogger {
            async fn log(&self, _action: LoggerAction) {}
        }

        let mirror = EventMirror::new();
        mirror
            .emit(MirrorEvent::Reporter(ReporterAction::StartCompilation))
            .await;
        mirror.close().await;

        let previous = vec![Diagnostic {
            severity: Severity::Error,
            message: "stale problem".into(),
            path: None,
            line: None,
            recorded_at: chrono::Utc::now(),
        }];
        let reporter = RecordingReporter(AsyncMutex::new(Vec::new()));
        replay(mirror.subscribe(), &previous, &reporter, &NullLogger).await;

        let seen = reporter.0.lock().await;
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("stale problem"));
        assert!(seen[1].contains("StartCompilation"));
    }

    #[tokio::test]
    async fn trace_is_demoted_to_debug_on_replay() {
        assert!(matches!(
            LoggerAction::Trace("x".into()).demoted(),
            LoggerAction::Debug(_)
        ));
        assert!(matches!(
            LoggerAction::Info("x".into()).demoted(),
            LoggerAction::Info(_)
        ));
    }
}
