//! Learning analytics events.
//!
//! Sinks are fire-and-forget: `emit` never blocks and never fails, so a slow or
//! missing consumer cannot affect the session that produced the event.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use learn_core::model::{ChapterId, QuizScore, SessionId};
use sandbox::ErrorKind;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Log target used by [`TracingEventSink`].
pub const EVENT_TARGET: &str = "learn::events";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum LearningEvent {
    SessionStarted {
        session_id: SessionId,
    },
    SessionRestored {
        session_id: SessionId,
    },
    SessionReset {
        session_id: SessionId,
    },
    ExecutionAttempted {
        session_id: SessionId,
        chapter_id: ChapterId,
        success: bool,
        error_kind: Option<ErrorKind>,
        duration: Duration,
    },
    QuizSubmitted {
        session_id: SessionId,
        chapter_id: ChapterId,
        score: QuizScore,
        passed: bool,
    },
    ChapterCompleted {
        session_id: SessionId,
        chapter_id: ChapterId,
    },
    ChapterUnlocked {
        session_id: SessionId,
        chapter_id: ChapterId,
    },
}

impl LearningEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            LearningEvent::SessionStarted { .. } => "session_started",
            LearningEvent::SessionRestored { .. } => "session_restored",
            LearningEvent::SessionReset { .. } => "session_reset",
            LearningEvent::ExecutionAttempted { .. } => "execution_attempted",
            LearningEvent::QuizSubmitted { .. } => "quiz_submitted",
            LearningEvent::ChapterCompleted { .. } => "chapter_completed",
            LearningEvent::ChapterUnlocked { .. } => "chapter_unlocked",
        }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        match self {
            LearningEvent::SessionStarted { session_id }
            | LearningEvent::SessionRestored { session_id }
            | LearningEvent::SessionReset { session_id }
            | LearningEvent::ExecutionAttempted { session_id, .. }
            | LearningEvent::QuizSubmitted { session_id, .. }
            | LearningEvent::ChapterCompleted { session_id, .. }
            | LearningEvent::ChapterUnlocked { session_id, .. } => *session_id,
        }
    }
}

/// Consumer for learning events. Implementations may log, forward, buffer or drop.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LearningEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: LearningEvent) {}
}

/// Logs each event at `info` under [`EVENT_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: LearningEvent) {
        match &event {
            LearningEvent::ExecutionAttempted {
                session_id,
                chapter_id,
                success,
                error_kind,
                duration,
            } => info!(
                target: EVENT_TARGET,
                event = event.name(),
                %session_id,
                %chapter_id,
                success,
                error_kind = error_kind.map(|k| k.as_str()),
                duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            ),
            LearningEvent::QuizSubmitted {
                session_id,
                chapter_id,
                score,
                passed,
            } => info!(
                target: EVENT_TARGET,
                event = event.name(),
                %session_id,
                %chapter_id,
                correct = score.correct,
                total = score.total,
                passed,
            ),
            LearningEvent::ChapterCompleted {
                session_id,
                chapter_id,
            }
            | LearningEvent::ChapterUnlocked {
                session_id,
                chapter_id,
            } => info!(target: EVENT_TARGET, event = event.name(), %session_id, %chapter_id),
            LearningEvent::SessionStarted { session_id }
            | LearningEvent::SessionRestored { session_id }
            | LearningEvent::SessionReset { session_id } => {
                info!(target: EVENT_TARGET, event = event.name(), %session_id);
            }
        }
    }
}

/// Forwards events into a bounded tokio channel without waiting.
///
/// A full or closed channel drops the event.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<LearningEvent>,
}

impl ChannelEventSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<LearningEvent>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiving end of a fresh channel holding up to `capacity` events.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LearningEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: LearningEvent) {
        if let Err(err) = self.tx.try_send(event) {
            let reason = match &err {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "channel closed",
            };
            debug!(reason, event = err.into_inner().name(), "learning event dropped");
        }
    }
}

/// Keeps every event in memory, mostly for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventSink {
    events: Arc<Mutex<Vec<LearningEvent>>>,
}

impl MemoryEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of the recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<LearningEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: LearningEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> LearningEvent {
        LearningEvent::SessionStarted {
            session_id: SessionId::generate(),
        }
    }

    #[test]
    fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelEventSink::channel(4);
        let event = started();
        sink.emit(event.clone());
        assert_eq!(rx.try_recv().unwrap(), event);
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = ChannelEventSink::channel(1);
        let first = started();
        sink.emit(first.clone());
        sink.emit(started());
        assert_eq!(rx.try_recv().unwrap(), first);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (sink, rx) = ChannelEventSink::channel(1);
        drop(rx);
        sink.emit(started());
    }

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemoryEventSink::new();
        let a = started();
        let b = LearningEvent::ChapterUnlocked {
            session_id: a.session_id(),
            chapter_id: ChapterId::new("operations").unwrap(),
        };
        sink.emit(a.clone());
        sink.emit(b.clone());
        assert_eq!(sink.events(), vec![a, b]);
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let event = LearningEvent::QuizSubmitted {
            session_id: SessionId::generate(),
            chapter_id: ChapterId::new("python_intro").unwrap(),
            score: QuizScore::new(2, 3),
            passed: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "quiz_submitted");
        assert_eq!(json["score"]["correct"], 2);
    }
}
