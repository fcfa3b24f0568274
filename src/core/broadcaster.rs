use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

use super::status::StatusSnapshot;

pub const DEFAULT_LOG_CAPACITY: usize = 100;

// Observers that fall this far behind start losing events instead of
// slowing down the publisher.
const FEED_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub line: String,
}

/// Everything pushed to observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FeedEvent {
    Status(StatusSnapshot),
    Qr { payload: String },
    Log(LogEntry),
}

/// What a newly attached observer needs to rebuild the current view, plus
/// the live feed from that point on.
pub struct Attachment {
    pub history: Vec<LogEntry>,
    pub snapshot: StatusSnapshot,
    pub events: broadcast::Receiver<FeedEvent>,
}

struct Inner {
    history: VecDeque<LogEntry>,
    capacity: usize,
    next_seq: u64,
    snapshot: StatusSnapshot,
}

/// Fire-and-forget fan-out of status, QR and log events.
///
/// All publishing happens under one lock, and `attach` subscribes under that
/// same lock, so an observer's replay and its live feed never overlap or leave
/// a gap. Must not emit `tracing` events while the lock is held: the log
/// writer publishes back into this broadcaster.
pub struct StatusBroadcaster {
    tx: broadcast::Sender<FeedEvent>,
    inner: Mutex<Inner>,
}

impl StatusBroadcaster {
    pub fn new(capacity: usize, initial: StatusSnapshot) -> Self {
        let (tx, _) = broadcast::channel(FEED_CHANNEL_CAPACITY);
        let capacity = capacity.max(1);
        Self {
            tx,
            inner: Mutex::new(Inner {
                history: VecDeque::with_capacity(capacity),
                capacity,
                next_seq: 1,
                snapshot: initial,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn publish_status(&self, snapshot: StatusSnapshot) {
        let mut inner = self.lock();
        inner.snapshot = snapshot.clone();
        // No receivers is fine.
        let _ = self.tx.send(FeedEvent::Status(snapshot));
    }

    pub fn publish_qr(&self, payload: &str) {
        let _inner = self.lock();
        let _ = self.tx.send(FeedEvent::Qr {
            payload: payload.to_string(),
        });
    }

    pub fn publish_log(&self, line: &str) {
        let line = line.trim_end();
        if line.is_empty() {
            return;
        }

        let mut inner = self.lock();
        let entry = LogEntry {
            seq: inner.next_seq,
            at: Utc::now(),
            line: line.to_string(),
        };
        inner.next_seq += 1;
        if inner.history.len() == inner.capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(entry.clone());
        let _ = self.tx.send(FeedEvent::Log(entry));
    }

    pub fn attach(&self) -> Attachment {
        let inner = self.lock();
        Attachment {
            history: inner.history.iter().cloned().collect(),
            snapshot: inner.snapshot.clone(),
            events: self.tx.subscribe(),
        }
    }

    pub fn history(&self) -> Vec<LogEntry> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().snapshot.clone()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcaster(capacity: usize) -> StatusBroadcaster {
        StatusBroadcaster::new(capacity, StatusSnapshot::initial())
    }

    #[test]
    fn attach_replays_most_recent_window_in_order() {
        let b = broadcaster(100);
        for i in 0..150 {
            b.publish_log(&format!("line {}", i));
        }

        let attachment = b.attach();
        assert_eq!(attachment.history.len(), 100);
        assert_eq!(attachment.history[0].line, "line 50");
        assert_eq!(attachment.history[99].line, "line 149");
        assert!(
            attachment
                .history
                .windows(2)
                .all(|w| w[0].seq + 1 == w[1].seq)
        );
        assert_eq!(attachment.snapshot.state, StatusSnapshot::initial().state);
        assert!(attachment.snapshot.qr.is_none());
    }

    #[test]
    fn blank_lines_are_not_recorded() {
        let b = broadcaster(4);
        b.publish_log("  \n");
        b.publish_log("real\n");
        let history = b.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].line, "real");
    }

    #[test]
    fn publishing_without_observers_does_not_block_or_fail() {
        let b = broadcaster(2);
        for i in 0..1000 {
            b.publish_log(&format!("{}", i));
        }
        b.publish_qr("qr-data");
        assert_eq!(b.observer_count(), 0);
        assert_eq!(b.history().len(), 2);
    }

    #[tokio::test]
    async fn attached_observer_receives_events_after_replay() {
        let b = broadcaster(10);
        b.publish_log("before");
        let mut attachment = b.attach();
        b.publish_log("after");

        assert_eq!(attachment.history.len(), 1);
        match attachment.events.recv().await.unwrap() {
            FeedEvent::Log(entry) => assert_eq!(entry.line, "after"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn status_publish_updates_current_snapshot() {
        let b = broadcaster(10);
        let mut attachment = b.attach();
        let mut snapshot = StatusSnapshot::initial();
        snapshot.session_exists = true;
        b.publish_status(snapshot.clone());

        assert!(b.snapshot().session_exists);
        match attachment.events.recv().await.unwrap() {
            FeedEvent::Status(s) => assert!(s.session_exists),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn slow_observer_lags_instead_of_blocking() {
        let b = broadcaster(10);
        let mut attachment = b.attach();
        for i in 0..(FEED_CHANNEL_CAPACITY + 10) {
            b.publish_log(&format!("{}", i));
        }
        assert!(matches!(
            attachment.events.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }
}
