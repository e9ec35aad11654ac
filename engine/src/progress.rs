//! Progress reporting.
//!
//! The queue publishes `QueueEvent`s to every subscriber over a channel, which
//! decouples the engine from any specific UI technology. Events are
//! informational; the authoritative state is always a `TransferQueue::jobs()`
//! snapshot.
//!
//! Notices ("added", "duplicate") are transient advisories. They live outside
//! job state and expire on their own.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::model::{JobId, TransferStatus};

/// A state change inside the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// A placeholder job was appended.
    JobAdded { job_id: JobId, duplicate: bool },
    /// Enumeration filled in a placeholder.
    JobEnumerated {
        job_id: JobId,
        file_count: usize,
        total_size: u64,
    },
    /// Enumeration failed; the placeholder has been removed.
    EnumerationFailed {
        job_id: JobId,
        source_path: PathBuf,
        message: String,
    },
    StatusChanged { job_id: JobId, status: TransferStatus },
    Progress {
        job_id: JobId,
        copied_size: u64,
        total_size: u64,
    },
    /// Jobs removed by `clear_completed` / `clear_all`.
    JobsRemoved { job_ids: Vec<JobId> },
    RunningChanged { running: bool },
}

/// Fan-out of events to subscribers. Disconnected subscribers are dropped.
#[derive(Default)]
pub(crate) struct EventBus {
    subscribers: Vec<Sender<QueueEvent>>,
}

impl EventBus {
    pub(crate) fn subscribe(&mut self) -> Receiver<QueueEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn publish(&mut self, event: QueueEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// A job was queued.
    Added,
    /// A job was queued although an identical (source, destination) pair is already queued.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub expires_at: Instant,
}

/// Holds the most recent notice until it expires.
#[derive(Clone)]
pub(crate) struct NoticeBoard {
    ttl: Duration,
    current: Arc<Mutex<Option<Notice>>>,
}

impl NoticeBoard {
    pub(crate) fn new(ttl: Duration) -> Self {
        NoticeBoard {
            ttl,
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn post(&self, kind: NoticeKind, message: String) {
        let notice = Notice {
            kind,
            message,
            expires_at: Instant::now() + self.ttl,
        };
        if let Ok(mut current) = self.current.lock() {
            *current = Some(notice);
        }
    }

    /// The live notice, if any; expired notices are discarded on read.
    pub(crate) fn current(&self) -> Option<Notice> {
        let mut current = self.current.lock().ok()?;
        match current.as_ref() {
            Some(notice) if notice.expires_at > Instant::now() => Some(notice.clone()),
            Some(_) => {
                *current = None;
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_bus_fans_out_and_drops_closed_subscribers() {
        let mut bus = EventBus::default();
        let first = bus.subscribe();
        let second = bus.subscribe();
        drop(second);

        bus.publish(QueueEvent::RunningChanged { running: true });
        assert_eq!(bus.subscribers.len(), 1);
        assert_eq!(
            first.try_recv().expect("Expected an event"),
            QueueEvent::RunningChanged { running: true }
        );

        let job_id = Uuid::new_v4();
        bus.publish(QueueEvent::JobAdded {
            job_id,
            duplicate: false,
        });
        assert!(matches!(
            first.try_recv(),
            Ok(QueueEvent::JobAdded { duplicate: false, .. })
        ));
    }

    #[test]
    fn test_notice_expires() {
        let board = NoticeBoard::new(Duration::from_millis(30));
        board.post(NoticeKind::Duplicate, "already queued".to_string());
        assert_eq!(
            board.current().map(|n| n.kind),
            Some(NoticeKind::Duplicate)
        );

        std::thread::sleep(Duration::from_millis(60));
        assert!(board.current().is_none());
    }

    #[test]
    fn test_newer_notice_replaces_older() {
        let board = NoticeBoard::new(Duration::from_secs(5));
        board.post(NoticeKind::Duplicate, "dup".to_string());
        board.post(NoticeKind::Added, "added".to_string());
        let notice = board.current().expect("Expected a notice");
        assert_eq!(notice.kind, NoticeKind::Added);
        assert_eq!(notice.message, "added");
    }
}
