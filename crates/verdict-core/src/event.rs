use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;
use tracing::warn;

use crate::types::{EventDraft, JobId, ProgressEvent};

/// Per-job progress bus.
///
/// The bus is the job's append-only event log plus a watch channel that
/// carries the latest sequence number. Subscribers read the shared log
/// rather than owning a queue, so every subscriber sees the same order
/// and a slow one never holds up the publisher.
pub struct ProgressBus {
    job_id: JobId,
    retention_cap: Option<usize>,
    log: Mutex<LogState>,
    notify: watch::Sender<u64>,
}

struct LogState {
    events: VecDeque<ProgressEvent>,
    next_sequence: u64,
    closed: bool,
}

impl ProgressBus {
    /// Create a bus for one job. `retention_cap` bounds the replay buffer;
    /// `None` keeps the whole log.
    pub fn new(job_id: JobId, retention_cap: Option<usize>) -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            job_id,
            retention_cap: retention_cap.map(|c| c.max(1)),
            log: Mutex::new(LogState {
                events: VecDeque::new(),
                next_sequence: 1,
                closed: false,
            }),
            notify,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an event, assigning its sequence and timestamp, and wake
    /// subscribers. Returns `None` once a terminal event has been appended.
    pub fn publish(&self, draft: EventDraft) -> Option<ProgressEvent> {
        let event = {
            let mut log = self.state();
            if log.closed {
                warn!(job_id = %self.job_id, kind = ?draft.kind, "Event after terminal event dropped");
                return None;
            }

            let event = ProgressEvent {
                kind: draft.kind,
                message: draft.message,
                timestamp: Utc::now(),
                progress_percent: draft.progress_percent,
                job_id: self.job_id.clone(),
                sequence: log.next_sequence,
                payload: draft.payload,
            };
            log.next_sequence += 1;
            log.closed = event.kind.is_terminal();
            log.events.push_back(event.clone());

            // The terminal event is always last, so trimming the front never drops it.
            if let Some(cap) = self.retention_cap {
                while log.events.len() > cap {
                    log.events.pop_front();
                }
            }
            event
        };

        self.notify.send_replace(event.sequence);
        Some(event)
    }

    /// Retained events with `sequence >= from`, starting at the earliest
    /// retained event if older ones were trimmed.
    pub fn events_from(&self, from: u64) -> Vec<ProgressEvent> {
        let log = self.state();
        log.events
            .iter()
            .filter(|e| e.sequence >= from)
            .cloned()
            .collect()
    }

    /// Retained events from `from` together with the closed flag, read
    /// under one lock.
    fn read_from(&self, from: u64) -> (VecDeque<ProgressEvent>, bool) {
        let log = self.state();
        let events = log
            .events
            .iter()
            .filter(|e| e.sequence >= from)
            .cloned()
            .collect();
        (events, log.closed)
    }

    /// All retained events.
    pub fn snapshot(&self) -> Vec<ProgressEvent> {
        self.state().events.iter().cloned().collect()
    }

    /// Sequence of the last appended event, 0 if none.
    pub fn last_sequence(&self) -> u64 {
        self.state().next_sequence - 1
    }

    /// Whether the terminal event has been appended.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Stream retained events from `from_sequence`, then live events.
    ///
    /// The stream ends after the terminal event, or at once if the log is
    /// closed and holds nothing at or after `from_sequence`. It stays pending
    /// while the job is still running.
    pub fn subscribe(self: &Arc<Self>, from_sequence: u64) -> BoxStream<'static, ProgressEvent> {
        let cursor = Cursor {
            bus: self.clone(),
            rx: self.notify.subscribe(),
            next: from_sequence.max(1),
            pending: VecDeque::new(),
            done: false,
        };

        stream::unfold(cursor, |mut c| async move {
            loop {
                if let Some(event) = c.pending.pop_front() {
                    c.next = event.sequence + 1;
                    if event.kind.is_terminal() {
                        c.done = true;
                        c.pending.clear();
                    }
                    return Some((event, c));
                }
                if c.done {
                    return None;
                }

                // Mark the current sequence seen before reading the log so a
                // publish racing with the read still wakes us.
                let _ = c.rx.borrow_and_update();
                let (pending, closed) = c.bus.read_from(c.next);
                c.pending = pending;
                if c.pending.is_empty() {
                    if closed {
                        return None;
                    }
                    if c.rx.changed().await.is_err() {
                        return None;
                    }
                }
            }
        })
        .boxed()
    }
}

struct Cursor {
    bus: Arc<ProgressBus>,
    rx: watch::Receiver<u64>,
    next: u64,
    pending: VecDeque<ProgressEvent>,
    done: bool,
}
