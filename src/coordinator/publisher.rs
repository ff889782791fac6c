//! Commit Publisher
//!
//! Commits for one board carry a store-assigned sequence number. Writers on
//! different tasks finish in any order, so the publisher buffers out-of-order
//! events and releases them in sequence order. Each board's cursor is seeded
//! from the store's commit counter before the first local write, so the
//! first commits after startup are ordered too. A gap that never fills (the
//! writer crashed after taking its number) is skipped after a timeout.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::{BoardEvent, BoardId};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct BoardSequence {
    /// Next sequence number to release; unset until the first event
    next: Option<i64>,
    pending: BTreeMap<i64, (Instant, BoardEvent)>,
}

impl BoardSequence {
    fn accept(&mut self, seq: i64, event: BoardEvent, now: Instant, gap: Duration) -> Vec<BoardEvent> {
        let next = *self.next.get_or_insert(seq);
        if seq < next {
            warn!(board = %event.board_id(), seq, next, "late commit event released out of order");
            return vec![event];
        }
        self.pending.insert(seq, (now, event));
        self.drain(now, gap)
    }

    fn drain(&mut self, now: Instant, gap: Duration) -> Vec<BoardEvent> {
        let mut ready = Vec::new();
        while let Some(next) = self.next {
            if let Some((_, event)) = self.pending.remove(&next) {
                ready.push(event);
                self.next = Some(next + 1);
                continue;
            }

            let Some((&first, (since, _))) = self.pending.iter().next() else {
                break;
            };
            if now.saturating_duration_since(*since) < gap {
                break;
            }
            warn!(missing_from = next, resume_at = first, "commit sequence gap timed out");
            self.next = Some(first);
        }
        ready
    }
}

/// Fans committed events out to every subscriber in commit order.
pub struct EventPublisher {
    tx: broadcast::Sender<BoardEvent>,
    boards: DashMap<BoardId, BoardSequence>,
    gap_timeout: Duration,
}

impl EventPublisher {
    pub fn new(gap_timeout: Duration) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            boards: DashMap::new(),
            gap_timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.tx.subscribe()
    }

    /// Whether a board already has a release cursor
    pub fn is_tracking(&self, board_id: &BoardId) -> bool {
        self.boards
            .get(board_id)
            .is_some_and(|sequence| sequence.next.is_some())
    }

    /// Start releasing a board's events at `next`. A cursor that is already
    /// set is left alone.
    pub fn seed(&self, board_id: &BoardId, next: i64) {
        let mut sequence = self.boards.entry(board_id.clone()).or_default();
        if sequence.next.is_none() {
            debug!(board = %board_id, next, "commit sequence seeded");
            sequence.next = Some(next);
        }
    }

    /// Drop a deleted board's cursor and anything buffered for it.
    pub fn forget(&self, board_id: &BoardId) {
        self.boards.remove(board_id);
    }

    /// Publish a committed event. Events without a sequence number go out
    /// immediately.
    pub fn publish(&self, event: BoardEvent) {
        self.publish_at(event, Instant::now());
    }

    fn publish_at(&self, event: BoardEvent, now: Instant) {
        let Some(seq) = event.seq() else {
            self.send(event);
            return;
        };

        // Send while holding the entry so two publishers on one board cannot
        // interleave their batches.
        let mut sequence = self.boards.entry(event.board_id().clone()).or_default();
        for ready in sequence.accept(seq, event, now, self.gap_timeout) {
            self.send(ready);
        }
    }

    /// Release events stuck behind gaps older than the timeout.
    pub fn flush_expired(&self) -> usize {
        self.flush_expired_at(Instant::now())
    }

    fn flush_expired_at(&self, now: Instant) -> usize {
        let mut released = 0;
        for mut entry in self.boards.iter_mut() {
            for ready in entry.drain(now, self.gap_timeout) {
                self.send(ready);
                released += 1;
            }
        }
        released
    }

    /// Events buffered behind a gap, across all boards
    pub fn pending(&self) -> usize {
        self.boards.iter().map(|entry| entry.pending.len()).sum()
    }

    fn send(&self, event: BoardEvent) {
        // No receivers is fine: nobody is connected yet.
        if self.tx.send(event).is_err() {
            debug!("no event subscribers");
        }
    }
}
