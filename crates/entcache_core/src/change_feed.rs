//! Change feed for observing cache activity.
//!
//! Every tracked write, state transition, attach, detach, merge and key
//! remap is published as a [`ChangeEvent`]. Subscribers get their own
//! channel. The feed also retains the most recent events so a late
//! observer can catch up by sequence number.
//!
//! # Usage
//!
//! ```rust,ignore
//! let rx = cache.subscribe();
//! cache.set_value(order, "Freight", 12.5.into())?;
//! while let Ok(event) = rx.try_recv() {
//!     println!("{:?}", event.kind);
//! }
//! ```

use crate::config::CacheConfig;
use crate::entity::{EntityKey, EntityState};
use crate::types::EntityHandle;
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};

/// Where merged values came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSource {
    /// A query result.
    Query,
    /// A save response.
    Save,
}

/// What happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    /// An entity started being tracked.
    Attached {
        /// The entity.
        entity: EntityHandle,
        /// Its key.
        key: EntityKey,
        /// Its initial state.
        state: EntityState,
    },
    /// A data property was written.
    PropertyChanged {
        /// The entity.
        entity: EntityHandle,
        /// Property name.
        property: String,
        /// Value before the write.
        old_value: Value,
        /// Value after the write.
        new_value: Value,
    },
    /// The entity state changed.
    StateChanged {
        /// The entity.
        entity: EntityHandle,
        /// Previous state.
        from: EntityState,
        /// New state.
        to: EntityState,
    },
    /// Server values were merged into an existing entity.
    Merged {
        /// The entity.
        entity: EntityHandle,
        /// Origin of the values.
        source: MergeSource,
    },
    /// Pending changes were accepted as the new clean state.
    Accepted {
        /// The entity.
        entity: EntityHandle,
    },
    /// Pending changes were rolled back.
    Rejected {
        /// The entity.
        entity: EntityHandle,
    },
    /// A temporary key was replaced by a real one.
    KeyChanged {
        /// The entity.
        entity: EntityHandle,
        /// Key before remapping.
        old_key: EntityKey,
        /// Key after remapping.
        new_key: EntityKey,
    },
    /// An entity stopped being tracked.
    Detached {
        /// The former handle.
        entity: EntityHandle,
        /// Its last key.
        key: EntityKey,
    },
    /// The whole cache was emptied.
    Cleared,
    /// The cache went from clean to dirty or back.
    HasChangesChanged {
        /// New value of `has_changes()`.
        has_changes: bool,
    },
}

impl ChangeKind {
    /// The entity the event is about, if any.
    pub fn entity(&self) -> Option<EntityHandle> {
        match self {
            ChangeKind::Attached { entity, .. }
            | ChangeKind::PropertyChanged { entity, .. }
            | ChangeKind::StateChanged { entity, .. }
            | ChangeKind::Merged { entity, .. }
            | ChangeKind::Accepted { entity }
            | ChangeKind::Rejected { entity }
            | ChangeKind::KeyChanged { entity, .. }
            | ChangeKind::Detached { entity, .. } => Some(*entity),
            ChangeKind::Cleared | ChangeKind::HasChangesChanged { .. } => None,
        }
    }
}

/// A single change event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Position in the feed, starting at 1.
    pub sequence: u64,
    /// What happened.
    pub kind: ChangeKind,
}

/// Distributes change events to subscribers.
///
/// Events are delivered in emission order. A subscriber whose receiver was
/// dropped is forgotten on the next emit.
pub struct ChangeFeed {
    inner: Mutex<FeedState>,
}

struct FeedState {
    listeners: Vec<Sender<ChangeEvent>>,
    recent: VecDeque<ChangeEvent>,
    capacity: usize,
    last_sequence: u64,
}

impl ChangeFeed {
    /// Creates a feed retaining up to `capacity` past events.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(FeedState {
                listeners: Vec::new(),
                recent: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                last_sequence: 0,
            }),
        }
    }

    /// Returns a receiver for every event emitted from now on.
    ///
    /// Undelivered events queue up in the channel until the receiver is
    /// drained or dropped.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (sender, receiver) = mpsc::channel();
        self.inner.lock().listeners.push(sender);
        receiver
    }

    /// Publishes an event and returns its sequence number.
    pub fn emit(&self, kind: ChangeKind) -> u64 {
        let mut state = self.inner.lock();
        state.last_sequence += 1;
        let event = ChangeEvent {
            sequence: state.last_sequence,
            kind,
        };

        state
            .listeners
            .retain(|listener| listener.send(event.clone()).is_ok());
        if state.capacity > 0 {
            if state.recent.len() == state.capacity {
                state.recent.pop_front();
            }
            state.recent.push_back(event);
        }
        state.last_sequence
    }

    /// Retained events after `sequence`, oldest first, at most `limit` of them.
    pub fn events_after(&self, sequence: u64, limit: usize) -> Vec<ChangeEvent> {
        self.inner
            .lock()
            .recent
            .iter()
            .skip_while(|event| event.sequence <= sequence)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Sequence number of the most recent event, or 0 before the first.
    pub fn last_sequence(&self) -> u64 {
        self.inner.lock().last_sequence
    }

    /// Number of live subscribers as of the last emit.
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Number of retained events.
    pub fn retained(&self) -> usize {
        self.inner.lock().recent.len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::bounded(CacheConfig::default().max_event_history)
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ChangeFeed")
            .field("listeners", &state.listeners.len())
            .field("retained", &state.recent.len())
            .field("last_sequence", &state.last_sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn subscriber_sees_later_events_only() {
        let feed = ChangeFeed::default();
        feed.emit(ChangeKind::Cleared);
        let rx = feed.subscribe();

        let seq = feed.emit(ChangeKind::HasChangesChanged { has_changes: true });
        assert_eq!(seq, 2);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.sequence, 2);
        assert_eq!(event.kind, ChangeKind::HasChangesChanged { has_changes: true });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn every_subscriber_gets_a_copy() {
        let feed = ChangeFeed::default();
        let receivers: Vec<_> = (0..3).map(|_| feed.subscribe()).collect();

        feed.emit(ChangeKind::Cleared);
        for rx in &receivers {
            assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Cleared);
        }
    }

    #[test]
    fn dropped_receivers_are_forgotten() {
        let feed = ChangeFeed::default();
        let kept = feed.subscribe();
        drop(feed.subscribe());
        assert_eq!(feed.listener_count(), 2);

        feed.emit(ChangeKind::Cleared);
        assert_eq!(feed.listener_count(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn catch_up_by_sequence() {
        let feed = ChangeFeed::default();
        for _ in 0..5 {
            feed.emit(ChangeKind::Cleared);
        }

        let sequences: Vec<u64> = feed
            .events_after(2, 10)
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(sequences, vec![3, 4, 5]);
        assert_eq!(feed.events_after(0, 2).len(), 2);
        assert!(feed.events_after(5, 10).is_empty());
    }

    #[test]
    fn retention_keeps_the_newest() {
        let feed = ChangeFeed::bounded(3);
        for _ in 0..7 {
            feed.emit(ChangeKind::Cleared);
        }

        assert_eq!(feed.retained(), 3);
        assert_eq!(feed.events_after(0, 10)[0].sequence, 5);
        assert_eq!(feed.last_sequence(), 7);
    }

    #[test]
    fn zero_capacity_still_delivers() {
        let feed = ChangeFeed::bounded(0);
        let rx = feed.subscribe();
        feed.emit(ChangeKind::Cleared);

        assert_eq!(feed.retained(), 0);
        assert_eq!(rx.try_recv().unwrap().sequence, 1);
    }

    #[test]
    fn entity_accessor() {
        let kind = ChangeKind::Accepted {
            entity: EntityHandle::new(4),
        };
        assert_eq!(kind.entity(), Some(EntityHandle::new(4)));
        assert_eq!(ChangeKind::Cleared.entity(), None);
    }

    #[test]
    fn events_cross_threads() {
        let feed = Arc::new(ChangeFeed::default());
        let rx = feed.subscribe();

        let emitter = Arc::clone(&feed);
        let worker = thread::spawn(move || {
            emitter.emit(ChangeKind::HasChangesChanged { has_changes: false });
        });

        let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.kind, ChangeKind::HasChangesChanged { has_changes: false });
        worker.join().unwrap();
    }
}
