//! Per-run ordered event broadcaster.
//!
//! Each run gets its own channel: a sequence counter, the retained history
//! (for replay), and a bounded `tokio::sync::broadcast` sender. Sequence
//! assignment, history append, and fan-out happen under one short lock, so
//! every subscriber sees a run's events in strictly increasing order and a
//! subscription taken under the same lock never misses or repeats an event.
//!
//! Publishing never waits on subscribers. A subscriber that falls more than
//! the buffer capacity behind is disconnected with a `Lagged` item.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use dashmap::DashMap;
use flowrun_types::event::{RunEvent, RunEventKind};
use futures_util::Stream;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

/// Default per-run buffer (and therefore per-subscriber lag window).
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// Terminal error item on an event stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("subscriber for run {run_id} fell behind by {skipped} events and was disconnected")]
    Lagged { run_id: Uuid, skipped: u64 },
}

/// Stream of a run's events. Ends after the run's terminal event.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RunEvent, SubscriptionError>> + Send>>;

struct RunChannel {
    next_sequence: u64,
    history: Vec<RunEvent>,
    /// Dropped once the terminal event is published, which closes live streams.
    sender: Option<broadcast::Sender<RunEvent>>,
}

/// Distributes `RunEvent`s to subscribers, per run.
///
/// Cloning shares the underlying channels.
#[derive(Clone)]
pub struct EventBroadcaster {
    channels: Arc<DashMap<Uuid, Arc<Mutex<RunChannel>>>>,
    capacity: usize,
}

fn lock(channel: &Mutex<RunChannel>) -> MutexGuard<'_, RunChannel> {
    channel.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Open the channel for a run. Opening an existing run is a no-op.
    pub fn open(&self, run_id: Uuid) {
        self.channels.entry(run_id).or_insert_with(|| {
            let (sender, _) = broadcast::channel(self.capacity);
            Arc::new(Mutex::new(RunChannel {
                next_sequence: 1,
                history: Vec::new(),
                sender: Some(sender),
            }))
        });
    }

    fn channel(&self, run_id: Uuid) -> Option<Arc<Mutex<RunChannel>>> {
        self.channels.get(&run_id).map(|c| Arc::clone(c.value()))
    }

    /// Append an event to the run's stream and fan it out.
    ///
    /// Opens the run's channel if needed. Returns the published event, or
    /// `None` if the run's stream is already closed by a terminal event.
    pub fn publish(&self, run_id: Uuid, kind: RunEventKind) -> Option<RunEvent> {
        self.open(run_id);
        let channel = self.channel(run_id)?;
        let mut channel = lock(&channel);

        let Some(sender) = channel.sender.as_ref() else {
            tracing::warn!(
                run_id = %run_id,
                kind = kind.kind_name(),
                "dropping event published after the run's terminal event"
            );
            return None;
        };

        let terminal = kind.is_terminal();
        let event = RunEvent {
            run_id,
            sequence: channel.next_sequence,
            emitted_at: Utc::now(),
            kind,
        };
        // No subscribers is fine; the event is retained for replay.
        let _ = sender.send(event.clone());

        channel.next_sequence += 1;
        channel.history.push(event.clone());
        if terminal {
            channel.sender = None;
        }
        Some(event)
    }

    /// Subscribe to a run's events.
    ///
    /// With `replay_from: None` the stream starts at the current position.
    /// With `Some(n)`, retained events with `sequence >= n` come first, then
    /// live events, with no gap or duplicate between the two. Returns `None`
    /// for a run this broadcaster has never seen.
    pub fn subscribe(&self, run_id: Uuid, replay_from: Option<u64>) -> Option<EventStream> {
        let channel = self.channel(run_id)?;
        let (backlog, receiver) = {
            let channel = lock(&channel);
            let backlog: Vec<RunEvent> = match replay_from {
                Some(from) => channel
                    .history
                    .iter()
                    .filter(|e| e.sequence >= from)
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };
            let receiver = channel.sender.as_ref().map(broadcast::Sender::subscribe);
            (backlog, receiver)
        };

        let stream = async_stream::stream! {
            let mut last_sequence = 0u64;
            for event in backlog {
                last_sequence = event.sequence;
                let terminal = event.kind.is_terminal();
                yield Ok(event);
                if terminal {
                    return;
                }
            }

            let Some(mut receiver) = receiver else {
                return;
            };
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if event.sequence <= last_sequence {
                            continue;
                        }
                        last_sequence = event.sequence;
                        let terminal = event.kind.is_terminal();
                        yield Ok(event);
                        if terminal {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(run_id = %run_id, skipped, "event subscriber lagged; disconnecting");
                        yield Err(SubscriptionError::Lagged { run_id, skipped });
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };

        Some(Box::pin(stream))
    }

    /// All retained events for a run, in sequence order.
    pub fn history(&self, run_id: Uuid) -> Vec<RunEvent> {
        match self.channel(run_id) {
            Some(channel) => {
                let channel = lock(&channel);
                channel.history.clone()
            }
            None => Vec::new(),
        }
    }

    /// Drop a run's channel and history.
    pub fn forget(&self, run_id: Uuid) -> bool {
        self.channels.remove(&run_id).is_some()
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("runs", &self.channels.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
