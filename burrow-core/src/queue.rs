// ABOUTME: Bounded FIFO command intake with a single worker enforcing per-sender cooldown
// ABOUTME: Admitted calls are handed to the sink on their own task so the worker never blocks

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::task::spawn_isolated;

/// Cooldown entries are pruned once the map grows past this many senders.
const PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("command queue is full")]
    Full,
    #[error("command queue is closed")]
    Closed,
}

/// One queued invocation.
#[derive(Debug)]
pub struct QueuedCall<T> {
    pub sender_id: i64,
    pub arrived_at: Instant,
    pub payload: T,
}

impl<T> QueuedCall<T> {
    pub fn new(sender_id: i64, payload: T) -> Self {
        Self::at(sender_id, payload, Instant::now())
    }

    pub fn at(sender_id: i64, payload: T, arrived_at: Instant) -> Self {
        Self {
            sender_id,
            arrived_at,
            payload,
        }
    }
}

/// Receives calls once the worker has decided on them.
#[async_trait]
pub trait CallSink<T>: Send + Sync + 'static {
    /// The call passed cooldown.
    async fn admit(&self, call: QueuedCall<T>);

    /// The sender is still cooling down; `remaining` is how long until the window ends.
    async fn reject(&self, call: QueuedCall<T>, remaining: Duration);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Cooling { remaining: Duration },
}

/// Last-invocation timestamps per sender. Owned by the queue worker.
#[derive(Debug)]
pub struct CooldownTracker {
    window: Duration,
    last: HashMap<i64, Instant>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decides on a call arriving at `at`. The sender's timestamp moves to `at`
    /// whether or not the call is admitted.
    pub fn check(&mut self, sender_id: i64, at: Instant) -> Admission {
        if self.last.len() > PRUNE_THRESHOLD {
            let window = self.window;
            self.last
                .retain(|_, seen| at.saturating_duration_since(*seen) < window);
        }
        match self.last.insert(sender_id, at) {
            None => Admission::Admit,
            Some(previous) => {
                let elapsed = at.saturating_duration_since(previous);
                if elapsed < self.window {
                    Admission::Cooling {
                        remaining: self.window - elapsed,
                    }
                } else {
                    Admission::Admit
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

/// Submission handle. Cheap to clone; the worker stops when every handle is dropped.
pub struct CommandQueue<T> {
    tx: mpsc::Sender<QueuedCall<T>>,
}

impl<T> Clone for CommandQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> CommandQueue<T> {
    /// Starts the worker. `capacity` is clamped to at least one.
    pub fn start(
        capacity: usize,
        cooldown: Duration,
        sink: Arc<dyn CallSink<T>>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(rx, CooldownTracker::new(cooldown), sink));
        (Self { tx }, worker)
    }

    /// Enqueues without waiting. A full queue is reported to the caller.
    pub fn submit(&self, call: QueuedCall<T>) -> Result<(), QueueError> {
        self.tx.try_send(call).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

async fn run_worker<T: Send + 'static>(
    mut rx: mpsc::Receiver<QueuedCall<T>>,
    mut cooldown: CooldownTracker,
    sink: Arc<dyn CallSink<T>>,
) {
    tracing::debug!(
        cooldown_ms = cooldown.window().as_millis() as u64,
        "command queue worker started"
    );
    while let Some(call) = rx.recv().await {
        let sender_id = call.sender_id;
        let sink = Arc::clone(&sink);
        match cooldown.check(sender_id, call.arrived_at) {
            Admission::Admit => {
                spawn_isolated("command", async move { sink.admit(call).await });
            }
            Admission::Cooling { remaining } => {
                tracing::debug!(
                    sender_id,
                    remaining_ms = remaining.as_millis() as u64,
                    "command rejected by cooldown"
                );
                crate::metrics::record_command("cooldown");
                spawn_isolated("command-cooldown", async move {
                    sink.reject(call, remaining).await
                });
            }
        }
    }
    tracing::debug!("command queue worker stopped");
}
