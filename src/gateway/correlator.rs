// ABOUTME: Matches API responses to outstanding requests by their echo sequence number
// ABOUTME: Each sequence resolves exactly once; a disconnect sweeps everything still pending

use burrow_core::ConcurrentRegistry;
use burrow_onebot::ApiResponse;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;

use super::CallError;

#[derive(Default)]
pub struct Correlator {
    pending: ConcurrentRegistry<u64, oneshot::Sender<ApiResponse>>,
    closed: AtomicBool,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `seq`. Fails once the connection has been swept.
    pub fn register(&self, seq: u64) -> Result<oneshot::Receiver<ApiResponse>, CallError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CallError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        self.pending.store(seq, tx);
        // lost a race with close_all
        if self.closed.load(Ordering::Acquire) {
            self.pending.load_and_delete(&seq);
            return Err(CallError::Closed);
        }
        Ok(rx)
    }

    /// Delivers a response to its waiter. Returns `false` for unmatched echoes.
    pub fn resolve(&self, response: ApiResponse) -> bool {
        let echo = response.echo;
        match self.pending.load_and_delete(&echo) {
            Some(tx) => {
                if tx.send(response).is_err() {
                    tracing::debug!(echo, "response arrived after the caller gave up");
                }
                true
            }
            None => {
                tracing::debug!(echo, "discarding response with unknown echo");
                false
            }
        }
    }

    /// Forgets `seq` after a timeout or failed write.
    pub fn cancel(&self, seq: u64) -> bool {
        self.pending.load_and_delete(&seq).is_some()
    }

    /// Drops every pending sender so waiters see [`CallError::Closed`] right away.
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        self.pending
            .keys()
            .into_iter()
            .filter(|seq| self.pending.load_and_delete(seq).is_some())
            .count()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
