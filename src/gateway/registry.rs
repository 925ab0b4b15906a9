// ABOUTME: Registry of connected bots keyed by account id
// ABOUTME: A reconnect replaces the entry; the old connection's teardown leaves it alone

use burrow_core::ConcurrentRegistry;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::ApiCaller;

#[derive(Default)]
pub struct BotRegistry {
    callers: ConcurrentRegistry<i64, Arc<dyn ApiCaller>>,
    /// Most recently connected account, used when no specific bot is asked for.
    primary: AtomicI64,
}

fn same_connection(a: &Arc<dyn ApiCaller>, b: &Arc<dyn ApiCaller>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `caller`, returning the connection it replaced.
    pub fn register(&self, caller: Arc<dyn ApiCaller>) -> Option<Arc<dyn ApiCaller>> {
        let id = caller.self_id();
        let previous = self.callers.store(id, caller);
        self.primary.store(id, Ordering::Release);
        burrow_core::metrics::set_connected_bots(self.callers.len());
        previous
    }

    /// Removes `caller` only if it is still the registered connection for its id.
    pub fn deregister(&self, caller: &Arc<dyn ApiCaller>) -> bool {
        let removed = self
            .callers
            .remove_if(&caller.self_id(), |current| same_connection(current, caller))
            .is_some();
        burrow_core::metrics::set_connected_bots(self.callers.len());
        removed
    }

    pub fn get(&self, self_id: i64) -> Option<Arc<dyn ApiCaller>> {
        self.callers.load(&self_id)
    }

    /// The last bot to connect if still online, otherwise any online bot.
    pub fn primary(&self) -> Option<Arc<dyn ApiCaller>> {
        self.get(self.primary.load(Ordering::Acquire)).or_else(|| {
            let mut any = None;
            self.callers.range(|_, caller| {
                any = Some(Arc::clone(caller));
                false
            });
            any
        })
    }

    pub fn ids(&self) -> Vec<i64> {
        let mut ids = self.callers.keys();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.callers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callers.is_empty()
    }
}
