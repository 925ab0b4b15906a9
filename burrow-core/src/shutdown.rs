// ABOUTME: Ordered shutdown hooks run once when the process is asked to stop
// ABOUTME: Each hook is isolated so one panicking hook cannot block the rest

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct ShutdownHooks {
    hooks: Mutex<Vec<(String, Hook)>>,
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, hook: impl FnOnce() + Send + 'static) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.into(), Box::new(hook)));
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs and clears all hooks in registration order. Returns how many panicked.
    pub fn run_all(&self) -> usize {
        let hooks = std::mem::take(&mut *self.hooks.lock().unwrap_or_else(PoisonError::into_inner));
        let mut failed = 0;
        for (name, hook) in hooks {
            tracing::debug!(hook = %name, "running shutdown hook");
            if let Err(panic) = catch_unwind(AssertUnwindSafe(hook)) {
                failed += 1;
                tracing::error!(
                    hook = %name,
                    panic = %crate::task::panic_message(panic.as_ref()),
                    "shutdown hook panicked"
                );
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_panicking_hook_does_not_block_others() {
        let hooks = ShutdownHooks::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&ran);
        hooks.register("first", move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        hooks.register("bad", || panic!("hook failure"));
        let r = Arc::clone(&ran);
        hooks.register("last", move || {
            r.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(hooks.run_all(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 2);
        assert!(hooks.is_empty());
    }
}
