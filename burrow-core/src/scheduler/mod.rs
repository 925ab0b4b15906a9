// ABOUTME: Min-heap timer engine for one-shot and repeating group actions
// ABOUTME: One loop sleeps until the earliest task, fires it and persists the updated list

mod store;
mod task;

pub use store::{MemoryTaskStore, TaskStore, TomlTaskStore};
pub use task::{
    format_action_time, format_interval, parse_action_time, parse_interval, parse_repetitions,
    ScheduleError, ScheduledTask, TaskAction, REPEAT_FOREVER, TIME_FORMAT,
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

use crate::task::spawn_isolated;

/// Carries out a fired task.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &ScheduledTask) -> Result<()>;
}

/// Outcome of one look at the heap.
#[derive(Debug, PartialEq)]
pub enum Poll {
    /// Nothing scheduled.
    Idle,
    /// The earliest task is this far away.
    Wait(Duration),
    /// A due task, as it was before this firing was applied.
    Fire(ScheduledTask),
}

#[derive(Default)]
struct State {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, u64)>>,
    tasks: BTreeMap<u64, ScheduledTask>,
    next_id: u64,
}

impl State {
    fn insert(&mut self, mut task: ScheduledTask) -> u64 {
        if task.id == 0 || self.tasks.contains_key(&task.id) {
            self.next_id += 1;
            task.id = self.next_id;
        }
        self.next_id = self.next_id.max(task.id);
        let id = task.id;
        self.heap.push(Reverse((task.next_fire, id)));
        self.tasks.insert(id, task);
        id
    }
}

pub struct Scheduler {
    state: Mutex<State>,
    wake: Notify,
    persist_lock: tokio::sync::Mutex<()>,
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn TaskExecutor>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TaskStore>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            wake: Notify::new(),
            persist_lock: tokio::sync::Mutex::new(()),
            store,
            executor,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces in-memory state with the stored list, discarding tasks that are
    /// already due or invalid. Returns how many tasks were kept.
    pub async fn restore(&self, now: DateTime<Utc>) -> Result<usize> {
        let stored = self.store.load().await?;
        let total = stored.len();
        let mut state = State::default();
        for task in stored {
            if let Err(e) = task.validate(now) {
                tracing::warn!(
                    task_id = task.id,
                    next_fire = %task.next_fire,
                    error = %e,
                    "discarding stored task"
                );
                continue;
            }
            state.insert(task);
        }
        let kept = state.tasks.len();
        *self.lock() = state;
        self.wake.notify_one();

        if kept != total {
            self.persist().await;
        }
        tracing::info!(kept, discarded = total - kept, "scheduled tasks restored");
        Ok(kept)
    }

    /// Validates and adds a task, returning its id.
    pub async fn schedule(
        &self,
        task: ScheduledTask,
        now: DateTime<Utc>,
    ) -> Result<u64, ScheduleError> {
        task.validate(now)?;
        let id = self.lock().insert(task);
        self.wake.notify_one();
        tracing::info!(task_id = id, "task scheduled");
        self.persist().await;
        Ok(id)
    }

    /// Removes a task by id. Its heap entry goes stale and is skipped later.
    pub async fn cancel(&self, id: u64) -> bool {
        let removed = self.lock().tasks.remove(&id).is_some();
        if removed {
            tracing::info!(task_id = id, "task cancelled");
            self.wake.notify_one();
            self.persist().await;
        }
        removed
    }

    pub fn get(&self, id: u64) -> Option<ScheduledTask> {
        self.lock().tasks.get(&id).cloned()
    }

    /// All live tasks ordered by id.
    pub fn list(&self) -> Vec<ScheduledTask> {
        self.lock().tasks.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pops and applies at most one due task.
    ///
    /// A fired task is rescheduled at `next_fire + interval` while it has
    /// repetitions left, otherwise removed for good.
    pub fn poll(&self, now: DateTime<Utc>) -> Poll {
        let mut guard = self.lock();
        let state = &mut *guard;
        loop {
            let Some(Reverse((at, id))) = state.heap.peek().copied() else {
                return Poll::Idle;
            };
            let live = state.tasks.get(&id).is_some_and(|t| t.next_fire == at);
            if !live {
                state.heap.pop();
                continue;
            }
            if at > now {
                return Poll::Wait((at - now).to_std().unwrap_or_default());
            }
            state.heap.pop();
            let Some(task) = state.tasks.get_mut(&id) else {
                continue;
            };
            let fired = task.clone();
            if task.advance() {
                state.heap.push(Reverse((task.next_fire, id)));
            } else {
                state.tasks.remove(&id);
            }
            return Poll::Fire(fired);
        }
    }

    /// Writes the current list. Failures are logged and in-memory state carries on.
    pub async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.list();
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::error!(error = %e, tasks = snapshot.len(), "failed to persist scheduled tasks");
        }
    }

    fn dispatch(&self, task: ScheduledTask) {
        crate::metrics::record_task_fired(task.action.as_str());
        tracing::info!(
            task_id = task.id,
            action = %task.action,
            groups = task.groups.len(),
            remaining = task.remaining,
            "firing scheduled task"
        );
        let executor = Arc::clone(&self.executor);
        spawn_isolated(format!("scheduled-task-{}", task.id), async move {
            if let Err(e) = executor.execute(&task).await {
                tracing::warn!(task_id = task.id, error = %e, "scheduled task failed");
            }
        });
    }

    /// Runs forever. Inserting or cancelling a task wakes the loop early.
    pub async fn run(self: Arc<Self>) {
        tracing::debug!("scheduler loop started");
        loop {
            match self.poll(Utc::now()) {
                Poll::Fire(task) => {
                    self.dispatch(task);
                    self.persist().await;
                }
                Poll::Wait(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.wake.notified() => {}
                    }
                }
                Poll::Idle => self.wake.notified().await,
            }
        }
    }
}
