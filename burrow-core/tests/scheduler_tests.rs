// ABOUTME: Tests for the scheduler heap, repetition rules, persistence and run loop
// ABOUTME: Uses explicit clock values for firing rules and real time for the loop

use anyhow::Result;
use async_trait::async_trait;
use burrow_core::scheduler::{
    parse_action_time, MemoryTaskStore, Poll, ScheduleError, ScheduledTask, Scheduler,
    TaskAction, TaskExecutor, TaskStore, TomlTaskStore,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

struct RecordingExecutor {
    tx: mpsc::UnboundedSender<ScheduledTask>,
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    async fn execute(&self, task: &ScheduledTask) -> Result<()> {
        let _ = self.tx.send(task.clone());
        Ok(())
    }
}

fn scheduler_with_store(
    store: Arc<MemoryTaskStore>,
) -> (Arc<Scheduler>, mpsc::UnboundedReceiver<ScheduledTask>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = Scheduler::new(store, Arc::new(RecordingExecutor { tx }));
    (Arc::new(scheduler), rx)
}

fn base_time() -> DateTime<Utc> {
    parse_action_time("2030-06-01 12:00:00", chrono_tz::UTC).unwrap()
}

fn secs(n: i64) -> ChronoDuration {
    ChronoDuration::seconds(n)
}

fn fired_at(poll: Poll) -> DateTime<Utc> {
    match poll {
        Poll::Fire(task) => task.next_fire,
        other => panic!("expected a firing, got {other:?}"),
    }
}

// ============================================================================
// Firing rules
// ============================================================================

#[tokio::test]
async fn test_one_shot_fires_once_then_absent() {
    let store = Arc::new(MemoryTaskStore::new());
    let (scheduler, _rx) = scheduler_with_store(Arc::clone(&store));
    let t = base_time();
    let now = t - secs(60);

    let id = scheduler
        .schedule(
            ScheduledTask::new(t, TaskAction::Broadcast, vec![100]).with_payload("hello"),
            now,
        )
        .await
        .unwrap();

    assert!(matches!(scheduler.poll(now), Poll::Wait(d) if d == Duration::from_secs(60)));
    assert_eq!(fired_at(scheduler.poll(t)), t);
    assert!(scheduler.get(id).is_none());
    assert_eq!(scheduler.poll(t + secs(3600)), Poll::Idle);

    scheduler.persist().await;
    assert!(store.snapshot().is_empty());
}

#[tokio::test]
async fn test_infinite_task_fires_every_interval() {
    let store = Arc::new(MemoryTaskStore::new());
    let (scheduler, _rx) = scheduler_with_store(Arc::clone(&store));
    let t = base_time();

    let id = scheduler
        .schedule(
            ScheduledTask::new(t, TaskAction::Broadcast, vec![1])
                .repeating(-1, Duration::from_secs(30)),
            t - secs(1),
        )
        .await
        .unwrap();

    for k in 0..4 {
        let due = t + secs(30 * k);
        assert!(matches!(scheduler.poll(due - secs(1)), Poll::Wait(_)));
        assert_eq!(fired_at(scheduler.poll(due)), due);

        scheduler.persist().await;
        let persisted = store.snapshot();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].id, id);
        assert_eq!(persisted[0].next_fire, due + secs(30));
        assert_eq!(persisted[0].remaining, -1);
    }
}

#[tokio::test]
async fn test_counted_repetitions_run_out() {
    let (scheduler, _rx) = scheduler_with_store(Arc::new(MemoryTaskStore::new()));
    let t = base_time();
    scheduler
        .schedule(
            ScheduledTask::new(t, TaskAction::BanGroup, vec![1])
                .repeating(3, Duration::from_secs(10)),
            t,
        )
        .await
        .unwrap();

    let far = t + secs(3600);
    let mut fired = 0;
    while let Poll::Fire(_) = scheduler.poll(far) {
        fired += 1;
    }
    assert_eq!(fired, 3);
    assert!(scheduler.is_empty());
}

#[tokio::test]
async fn test_earliest_fires_first() {
    let (scheduler, _rx) = scheduler_with_store(Arc::new(MemoryTaskStore::new()));
    let t = base_time();
    let now = t - secs(100);
    for offset in [50, 10, 30] {
        scheduler
            .schedule(
                ScheduledTask::new(t + secs(offset), TaskAction::Broadcast, vec![1]),
                now,
            )
            .await
            .unwrap();
    }

    let later = t + secs(100);
    assert_eq!(fired_at(scheduler.poll(later)), t + secs(10));
    assert_eq!(fired_at(scheduler.poll(later)), t + secs(30));
    assert_eq!(fired_at(scheduler.poll(later)), t + secs(50));
}

#[tokio::test]
async fn test_cancel_by_id() {
    let store = Arc::new(MemoryTaskStore::new());
    let (scheduler, _rx) = scheduler_with_store(Arc::clone(&store));
    let t = base_time();
    let keep = scheduler
        .schedule(ScheduledTask::new(t + secs(5), TaskAction::Broadcast, vec![1]), t)
        .await
        .unwrap();
    let drop = scheduler
        .schedule(ScheduledTask::new(t + secs(1), TaskAction::Broadcast, vec![2]), t)
        .await
        .unwrap();

    assert!(scheduler.cancel(drop).await);
    assert!(!scheduler.cancel(drop).await);

    let ids: Vec<u64> = store.snapshot().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![keep]);
    match scheduler.poll(t + secs(10)) {
        Poll::Fire(task) => assert_eq!(task.id, keep),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_schedule_rejects_invalid_tasks() {
    let (scheduler, _rx) = scheduler_with_store(Arc::new(MemoryTaskStore::new()));
    let t = base_time();

    let past = ScheduledTask::new(t - secs(1), TaskAction::Broadcast, vec![1]);
    assert_eq!(scheduler.schedule(past, t).await, Err(ScheduleError::InPast));

    let no_groups = ScheduledTask::new(t, TaskAction::Broadcast, vec![]);
    assert_eq!(
        scheduler.schedule(no_groups, t).await,
        Err(ScheduleError::NoTargets)
    );

    let zero = ScheduledTask::new(t, TaskAction::Broadcast, vec![1]).repeating(-1, Duration::ZERO);
    assert_eq!(
        scheduler.schedule(zero, t).await,
        Err(ScheduleError::ZeroInterval)
    );
    assert!(scheduler.is_empty());
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_restore_discards_past_tasks_and_saves() {
    let t = base_time();
    let stored = vec![
        ScheduledTask::new(t - secs(10), TaskAction::Broadcast, vec![1]),
        ScheduledTask::new(t + secs(10), TaskAction::UnbanGroup, vec![2]),
    ];
    let store = Arc::new(MemoryTaskStore::with_tasks(stored));
    let (scheduler, _rx) = scheduler_with_store(Arc::clone(&store));

    assert_eq!(scheduler.restore(t).await.unwrap(), 1);
    assert_eq!(store.saves(), 1);
    let saved = store.snapshot();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].action, TaskAction::UnbanGroup);
    assert_ne!(saved[0].id, 0);
}

#[tokio::test]
async fn test_toml_store_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = TomlTaskStore::new(dir.path().join("nested").join("scheduler.toml"));
    assert!(store.load().await.unwrap().is_empty());

    let mut task = ScheduledTask::new(base_time(), TaskAction::BanGroup, vec![10, 20])
        .repeating(-1, Duration::from_secs(5400))
        .with_payload("quiet hours, see you tomorrow");
    task.id = 3;
    store.save(std::slice::from_ref(&task)).await.unwrap();

    let content = std::fs::read_to_string(store.path()).unwrap();
    assert!(content.contains("interval = \"1h30m\""));
    assert!(content.contains("action = \"ban_group\""));
    assert_eq!(store.load().await.unwrap(), vec![task]);
}

// ============================================================================
// Run loop
// ============================================================================

#[tokio::test]
async fn test_run_loop_fires_due_task() {
    let store = Arc::new(MemoryTaskStore::new());
    let (scheduler, mut rx) = scheduler_with_store(Arc::clone(&store));
    let handle = tokio::spawn(Arc::clone(&scheduler).run());

    let now = Utc::now();
    scheduler
        .schedule(
            ScheduledTask::new(now + ChronoDuration::milliseconds(50), TaskAction::Broadcast, vec![7])
                .with_payload("tick"),
            now,
        )
        .await
        .unwrap();

    let fired = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("task should fire")
        .unwrap();
    assert_eq!(fired.payload, "tick");
    assert_eq!(fired.groups, vec![7]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(scheduler.is_empty());
    handle.abort();
}

#[tokio::test]
async fn test_insert_preempts_long_wait() {
    let (scheduler, mut rx) = scheduler_with_store(Arc::new(MemoryTaskStore::new()));
    let now = Utc::now();
    scheduler
        .schedule(
            ScheduledTask::new(now + secs(3600), TaskAction::Broadcast, vec![1]).with_payload("later"),
            now,
        )
        .await
        .unwrap();
    let handle = tokio::spawn(Arc::clone(&scheduler).run());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let now = Utc::now();
    scheduler
        .schedule(
            ScheduledTask::new(now + ChronoDuration::milliseconds(30), TaskAction::Broadcast, vec![1])
                .with_payload("sooner"),
            now,
        )
        .await
        .unwrap();

    let fired = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("new earlier task should preempt the hour-long wait")
        .unwrap();
    assert_eq!(fired.payload, "sooner");
    assert_eq!(scheduler.len(), 1);
    handle.abort();
}
