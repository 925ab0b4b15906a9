// ABOUTME: Built-in module that runs timed group actions and manages them from chat
// ABOUTME: Wires the core scheduler to a task store, a bot-backed executor and admin commands

use anyhow::{Context, Result};
use async_trait::async_trait;
use burrow_core::scheduler::{
    format_action_time, format_interval, parse_action_time, parse_interval, parse_repetitions,
    Scheduler, ScheduledTask, TaskAction, TaskExecutor, TaskStore, TomlTaskStore, REPEAT_FOREVER,
};
use burrow_core::task::spawn_isolated;
use burrow_core::Permission;
use burrow_onebot::{ApiRequest, Message};
use chrono::Utc;
use chrono_tz::Tz;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

use crate::config::TaskBackend;
use crate::context::{send_to, Ctx, Target};
use crate::gateway::{ApiCaller, BotRegistry};
use crate::module::{Module, ModuleContext, Registrar};
use crate::store::Store;

pub const MODULE_NAME: &str = "schedule";

/// Record kind used when tasks live in the persistence store.
pub const RECORD_KIND: &str = "scheduled_task";

const REG_TASK_USAGE: &str =
    "Usage: RegTask \"YYYY-MM-DD HH:MM:SS\" <times> <interval> <ban|unban|broadcast> [text]";

/// Task list kept as records in the persistence store, one per task.
pub struct RecordTaskStore {
    store: Store,
}

impl RecordTaskStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskStore for RecordTaskStore {
    async fn load(&self) -> Result<Vec<ScheduledTask>> {
        let records = self.store.list(RECORD_KIND).await?;
        let mut tasks = Vec::with_capacity(records.len());
        for record in records {
            match serde_json::from_value::<ScheduledTask>(record.body) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    tracing::warn!(key = %record.key, error = %e, "Skipping unreadable task record")
                }
            }
        }
        Ok(tasks)
    }

    async fn save(&self, tasks: &[ScheduledTask]) -> Result<()> {
        let records: Vec<(String, &ScheduledTask)> = tasks
            .iter()
            .map(|task| (format!("{:020}", task.id), task))
            .collect();
        self.store.replace_kind(RECORD_KIND, &records).await?;
        Ok(())
    }
}

/// Carries fired tasks out through the primary connected bot.
pub struct GroupActionExecutor {
    bots: Arc<BotRegistry>,
}

impl GroupActionExecutor {
    pub fn new(bots: Arc<BotRegistry>) -> Self {
        Self { bots }
    }

    async fn run_for_group(
        caller: &dyn ApiCaller,
        task: &ScheduledTask,
        group_id: i64,
    ) -> Result<()> {
        let target = Target::Group(group_id);
        match task.action {
            TaskAction::Broadcast => {
                send_to(caller, &target, Message::from(task.payload.as_str())).await?;
            }
            TaskAction::BanGroup | TaskAction::UnbanGroup => {
                if !task.payload.is_empty() {
                    send_to(caller, &target, Message::from(task.payload.as_str())).await?;
                }
                let enable = task.action == TaskAction::BanGroup;
                let response = caller
                    .call_api(ApiRequest::set_group_whole_ban(group_id, enable))
                    .await?;
                if !response.is_ok() {
                    anyhow::bail!(
                        "set_group_whole_ban rejected with retcode {}",
                        response.retcode
                    );
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaskExecutor for GroupActionExecutor {
    async fn execute(&self, task: &ScheduledTask) -> Result<()> {
        let caller = self
            .bots
            .primary()
            .context("no bot is connected to carry out the task")?;
        let mut failed = 0;
        for &group_id in &task.groups {
            if let Err(e) = Self::run_for_group(caller.as_ref(), task, group_id).await {
                failed += 1;
                tracing::warn!(task_id = task.id, group_id, error = %e, "Scheduled action failed");
            }
        }
        if failed > 0 {
            anyhow::bail!("{} of {} groups failed", failed, task.groups.len());
        }
        Ok(())
    }
}

pub struct ScheduleModule {
    scheduler: Arc<Scheduler>,
    tz: Tz,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduleModule {
    pub fn new(ctx: &ModuleContext) -> Result<Self> {
        let store: Arc<dyn TaskStore> = match ctx.config.scheduler.backend {
            TaskBackend::File => Arc::new(TomlTaskStore::new(
                ctx.data_dir.join(&ctx.config.scheduler.file),
            )),
            TaskBackend::Database => Arc::new(RecordTaskStore::new(ctx.store.clone())),
        };
        let executor = Arc::new(GroupActionExecutor::new(Arc::clone(&ctx.bots)));
        Ok(Self::with_scheduler(
            Arc::new(Scheduler::new(store, executor)),
            ctx.tz,
        ))
    }

    pub fn with_scheduler(scheduler: Arc<Scheduler>, tz: Tz) -> Self {
        Self {
            scheduler,
            tz,
            runner: Mutex::new(None),
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}

#[async_trait]
impl Module for ScheduleModule {
    fn name(&self) -> &'static str {
        MODULE_NAME
    }

    async fn init(&self, registrar: &mut Registrar) -> Result<()> {
        self.scheduler
            .restore(Utc::now())
            .await
            .context("Failed to restore scheduled tasks")?;

        let runner = spawn_isolated("scheduler", Arc::clone(&self.scheduler).run());
        let previous = self
            .runner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(runner);
        if let Some(previous) = previous {
            previous.abort();
        }

        let (scheduler, tz) = (Arc::clone(&self.scheduler), self.tz);
        registrar.command(
            "RegTask",
            Permission::GroupAdmin,
            move |ctx: Arc<Ctx>, args: Vec<String>| {
                let scheduler = Arc::clone(&scheduler);
                async move { reply(&ctx, reg_task(&scheduler, tz, &ctx, args).await).await }
            },
        );

        let scheduler = Arc::clone(&self.scheduler);
        registrar.command(
            "DelTask",
            Permission::GroupAdmin,
            move |ctx: Arc<Ctx>, args: Vec<String>| {
                let scheduler = Arc::clone(&scheduler);
                async move { reply(&ctx, del_task(&scheduler, &args).await).await }
            },
        );

        let (scheduler, tz) = (Arc::clone(&self.scheduler), self.tz);
        registrar.command(
            "ListTasks",
            Permission::GroupAdmin,
            move |ctx: Arc<Ctx>, _args: Vec<String>| {
                let text = list_tasks(&scheduler, tz);
                async move { reply(&ctx, text).await }
            },
        );
        Ok(())
    }

    fn stop(&self) {
        if let Some(runner) = self
            .runner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            runner.abort();
        }
    }

    async fn reload(&self) -> Result<()> {
        self.scheduler.restore(Utc::now()).await?;
        Ok(())
    }
}

async fn reply(ctx: &Ctx, text: String) {
    if let Err(e) = ctx.send(text).await {
        tracing::warn!(error = %e, "Failed to answer schedule command");
    }
}

/// `RegTask <time> <times> <interval> <type> [text...]`. The time may be one
/// quoted argument or a date and a time given separately.
pub async fn reg_task(scheduler: &Scheduler, tz: Tz, ctx: &Ctx, args: Vec<String>) -> String {
    let group_id = ctx.event().group_id;
    if group_id == 0 {
        return "RegTask only works in a group.".to_string();
    }
    match build_task(&args, tz, group_id) {
        Ok(task) => {
            let summary = describe(&task, tz);
            match scheduler.schedule(task, Utc::now()).await {
                Ok(id) => format!("Task #{} added: {}", id, summary),
                Err(e) => format!("Could not add task: {}", e),
            }
        }
        Err(message) => message,
    }
}

fn build_task(args: &[String], tz: Tz, group_id: i64) -> Result<ScheduledTask, String> {
    let (time, rest) = match args {
        [date, clock, rest @ ..]
            if parse_action_time(date, tz).is_err()
                && parse_action_time(&format!("{} {}", date, clock), tz).is_ok() =>
        {
            (format!("{} {}", date, clock), rest)
        }
        [time, rest @ ..] => (time.clone(), rest),
        [] => return Err(REG_TASK_USAGE.to_string()),
    };
    let [times, interval, action, payload @ ..] = rest else {
        return Err(REG_TASK_USAGE.to_string());
    };

    let next_fire = parse_action_time(&time, tz).map_err(|e| e.to_string())?;
    let remaining = parse_repetitions(times).map_err(|e| e.to_string())?;
    let interval = parse_interval(interval).map_err(|e| e.to_string())?;
    let action = action
        .parse::<TaskAction>()
        .map_err(|e| e.to_string())?;

    Ok(ScheduledTask::new(next_fire, action, vec![group_id])
        .repeating(remaining, interval)
        .with_payload(payload.join(" ")))
}

pub async fn del_task(scheduler: &Scheduler, args: &[String]) -> String {
    let Some(id) = args.first().and_then(|s| s.trim_start_matches('#').parse::<u64>().ok()) else {
        return "Usage: DelTask <id>".to_string();
    };
    if scheduler.cancel(id).await {
        format!("Task #{} removed.", id)
    } else {
        format!("No task #{}.", id)
    }
}

pub fn list_tasks(scheduler: &Scheduler, tz: Tz) -> String {
    let tasks = scheduler.list();
    if tasks.is_empty() {
        return "No scheduled tasks.".to_string();
    }
    let mut lines = Vec::with_capacity(tasks.len() + 1);
    lines.push(format!("{} scheduled task(s):", tasks.len()));
    for task in &tasks {
        lines.push(format!("#{} {}", task.id, describe(task, tz)));
    }
    lines.join("\n")
}

fn describe(task: &ScheduledTask, tz: Tz) -> String {
    let times = if task.remaining == REPEAT_FOREVER {
        "forever".to_string()
    } else {
        format!("{}x", task.remaining.max(1))
    };
    let mut text = format!(
        "{} at {} ({}, every {})",
        task.action,
        format_action_time(task.next_fire, tz),
        times,
        format_interval(task.interval)
    );
    if !task.payload.is_empty() {
        text.push_str(": ");
        text.push_str(&task.payload);
    }
    text
}
