// ABOUTME: Persistence backends for scheduled tasks
// ABOUTME: A TOML file on disk, plus an in-memory store for embedding and tests

use super::ScheduledTask;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Where the scheduler keeps its task list between restarts.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn load(&self) -> Result<Vec<ScheduledTask>>;

    /// Replaces the stored list.
    async fn save(&self, tasks: &[ScheduledTask]) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskFile {
    #[serde(default)]
    tasks: Vec<ScheduledTask>,
}

/// Task list as `[[tasks]]` tables in a TOML file. Writes go through a
/// temporary file and a rename.
#[derive(Debug, Clone)]
pub struct TomlTaskStore {
    path: PathBuf,
}

impl TomlTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TaskStore for TomlTaskStore {
    async fn load(&self) -> Result<Vec<ScheduledTask>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let file: TaskFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(file.tasks)
    }

    async fn save(&self, tasks: &[ScheduledTask]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = TaskFile {
            tasks: tasks.to_vec(),
        };
        let content = toml::to_string_pretty(&file).context("Failed to serialize tasks")?;
        let tmp = self.path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Keeps the list in memory. `saves()` counts writes.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<Vec<ScheduledTask>>,
    saves: Mutex<usize>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<ScheduledTask>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            saves: Mutex::new(0),
        }
    }

    pub fn snapshot(&self) -> Vec<ScheduledTask> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn load(&self) -> Result<Vec<ScheduledTask>> {
        Ok(self.snapshot())
    }

    async fn save(&self, tasks: &[ScheduledTask]) -> Result<()> {
        *self.tasks.lock().unwrap_or_else(PoisonError::into_inner) = tasks.to_vec();
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}
