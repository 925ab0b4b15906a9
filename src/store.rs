// ABOUTME: Key/value persistence behind a bounded write queue and one SQLite writer thread
// ABOUTME: Each call enqueues a job and awaits its own result; a full queue fails fast

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence queue is full")]
    QueueFull,
    #[error("persistence store is closed")]
    Closed,
    #[error("no record {kind}/{key}")]
    NotFound { kind: String, key: String },
    #[error("record {kind}/{key} already exists")]
    AlreadyExists { kind: String, key: String },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid record body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to start writer thread: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub kind: String,
    pub key: String,
    pub body: Value,
    pub updated_at: String,
}

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

enum Job {
    Insert {
        kind: String,
        key: String,
        body: String,
        reply: Reply<()>,
    },
    Update {
        kind: String,
        key: String,
        body: String,
        reply: Reply<()>,
    },
    Delete {
        kind: String,
        key: String,
        reply: Reply<bool>,
    },
    ReplaceKind {
        kind: String,
        records: Vec<(String, String)>,
        reply: Reply<()>,
    },
    List {
        kind: String,
        reply: Reply<Vec<Record>>,
    },
}

/// Cheap to clone; all clones feed the same writer.
#[derive(Clone)]
pub struct Store {
    tx: Arc<Mutex<Option<mpsc::Sender<Job>>>>,
    writer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Store {
    pub fn open(path: &Path, queue_size: usize) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "Opened persistence store");
        Self::start(conn, queue_size)
    }

    pub fn open_in_memory(queue_size: usize) -> Result<Self, StoreError> {
        Self::start(Connection::open_in_memory()?, queue_size)
    }

    fn start(conn: Connection, queue_size: usize) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (kind, key)
            );",
        )?;
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let writer = std::thread::Builder::new()
            .name("burrow-store".to_string())
            .spawn(move || run_writer(conn, rx))?;
        Ok(Self {
            tx: Arc::new(Mutex::new(Some(tx))),
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    fn enqueue(&self, job: Job) -> Result<(), StoreError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(StoreError::Closed)?;
        tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => StoreError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => StoreError::Closed,
        })
    }

    async fn submit<T>(&self, build: impl FnOnce(Reply<T>) -> Job) -> Result<T, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(build(reply))?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    pub async fn insert(
        &self,
        kind: &str,
        key: &str,
        body: &impl Serialize,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(body)?;
        self.submit(|reply| Job::Insert {
            kind: kind.to_string(),
            key: key.to_string(),
            body,
            reply,
        })
        .await
    }

    pub async fn update(
        &self,
        kind: &str,
        key: &str,
        body: &impl Serialize,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(body)?;
        self.submit(|reply| Job::Update {
            kind: kind.to_string(),
            key: key.to_string(),
            body,
            reply,
        })
        .await
    }

    /// Returns whether a record was removed.
    pub async fn delete(&self, kind: &str, key: &str) -> Result<bool, StoreError> {
        self.submit(|reply| Job::Delete {
            kind: kind.to_string(),
            key: key.to_string(),
            reply,
        })
        .await
    }

    /// Atomically swaps every record of `kind` for `records`.
    pub async fn replace_kind<B: Serialize>(
        &self,
        kind: &str,
        records: &[(String, B)],
    ) -> Result<(), StoreError> {
        let records = records
            .iter()
            .map(|(key, body)| Ok((key.clone(), serde_json::to_string(body)?)))
            .collect::<Result<Vec<_>, serde_json::Error>>()?;
        self.submit(|reply| Job::ReplaceKind {
            kind: kind.to_string(),
            records,
            reply,
        })
        .await
    }

    /// Records of `kind` ordered by key.
    pub async fn list(&self, kind: &str) -> Result<Vec<Record>, StoreError> {
        self.submit(|reply| Job::List {
            kind: kind.to_string(),
            reply,
        })
        .await
    }

    /// Stops accepting jobs, lets the writer finish what is queued and joins it.
    pub fn close(&self) {
        let sender = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(writer) = writer {
            if writer.join().is_err() {
                tracing::error!("Persistence writer thread panicked");
            }
        }
    }
}

fn run_writer(mut conn: Connection, mut rx: mpsc::Receiver<Job>) {
    tracing::debug!("persistence writer started");
    while let Some(job) = rx.blocking_recv() {
        match job {
            Job::Insert {
                kind,
                key,
                body,
                reply,
            } => {
                let _ = reply.send(insert(&conn, kind, key, &body));
            }
            Job::Update {
                kind,
                key,
                body,
                reply,
            } => {
                let _ = reply.send(update(&conn, kind, key, &body));
            }
            Job::Delete { kind, key, reply } => {
                let result = conn
                    .execute(
                        "DELETE FROM records WHERE kind = ?1 AND key = ?2",
                        params![kind, key],
                    )
                    .map(|n| n > 0)
                    .map_err(StoreError::from);
                let _ = reply.send(result);
            }
            Job::ReplaceKind {
                kind,
                records,
                reply,
            } => {
                let _ = reply.send(replace_kind(&mut conn, &kind, &records));
            }
            Job::List { kind, reply } => {
                let _ = reply.send(list(&conn, &kind));
            }
        }
    }
    tracing::debug!("persistence writer stopped");
}

fn insert(conn: &Connection, kind: String, key: String, body: &str) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    match conn.execute(
        "INSERT INTO records (kind, key, body, updated_at) VALUES (?1, ?2, ?3, ?4)",
        params![kind, key, body, now],
    ) {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(StoreError::AlreadyExists { kind, key })
        }
        Err(e) => Err(e.into()),
    }
}

fn update(conn: &Connection, kind: String, key: String, body: &str) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE records SET body = ?3, updated_at = ?4 WHERE kind = ?1 AND key = ?2",
        params![kind, key, body, now],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound { kind, key });
    }
    Ok(())
}

fn replace_kind(
    conn: &mut Connection,
    kind: &str,
    records: &[(String, String)],
) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM records WHERE kind = ?1", params![kind])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO records (kind, key, body, updated_at) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (key, body) in records {
            stmt.execute(params![kind, key, body, now])?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn list(conn: &Connection, kind: &str) -> Result<Vec<Record>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT kind, key, body, updated_at FROM records WHERE kind = ?1 ORDER BY key",
    )?;
    let rows = stmt.query_map(params![kind], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;
    let mut records = Vec::new();
    for row in rows {
        let (kind, key, body, updated_at) = row?;
        records.push(Record {
            kind,
            key,
            body: serde_json::from_str(&body)?,
            updated_at,
        });
    }
    Ok(records)
}
