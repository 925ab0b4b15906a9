// ABOUTME: One live gateway connection seen as an API endpoint for modules
// ABOUTME: Stamps each request with a fresh echo, serialises writes and awaits the answer

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use burrow_onebot::{ApiRequest, ApiResponse};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use super::correlator::Correlator;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("connection closed before a response arrived")]
    Closed,
    #[error("failed to write request: {0}")]
    Transport(String),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What modules and the scheduler talk to.
#[async_trait]
pub trait ApiCaller: Send + Sync {
    /// Account id announced in the handshake.
    fn self_id(&self) -> i64;

    async fn call_api(&self, request: ApiRequest) -> Result<ApiResponse, CallError>;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    async fn write_text(&mut self, text: String) -> anyhow::Result<()>;
    async fn close(&mut self);
}

#[async_trait]
impl FrameWriter for SplitSink<WebSocket, Message> {
    async fn write_text(&mut self, text: String) -> anyhow::Result<()> {
        self.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = SinkExt::close(self).await;
    }
}

pub struct Caller {
    self_id: i64,
    seq: AtomicU64,
    pending: Correlator,
    writer: Mutex<Box<dyn FrameWriter>>,
    timeout: Duration,
}

impl Caller {
    pub fn new(self_id: i64, writer: Box<dyn FrameWriter>, timeout: Duration) -> Self {
        Self {
            self_id,
            seq: AtomicU64::new(0),
            pending: Correlator::new(),
            writer: Mutex::new(writer),
            timeout,
        }
    }

    pub fn correlator(&self) -> &Correlator {
        &self.pending
    }

    /// Sequence numbers start at 1 and are never reused on this connection.
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn close(&self) {
        self.writer.lock().await.close().await;
    }
}

#[async_trait]
impl ApiCaller for Caller {
    fn self_id(&self) -> i64 {
        self.self_id
    }

    async fn call_api(&self, mut request: ApiRequest) -> Result<ApiResponse, CallError> {
        let echo = self.next_seq();
        request.echo = echo;
        let text = serde_json::to_string(&request)?;
        let rx = self.pending.register(echo)?;

        let written = self.writer.lock().await.write_text(text).await;
        if let Err(e) = written {
            self.pending.cancel(echo);
            burrow_core::metrics::record_api_call(&request.action, "transport");
            tracing::warn!(self_id = self.self_id, action = %request.action, error = %e, "API write failed");
            return Err(CallError::Transport(e.to_string()));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => {
                burrow_core::metrics::record_api_call(&request.action, "ok");
                Ok(response)
            }
            Ok(Err(_)) => {
                burrow_core::metrics::record_api_call(&request.action, "closed");
                Err(CallError::Closed)
            }
            Err(_) => {
                self.pending.cancel(echo);
                burrow_core::metrics::record_api_call(&request.action, "timeout");
                tracing::warn!(
                    self_id = self.self_id,
                    action = %request.action,
                    echo,
                    "API call timed out"
                );
                Err(CallError::Timeout(self.timeout))
            }
        }
    }
}
