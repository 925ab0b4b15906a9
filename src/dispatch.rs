// ABOUTME: Decodes inbound event payloads and routes them to commands or listeners
// ABOUTME: Prefixed message text goes to the command queue, everything else fans out by kind

use burrow_core::task::spawn_isolated;
use burrow_core::{CommandQueue, QueueError, QueuedCall};
use burrow_onebot::Event;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::context::Ctx;
use crate::gateway::ApiCaller;
use crate::module::ListenerTable;

const OVERFLOW_NOTICE: &str = "Command could not be processed, please try again later.";

pub struct Dispatcher {
    nicknames: Vec<String>,
    prefix: String,
    listeners: Arc<ListenerTable>,
    commands: CommandQueue<Arc<Ctx>>,
    max_process_time: Duration,
}

impl Dispatcher {
    pub fn new(
        nicknames: Vec<String>,
        prefix: impl Into<String>,
        listeners: Arc<ListenerTable>,
        commands: CommandQueue<Arc<Ctx>>,
        max_process_time: Duration,
    ) -> Self {
        Self {
            nicknames,
            prefix: prefix.into(),
            listeners,
            commands,
            max_process_time,
        }
    }

    /// Handles one event payload. Never blocks on listeners or handlers.
    pub fn dispatch(&self, payload: Value, caller: Arc<dyn ApiCaller>) {
        let mut event = match Event::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(self_id = caller.self_id(), error = %e, "Dropping undecodable event");
                return;
            }
        };
        if event.self_id == 0 {
            event.self_id = caller.self_id();
        }
        event.resolve_addressee(&self.nicknames);

        let kind = event.kind();
        burrow_core::metrics::record_event_received(kind.as_str());
        tracing::trace!(
            self_id = event.self_id,
            kind = %kind,
            post_type = %event.post_type,
            detail_type = %event.detail_type,
            to_me = event.is_to_me,
            "event"
        );

        let ctx = Arc::new(Ctx::new(event, caller, self.max_process_time));

        if kind.is_message() && self.is_command(&ctx) {
            self.submit_command(ctx);
            return;
        }

        for listener in self.listeners.get(kind) {
            let listener = Arc::clone(listener);
            let ctx = Arc::clone(&ctx);
            let budget = self.max_process_time;
            spawn_isolated(format!("listener:{}", kind), async move {
                let started = Instant::now();
                listener.on_event(ctx).await;
                let elapsed = started.elapsed();
                if elapsed > budget {
                    tracing::warn!(
                        kind = %kind,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Listener ran past its processing budget"
                    );
                }
            });
        }
    }

    fn is_command(&self, ctx: &Ctx) -> bool {
        !self.prefix.is_empty() && ctx.plain_text().starts_with(&self.prefix)
    }

    fn submit_command(&self, ctx: Arc<Ctx>) {
        let sender_id = ctx.event().sender_id();
        let Err(e) = self
            .commands
            .submit(QueuedCall::new(sender_id, Arc::clone(&ctx)))
        else {
            return;
        };
        match e {
            QueueError::Full => {
                burrow_core::metrics::record_command("overflow");
                tracing::warn!(sender_id, "Command queue full, refusing command");
            }
            QueueError::Closed => {
                // shutting down; nothing useful to tell the sender
                tracing::debug!(sender_id, "Command queue closed, dropping command");
                return;
            }
        }
        spawn_isolated("command-overflow", async move {
            if let Err(e) = ctx.reply(OVERFLOW_NOTICE).await {
                tracing::warn!(error = %e, "Failed to send overflow notice");
            }
        });
    }
}
