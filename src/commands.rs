// ABOUTME: Handler side of the command queue: parses, looks up and permission-checks calls
// ABOUTME: Also answers senders rejected by the cooldown window

use async_trait::async_trait;
use burrow_core::{parse_command_line, CallSink, Permission, QueuedCall};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::context::Ctx;
use crate::module::CommandTable;

pub struct CommandRouter {
    prefix: String,
    commands: Arc<CommandTable>,
    admins: HashSet<i64>,
}

impl CommandRouter {
    pub fn new(
        prefix: impl Into<String>,
        commands: Arc<CommandTable>,
        admins: impl IntoIterator<Item = i64>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            commands,
            admins: admins.into_iter().collect(),
        }
    }

    /// Tier held by the sender of `ctx`'s event.
    pub fn permission_of(&self, ctx: &Ctx) -> Permission {
        let event = ctx.event();
        Permission::of(
            self.admins.contains(&event.sender_id()),
            event.sender.is_group_admin(),
        )
    }
}

#[async_trait]
impl CallSink<Arc<Ctx>> for CommandRouter {
    async fn admit(&self, call: QueuedCall<Arc<Ctx>>) {
        let ctx = call.payload;
        let text = ctx.plain_text();
        let Some(line) = parse_command_line(&text, &self.prefix) else {
            return;
        };
        let Some(entry) = self.commands.get(&line.label) else {
            tracing::debug!(label = %line.label, sender_id = call.sender_id, "Unknown command");
            burrow_core::metrics::record_command("unknown");
            return;
        };

        let held = self.permission_of(&ctx);
        if !entry.permission.allows(held) {
            tracing::info!(
                label = %line.label,
                sender_id = call.sender_id,
                required = %entry.permission,
                held = %held,
                "Command refused"
            );
            burrow_core::metrics::record_command("denied");
            let notice = format!(
                "{}{} needs {} permission.",
                self.prefix, line.label, entry.permission
            );
            if let Err(e) = ctx.reply(notice).await {
                tracing::warn!(error = %e, "Failed to send permission refusal");
            }
            return;
        }

        burrow_core::metrics::record_command("ok");
        tracing::debug!(
            label = %line.label,
            module = entry.module,
            sender_id = call.sender_id,
            args = line.args.len(),
            "Running command"
        );
        let deadline = ctx.deadline();
        entry.handler.on_command(Arc::clone(&ctx), line.args).await;
        if Instant::now() > deadline {
            tracing::warn!(
                label = %line.label,
                module = entry.module,
                elapsed_ms = ctx.received_at().elapsed().as_millis() as u64,
                "Command ran past its processing budget"
            );
        }
    }

    async fn reject(&self, call: QueuedCall<Arc<Ctx>>, remaining: Duration) {
        let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        let notice = format!(
            "You're sending commands too fast, try again in {}s.",
            secs.max(1)
        );
        if let Err(e) = call.payload.reply(notice).await {
            tracing::warn!(error = %e, "Failed to send cooldown notice");
        }
    }
}
