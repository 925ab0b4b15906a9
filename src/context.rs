// ABOUTME: Per-event context handed to listeners and command handlers
// ABOUTME: Carries the decoded event, the connection it arrived on and the send helpers

use burrow_onebot::{ApiRequest, ApiResponse, Event, Message, Segment};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::gateway::{ApiCaller, CallError};

/// Where an outgoing message goes when it is not a reply to the current event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Group(i64),
    Private(i64),
    GuildChannel { guild_id: String, channel_id: String },
}

impl Target {
    fn request(&self, message: &Message) -> ApiRequest {
        match self {
            Target::Group(id) => ApiRequest::send_group_msg(*id, message),
            Target::Private(id) => ApiRequest::send_private_msg(*id, message),
            Target::GuildChannel {
                guild_id,
                channel_id,
            } => ApiRequest::send_guild_channel_msg(guild_id, channel_id, message),
        }
    }
}

/// Sends `message` to `target` through `caller`.
///
/// A response that is not `ok` is logged and still returned.
pub async fn send_to(
    caller: &dyn ApiCaller,
    target: &Target,
    message: impl Into<Message>,
) -> Result<ApiResponse, CallError> {
    let message = message.into();
    let response = caller.call_api(target.request(&message)).await?;
    if !response.is_ok() {
        tracing::warn!(
            self_id = caller.self_id(),
            target = ?target,
            retcode = response.retcode,
            message = %response.message,
            "Send was not accepted"
        );
    }
    Ok(response)
}

pub struct Ctx {
    event: Event,
    caller: Arc<dyn ApiCaller>,
    received_at: Instant,
    max_process_time: Duration,
}

impl Ctx {
    pub fn new(event: Event, caller: Arc<dyn ApiCaller>, max_process_time: Duration) -> Self {
        Self {
            event,
            caller,
            received_at: Instant::now(),
            max_process_time,
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn caller(&self) -> &Arc<dyn ApiCaller> {
        &self.caller
    }

    pub fn self_id(&self) -> i64 {
        self.caller.self_id()
    }

    pub fn plain_text(&self) -> String {
        self.event.plain_text()
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Advisory: handlers running past this are logged, not cancelled.
    pub fn deadline(&self) -> Instant {
        self.received_at + self.max_process_time
    }

    pub async fn call_api(&self, request: ApiRequest) -> Result<ApiResponse, CallError> {
        self.caller.call_api(request).await
    }

    /// Where a reply to this event should go.
    pub fn origin(&self) -> Target {
        let event = &self.event;
        if event.is_guild() {
            Target::GuildChannel {
                guild_id: event.guild_id.clone(),
                channel_id: event.channel_id.clone(),
            }
        } else if event.group_id != 0 {
            Target::Group(event.group_id)
        } else {
            Target::Private(event.user_id)
        }
    }

    /// Sends to the chat this event came from.
    pub async fn send(&self, message: impl Into<Message>) -> Result<ApiResponse, CallError> {
        send_to(self.caller.as_ref(), &self.origin(), message).await
    }

    /// Like [`Ctx::send`] but spaces mentions the way a person would type them.
    pub async fn send_chain(
        &self,
        segments: impl IntoIterator<Item = Segment>,
    ) -> Result<ApiResponse, CallError> {
        self.send(Message::chain(segments)).await
    }

    pub async fn send_to_target(
        &self,
        target: &Target,
        message: impl Into<Message>,
    ) -> Result<ApiResponse, CallError> {
        send_to(self.caller.as_ref(), target, message).await
    }

    /// Sends quoting the triggering message when it has an id.
    pub async fn reply(&self, message: impl Into<Message>) -> Result<ApiResponse, CallError> {
        let mut message = message.into();
        if let Some(id) = self.event.reply_id() {
            message.0.insert(0, Segment::reply(id));
        }
        self.send(message).await
    }
}
