//! Inbound chat events: prompts for the completion queue and manual scan requests.

use crate::chat_queue::ChatQueue;
use crate::delivery::{ChatSink, OutboundMessage};
use crate::scheduler::ScanTrigger;
use crate::shutdown::StopFlag;
use crate::types::{ChatTask, RelayError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Command that asks for an immediate scan.
pub const REFRESH_COMMAND: &str = "/reflush";

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// The bot was addressed with a prompt.
    Prompt {
        chat: String,
        message_id: Option<i64>,
        text: String,
    },
    /// Someone asked for a scan right now.
    Refresh {
        chat: String,
        message_id: Option<i64>,
    },
}

/// Inbound side of a chat platform.
#[async_trait]
pub trait ChatSource: Send + Sync {
    /// Wait for the next batch of events. An empty batch means the poll ran
    /// out without anything arriving.
    async fn poll(&self) -> Result<Vec<InboundEvent>>;
}

/// Turn a chat message into an event.
///
/// Private chats address the bot with every message. In groups only the
/// refresh command or an `@bot_username` mention count; the mention is removed
/// from the prompt.
pub fn interpret_message(
    chat: &str,
    message_id: Option<i64>,
    is_private: bool,
    text: &str,
    bot_username: &str,
) -> Option<InboundEvent> {
    let text = text.trim();
    let mention = format!("@{}", bot_username.trim_start_matches('@'));

    let command = text.split_whitespace().next().unwrap_or("");
    let (command_name, command_target) = match command.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (command, None),
    };
    if command_name == REFRESH_COMMAND
        && command_target.map_or(true, |t| t.eq_ignore_ascii_case(&mention[1..]))
    {
        return Some(InboundEvent::Refresh {
            chat: chat.to_string(),
            message_id,
        });
    }

    let mentioned = !bot_username.is_empty() && contains_ignore_case(text, &mention);
    if !is_private && !mentioned {
        return None;
    }

    let prompt = if mentioned {
        remove_ignore_case(text, &mention)
    } else {
        text.to_string()
    };
    let prompt = prompt.split_whitespace().collect::<Vec<_>>().join(" ");

    if prompt.is_empty() {
        return None;
    }

    Some(InboundEvent::Prompt {
        chat: chat.to_string(),
        message_id,
        text: prompt,
    })
}

fn contains_ignore_case(text: &str, needle: &str) -> bool {
    text.to_lowercase().contains(&needle.to_lowercase())
}

fn remove_ignore_case(text: &str, needle: &str) -> String {
    let lower = text.to_lowercase();
    let needle = needle.to_lowercase();
    // Lowercasing can change byte lengths outside ASCII; fall back to the raw text
    if lower.len() != text.len() {
        return text.replace(&needle, " ");
    }

    let mut result = String::with_capacity(text.len());
    let mut last = 0;
    for (start, _) in lower.match_indices(&needle) {
        result.push_str(&text[last..start]);
        result.push(' ');
        last = start + needle.len();
    }
    result.push_str(&text[last..]);
    result
}

/// Routes inbound events to the chat queue and the scan trigger.
pub struct InboundRouter {
    queue: ChatQueue,
    trigger: ScanTrigger,
    sink: Arc<dyn ChatSink>,
    stop: StopFlag,
}

impl InboundRouter {
    pub fn new(queue: ChatQueue, trigger: ScanTrigger, sink: Arc<dyn ChatSink>, stop: StopFlag) -> Self {
        Self {
            queue,
            trigger,
            sink,
            stop,
        }
    }

    /// Poll `source` until the stop flag is set.
    pub async fn run(&self, source: Arc<dyn ChatSource>) {
        info!("Listening for inbound chat messages");

        loop {
            let polled = tokio::select! {
                _ = self.stop.stopped() => break,
                polled = source.poll() => polled,
            };

            match polled {
                Ok(events) => {
                    for event in events {
                        self.route(event).await;
                    }
                }
                Err(e) => {
                    warn!("Polling for chat messages failed: {}", e);
                    tokio::select! {
                        _ = self.stop.stopped() => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!("Inbound listener stopped");
    }

    pub async fn route(&self, event: InboundEvent) {
        match event {
            InboundEvent::Prompt {
                chat,
                message_id,
                text,
            } => match self.queue.enqueue(ChatTask::new(chat.clone(), message_id, text)).await {
                Ok(position) => debug!("Prompt from {} queued: {:?}", chat, position),
                // The submitter has already been told
                Err(RelayError::QueueFull { .. }) | Err(RelayError::ShuttingDown) => {}
                Err(e) => warn!("Could not queue prompt from {}: {}", chat, e),
            },
            InboundEvent::Refresh { chat, message_id } => {
                let text = if self.trigger.trigger() {
                    info!("Manual scan requested from {}", chat);
                    "Scanning feeds now."
                } else {
                    "A scan is already in progress."
                };
                let message = OutboundMessage::new(chat.clone(), text).replying_to(message_id);
                if let Err(e) = self.sink.send(&message).await {
                    warn!("Failed to answer refresh request in {}: {}", chat, e);
                }
            }
        }
    }
}
