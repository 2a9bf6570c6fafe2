use crate::shutdown::StopFlag;
use crate::types::{FeedItem, Result};
use crate::utils::text::{strip_line_breaks, truncate_graphemes};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest rendered item title, in user-perceived characters.
pub const TITLE_LIMIT: usize = 200;
/// Longest rendered content snippet, in user-perceived characters.
pub const SNIPPET_LIMIT: usize = 200;

/// A message addressed to one chat destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub destination: String,
    pub text: String,
    /// Message being answered, if any.
    pub reply_to: Option<i64>,
}

impl OutboundMessage {
    pub fn new(destination: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            text: text.into(),
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, message_id: Option<i64>) -> Self {
        self.reply_to = message_id;
        self
    }
}

/// Outbound side of a chat platform.
#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<()>;

    /// Show a "working on it" indicator in `destination`.
    async fn indicate_typing(&self, destination: &str) -> Result<()>;
}

/// Outcome of one [`DeliveryPipeline::deliver`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Items handed to every destination (stopped batches count only what ran).
    pub items_delivered: usize,
    pub sends_attempted: usize,
    pub sends_failed: usize,
}

/// Sends new feed items to every configured destination, oldest first.
pub struct DeliveryPipeline {
    sink: Arc<dyn ChatSink>,
    destinations: Vec<String>,
    item_pacing: Duration,
    stop: StopFlag,
}

impl DeliveryPipeline {
    pub fn new(
        sink: Arc<dyn ChatSink>,
        destinations: Vec<String>,
        item_pacing: Duration,
        stop: StopFlag,
    ) -> Self {
        Self {
            sink,
            destinations,
            item_pacing,
            stop,
        }
    }

    pub fn destinations(&self) -> &[String] {
        &self.destinations
    }

    /// Deliver `items`, which must already be in chronological order.
    ///
    /// A failing destination is logged and skipped; it never stops the other
    /// destinations or the remaining items. The stop flag is checked before
    /// each item.
    pub async fn deliver(&self, items: &[FeedItem], feed_title: &str) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for (index, item) in items.iter().enumerate() {
            if index > 0 && !self.item_pacing.is_zero() {
                tokio::time::sleep(self.item_pacing).await;
            }

            if self.stop.is_stopped() {
                info!(
                    "Stop requested, skipping {} remaining items from {}",
                    items.len() - index,
                    feed_title
                );
                break;
            }

            let text = render_item(item, feed_title);

            for destination in &self.destinations {
                report.sends_attempted += 1;
                let message = OutboundMessage::new(destination.clone(), text.clone());

                match self.sink.send(&message).await {
                    Ok(()) => debug!("Delivered item to {}", destination),
                    Err(e) => {
                        report.sends_failed += 1;
                        warn!("Failed to deliver item to {}: {}", destination, e);
                    }
                }
            }

            report.items_delivered += 1;
        }

        report
    }
}

/// Render one feed item as a chat message.
pub fn render_item(item: &FeedItem, feed_title: &str) -> String {
    let title = item
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled");

    let mut message = format!(
        "{} has new content!\n\n{}\n\n",
        feed_title,
        truncate_graphemes(title, TITLE_LIMIT)
    );

    let snippet = strip_line_breaks(item.content_snippet.as_deref().unwrap_or(""));
    if !snippet.trim().is_empty() {
        message.push_str(&truncate_graphemes(snippet.trim(), SNIPPET_LIMIT));
        message.push_str("\n\n");
    }

    if let Some(link) = item.link.as_deref().filter(|l| !l.is_empty()) {
        message.push_str(link);
    }

    message.trim_end().to_string()
}
