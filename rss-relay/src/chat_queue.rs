//! Bounded FIFO in front of the completion provider.
//!
//! The provider is rate limited and must not see concurrent calls from us, so
//! one drain task works through the queue with exactly one request in flight.
//! The drain task exists only while there is work (`Idle -> Draining -> Idle`);
//! any enqueue restarts it.

use crate::delivery::{ChatSink, OutboundMessage};
use crate::llm_adapter::{CompletionRequest, LlmAdapter};
use crate::shutdown::StopFlag;
use crate::types::{ChatTask, RelayError, Result};
use crate::utils::html::looks_like_markup;
use crate::utils::text::{grapheme_len, truncate_graphemes, ELLIPSIS};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

pub const QUEUE_CAPACITY: usize = 50;
/// Longest answer relayed to the chat, in user-perceived characters, ellipsis included.
pub const ANSWER_LIMIT: usize = 3800;
/// Provider errors longer than this are replaced by a generic notice.
pub const ERROR_LENGTH_THRESHOLD: usize = 1200;
/// Provider errors are cut to this length otherwise, ellipsis included.
pub const ERROR_TRUNCATE_LIMIT: usize = 800;

const RECHECK_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ChatQueueConfig {
    pub model: String,
    pub system_prompt: Option<String>,
    pub call_timeout: Duration,
    pub task_pacing: Duration,
    pub capacity: usize,
}

impl Default for ChatQueueConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            system_prompt: None,
            call_timeout: Duration::from_secs(30),
            task_pacing: Duration::from_secs(1),
            capacity: QUEUE_CAPACITY,
        }
    }
}

/// Result of a successful [`ChatQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Nothing ahead; the task is processed next.
    Next,
    /// `ahead` requests (including the one in flight) will be answered first.
    Waiting { ahead: usize },
}

#[derive(Clone)]
pub struct ChatQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    config: ChatQueueConfig,
    provider: Arc<dyn LlmAdapter>,
    sink: Arc<dyn ChatSink>,
    stop: StopFlag,
    state: Mutex<QueueState>,
    draining: AtomicBool,
    idle: Notify,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<ChatTask>,
    in_flight: bool,
}

impl QueueState {
    fn held(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight)
    }
}

impl ChatQueue {
    pub fn new(
        config: ChatQueueConfig,
        provider: Arc<dyn LlmAdapter>,
        sink: Arc<dyn ChatSink>,
        stop: StopFlag,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                provider,
                sink,
                stop,
                state: Mutex::new(QueueState::default()),
                draining: AtomicBool::new(false),
                idle: Notify::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    /// Tasks held, counting the one in flight.
    pub fn len(&self) -> usize {
        self.inner.state().held()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Queue `task` for the provider.
    ///
    /// When the queue is full the submitter is told so and
    /// [`RelayError::QueueFull`] is returned. When other requests are ahead the
    /// submitter gets a position notice. After a stop nothing is accepted.
    pub async fn enqueue(&self, task: ChatTask) -> Result<Enqueued> {
        let destination = task.destination.clone();
        let reply_to = task.reply_to;
        let capacity = self.capacity();

        if self.inner.stop.is_stopped() {
            info!("Shutting down, rejecting request from {}", destination);
            self.inner
                .notify(
                    &destination,
                    reply_to,
                    "The relay is shutting down and cannot take new requests.".to_string(),
                )
                .await;
            return Err(RelayError::ShuttingDown);
        }

        let held = {
            let mut state = self.inner.state();
            if state.held() >= capacity {
                None
            } else {
                debug!("Queued chat task {}", task.id);
                state.pending.push_back(task);
                Some(state.held())
            }
        };

        let Some(held) = held else {
            warn!("Chat queue full, rejecting request from {}", destination);
            self.inner
                .notify(
                    &destination,
                    reply_to,
                    format!(
                        "The request queue is full ({} pending). Please try again later.",
                        capacity
                    ),
                )
                .await;
            return Err(RelayError::QueueFull { capacity });
        };

        self.inner.ensure_draining();

        if held > 1 {
            let ahead = held - 1;
            self.inner
                .notify(
                    &destination,
                    reply_to,
                    format!(
                        "Your request is queued, {} request(s) ahead of you.",
                        ahead
                    ),
                )
                .await;
            Ok(Enqueued::Waiting { ahead })
        } else {
            Ok(Enqueued::Next)
        }
    }

    /// Resolves once no drain task runs and nothing is left to drain (or a stop
    /// was requested).
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.inner.idle.notified();
            let settled = self.is_empty() || self.inner.stop.is_stopped();
            if settled && !self.is_draining() {
                return;
            }
            idle.await;
        }
    }
}

impl QueueInner {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_draining(self: &Arc<Self>) {
        if self.stop.is_stopped() {
            return;
        }

        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.drain().await });
        }
    }

    async fn drain(self: Arc<Self>) {
        debug!("Chat queue draining");
        let mut first = true;

        loop {
            if self.stop.is_stopped() {
                info!("Stop requested, chat queue stops draining");
                break;
            }

            let task = {
                let mut state = self.state();
                match state.pending.pop_front() {
                    Some(task) => {
                        state.in_flight = true;
                        task
                    }
                    None => break,
                }
            };

            if !first && !self.config.task_pacing.is_zero() {
                tokio::time::sleep(self.config.task_pacing).await;
            }
            first = false;

            self.process(task).await;
            self.state().in_flight = false;
        }

        self.draining.store(false, Ordering::SeqCst);
        self.idle.notify_waiters();

        // An enqueue may have landed between the last pop and releasing the flag
        let has_pending = !self.state().pending.is_empty();
        if has_pending && !self.stop.is_stopped() {
            let inner = Arc::clone(&self);
            tokio::spawn(async move {
                tokio::time::sleep(RECHECK_DELAY).await;
                inner.ensure_draining();
            });
        }
    }

    async fn process(&self, task: ChatTask) {
        debug!("Processing chat task {} for {}", task.id, task.destination);

        if let Err(e) = self.sink.indicate_typing(&task.destination).await {
            debug!("Typing indicator for {} failed: {}", task.destination, e);
        }

        let request = CompletionRequest {
            model: self.config.model.clone(),
            system_prompt: self.config.system_prompt.clone(),
            user_prompt: task.prompt.clone(),
        };

        let timeout = self.config.call_timeout;
        let text = match tokio::time::timeout(timeout, self.provider.complete(&request)).await {
            Ok(Ok(answer)) => truncate_with_marker(answer.trim(), ANSWER_LIMIT),
            Ok(Err(e)) => {
                warn!("Completion for task {} failed: {}", task.id, e);
                failure_notice(&e)
            }
            Err(_) => {
                warn!("Completion for task {} timed out after {:?}", task.id, timeout);
                failure_notice(&RelayError::ProviderTimeout(timeout))
            }
        };

        self.notify(&task.destination, task.reply_to, text).await;
    }

    async fn notify(&self, destination: &str, reply_to: Option<i64>, text: String) {
        let message = OutboundMessage::new(destination, text).replying_to(reply_to);
        if let Err(e) = self.sink.send(&message).await {
            warn!("Failed to reply in {}: {}", destination, e);
        }
    }
}

/// User-facing text for a failed completion.
pub fn failure_notice(error: &RelayError) -> String {
    match error {
        RelayError::ProviderTimeout(after) => format!(
            "The request timed out after {} seconds. Please try again later.",
            after.as_secs()
        ),
        RelayError::ProviderFailure { status, message } => {
            format!("Request failed: {}", sanitize_provider_error(message, *status))
        }
        other => format!("Request failed: {}", sanitize_provider_error(&other.to_string(), None)),
    }
}

/// Make a provider error safe to show in a chat.
///
/// Markup payloads (error pages from proxies and gateways) and oversized
/// texts are replaced by a generic message that keeps only the HTTP status.
/// Anything else is cut to [`ERROR_TRUNCATE_LIMIT`] characters.
pub fn sanitize_provider_error(message: &str, status: Option<u16>) -> String {
    let message = message.trim();
    let status = status.or_else(|| extract_status_code(message));

    if looks_like_markup(message) || message.chars().count() > ERROR_LENGTH_THRESHOLD {
        return match status {
            Some(code) => format!("the completion service returned an error (HTTP {}).", code),
            None => "the completion service returned an unexpected error.".to_string(),
        };
    }

    truncate_with_marker(message, ERROR_TRUNCATE_LIMIT)
}

/// Truncate so that the result, ellipsis included, stays within `limit`.
fn truncate_with_marker(text: &str, limit: usize) -> String {
    if grapheme_len(text) <= limit {
        return text.to_string();
    }
    truncate_graphemes(text, limit.saturating_sub(ELLIPSIS.len()))
}

/// Find an HTTP status code mentioned in free-form error text.
pub fn extract_status_code(text: &str) -> Option<u16> {
    let lower = text.to_lowercase();

    ["status code", "status:", "status", "http/1.1", "http/2", "http"]
        .iter()
        .filter_map(|marker| {
            let start = lower.find(marker)? + marker.len();
            let digits: String = lower[start..]
                .trim_start_matches(|c: char| c == ' ' || c == ':' || c == '=')
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse::<u16>().ok()
        })
        .find(|code| (100..=599).contains(code))
}
