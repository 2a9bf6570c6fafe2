#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rss_relay::{
    ChatSink, ChatSource, CompletionRequest, FeedItem, FeedSource, InboundEvent, LlmAdapter,
    OutboundMessage, ParsedFeed, RelayError, Result,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn minutes_after(base: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    base + ChronoDuration::minutes(minutes)
}

pub fn item(guid: &str, published_at: Option<DateTime<Utc>>) -> FeedItem {
    FeedItem {
        guid: Some(guid.to_string()),
        link: Some(format!("https://example.com/{}", guid)),
        title: Some(format!("Article {}", guid)),
        content_snippet: Some(format!("Summary of {}", guid)),
        published_at,
    }
}

pub fn feed(title: &str, items: Vec<FeedItem>) -> ParsedFeed {
    ParsedFeed {
        title: Some(title.to_string()),
        items,
    }
}

/// How a scripted feed URL behaves.
#[derive(Clone)]
pub enum FeedScript {
    Serve(ParsedFeed),
    Fail(String),
    Hang,
    /// Blocks a thread on the blocking pool for this long, like a slow parse.
    SlowParse(Duration),
    Panic,
}

/// In-memory [`FeedSource`] keyed by URL.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, FeedScript>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: &str, script: FeedScript) -> Self {
        self.set(url, script);
        self
    }

    pub fn set(&self, url: &str, script: FeedScript) {
        self.scripts.lock().unwrap().insert(url.to_string(), script);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn load(&self, url: &str) -> Result<ParsedFeed> {
        self.calls.lock().unwrap().push(url.to_string());
        let script = self.scripts.lock().unwrap().get(url).cloned();

        match script {
            Some(FeedScript::Serve(feed)) => Ok(feed),
            Some(FeedScript::Fail(message)) => Err(RelayError::FetchFailure(message)),
            Some(FeedScript::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(RelayError::FetchFailure("woke up".to_string()))
            }
            Some(FeedScript::SlowParse(busy)) => {
                tokio::task::spawn_blocking(move || std::thread::sleep(busy))
                    .await
                    .map_err(|e| RelayError::WorkerCrash(e.to_string()))?;
                Ok(ParsedFeed::default())
            }
            Some(FeedScript::Panic) => panic!("parser blew up on {}", url),
            None => Err(RelayError::FetchFailure(format!("HTTP 404: Not Found ({})", url))),
        }
    }
}

/// [`ChatSink`] that records every message.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<OutboundMessage>>,
    typing: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send to `destination` fails.
    pub fn failing_for(self, destination: &str) -> Self {
        self.failing.lock().unwrap().insert(destination.to_string());
        self
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts_for(&self, destination: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|m| m.destination == destination)
            .map(|m| m.text)
            .collect()
    }

    pub fn typing(&self) -> Vec<String> {
        self.typing.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatSink for RecordingSink {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        if self.failing.lock().unwrap().contains(&message.destination) {
            return Err(RelayError::DeliveryFailure {
                destination: message.destination.clone(),
                reason: "chat not found".to_string(),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn indicate_typing(&self, destination: &str) -> Result<()> {
        self.typing.lock().unwrap().push(destination.to_string());
        Ok(())
    }
}

/// [`LlmAdapter`] answering from a script, `echo: <prompt>` once the script runs out.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String>>>,
    delay: Duration,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then(self, reply: Result<String>) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmAdapter for ScriptedProvider {
    fn adapter_name(&self) -> String {
        "scripted".to_string()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.prompts.lock().unwrap().push(request.user_prompt.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self.replies.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(format!("echo: {}", request.user_prompt)))
    }
}

/// [`ChatSource`] handing out scripted batches, then idling like an empty long poll.
#[derive(Default)]
pub struct ScriptedChatSource {
    batches: Mutex<VecDeque<Result<Vec<InboundEvent>>>>,
    polls: Mutex<usize>,
}

impl ScriptedChatSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, batch: Result<Vec<InboundEvent>>) -> Self {
        self.batches.lock().unwrap().push_back(batch);
        self
    }

    pub fn polls(&self) -> usize {
        *self.polls.lock().unwrap()
    }
}

#[async_trait]
impl ChatSource for ScriptedChatSource {
    async fn poll(&self) -> Result<Vec<InboundEvent>> {
        *self.polls.lock().unwrap() += 1;
        let next = self.batches.lock().unwrap().pop_front();

        match next {
            Some(batch) => batch,
            None => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }
    }
}
