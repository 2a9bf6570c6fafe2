//! Fault-isolated feed fetching.
//!
//! Each fetch runs in its own spawned task. The caller waits at most the
//! configured deadline; past that the task is aborted and the fetch reports
//! [`RelayError::FetchTimeout`]. A panic inside the task surfaces as
//! [`RelayError::WorkerCrash`]. Either way the caller always gets exactly one
//! result per request.

use crate::dedup;
use crate::fetcher::Fetcher;
use crate::parser::FeedParser;
use crate::types::{FeedItem, FetchConfig, ParsedFeed, RelayError, Result, Watermark};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{debug, warn};

/// Anything that can produce a parsed feed for a URL.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn load(&self, url: &str) -> Result<ParsedFeed>;
}

/// Feed source backed by HTTP and `feed-rs`.
pub struct HttpFeedSource {
    fetcher: Fetcher,
    parser: FeedParser,
}

impl HttpFeedSource {
    pub fn new(config: FetchConfig) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(config)?,
            parser: FeedParser::new(),
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn load(&self, url: &str) -> Result<ParsedFeed> {
        let body = self.fetcher.fetch_feed(url).await?;
        let parser = self.parser;

        // Parsing is CPU-bound; keep it off the async workers. Aborting the
        // fetch task cannot interrupt a parse already running on the blocking
        // pool: it runs to completion and its result is dropped. The body size
        // limit bounds how long that can take.
        tokio::task::spawn_blocking(move || parser.parse_feed(&body))
            .await
            .map_err(|e| RelayError::WorkerCrash(describe_join_error(e)))?
    }
}

/// Input of one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub feed_url: String,
    pub last_item_identity: Option<String>,
    pub last_published_at: Option<DateTime<Utc>>,
    pub previous_scan_time: Option<DateTime<Utc>>,
}

impl FetchRequest {
    pub fn new(
        feed_url: impl Into<String>,
        watermark: Option<&Watermark>,
        previous_scan_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            feed_url: feed_url.into(),
            last_item_identity: watermark.and_then(|w| w.last_item_identity.clone()),
            last_published_at: watermark.and_then(|w| w.last_published_at),
            previous_scan_time,
        }
    }

    /// The stored watermark this request carries, `None` in bootstrap state.
    pub fn watermark(&self) -> Option<Watermark> {
        if self.last_item_identity.is_none() && self.last_published_at.is_none() {
            return None;
        }

        Some(Watermark {
            last_item_identity: self.last_item_identity.clone(),
            last_published_at: self.last_published_at,
        })
    }
}

/// Successful result of one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedUpdate {
    pub feed_title: Option<String>,
    pub items: Vec<FeedItem>,
    /// New items, newest first.
    pub new_items: Vec<FeedItem>,
    pub next_watermark: Option<Watermark>,
}

pub struct FetchWorker {
    source: Arc<dyn FeedSource>,
    deadline: Duration,
}

impl FetchWorker {
    pub fn new(source: Arc<dyn FeedSource>, deadline: Duration) -> Self {
        Self { source, deadline }
    }

    pub fn http(config: FetchConfig) -> Result<Self> {
        let deadline = config.deadline;
        Ok(Self::new(Arc::new(HttpFeedSource::new(config)?), deadline))
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Fetch, parse and classify one feed within the deadline.
    pub async fn run(&self, request: FetchRequest) -> Result<FeedUpdate> {
        let source = Arc::clone(&self.source);
        let feed_url = request.feed_url.clone();

        let mut handle = tokio::spawn(async move {
            let feed = source.load(&request.feed_url).await?;
            let watermark = request.watermark();
            let classification = dedup::classify(
                &feed.items,
                watermark.as_ref(),
                request.previous_scan_time,
                Utc::now(),
            );

            Ok::<_, RelayError>(FeedUpdate {
                feed_title: feed.title,
                items: feed.items,
                new_items: classification.new_items,
                next_watermark: classification.next_watermark,
            })
        });

        match tokio::time::timeout(self.deadline, &mut handle).await {
            Ok(Ok(result)) => {
                debug!("Fetch worker finished for {}", feed_url);
                result
            }
            Ok(Err(join_error)) => Err(RelayError::WorkerCrash(describe_join_error(join_error))),
            Err(_) => {
                handle.abort();
                warn!("Fetch worker for {} exceeded {:?}, aborted", feed_url, self.deadline);
                Err(RelayError::FetchTimeout)
            }
        }
    }
}

fn describe_join_error(error: JoinError) -> String {
    if error.is_panic() {
        panic_message(error.into_panic())
    } else {
        error.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
