use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Most recent item seen for one feed.
///
/// Persisted as `{"identity": ..., "publishedAt": ...}`. Older data files stored
/// only the identity string; those load as identity-only watermarks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredWatermark")]
pub struct Watermark {
    #[serde(rename = "identity")]
    pub last_item_identity: Option<String>,
    #[serde(rename = "publishedAt")]
    pub last_published_at: Option<DateTime<Utc>>,
}

impl Watermark {
    pub fn new(identity: impl Into<String>, published_at: DateTime<Utc>) -> Self {
        Self {
            last_item_identity: Some(identity.into()),
            last_published_at: Some(published_at),
        }
    }

    pub fn identity_only(identity: impl Into<String>) -> Self {
        Self {
            last_item_identity: Some(identity.into()),
            last_published_at: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredWatermark {
    Full {
        identity: Option<String>,
        #[serde(rename = "publishedAt")]
        published_at: Option<DateTime<Utc>>,
    },
    Legacy(String),
}

impl From<StoredWatermark> for Watermark {
    fn from(stored: StoredWatermark) -> Self {
        match stored {
            StoredWatermark::Full { identity, published_at } => Self {
                last_item_identity: identity.filter(|id| !id.is_empty()),
                last_published_at: published_at,
            },
            StoredWatermark::Legacy(identity) if identity.is_empty() => Self::default(),
            StoredWatermark::Legacy(identity) => Self::identity_only(identity),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    #[serde(default)]
    pub total_scans: u64,
    #[serde(default)]
    pub total_articles_sent: u64,
    #[serde(default)]
    pub last_scan_time: Option<DateTime<Utc>>,
}

/// One entry of the persisted error journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(alias = "url")]
    pub feed: String,
    #[serde(alias = "error")]
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn now(feed: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            feed: feed.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A single entry of a parsed feed, newest-first order is preserved by the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub guid: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub content_snippet: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl FeedItem {
    /// First non-empty of guid, link, title.
    pub fn identity(&self) -> Option<&str> {
        [&self.guid, &self.link, &self.title]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .find(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub items: Vec<FeedItem>,
}

/// A completion request waiting in the chat queue.
#[derive(Debug, Clone)]
pub struct ChatTask {
    pub id: Uuid,
    pub destination: String,
    /// Message the answer is addressed to.
    pub reply_to: Option<i64>,
    pub prompt: String,
    pub submitted_at: DateTime<Utc>,
}

impl ChatTask {
    pub fn new(destination: impl Into<String>, reply_to: Option<i64>, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            destination: destination.into(),
            reply_to,
            prompt: prompt.into(),
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    /// Timeout for the HTTP request itself.
    pub timeout_seconds: u64,
    /// Hard deadline for the whole fetch worker (request, parse and classify).
    pub deadline: Duration,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("rss-relay/{}", env!("CARGO_PKG_VERSION")),
            timeout_seconds: 10,
            deadline: Duration::from_secs(30),
            max_feed_size_mb: 10,
            max_redirects: 5,
        }
    }
}

/// Fixed waits between outbound operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub between_feeds: Duration,
    pub between_items: Duration,
    pub between_tasks: Duration,
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            between_feeds: Duration::ZERO,
            between_items: Duration::ZERO,
            between_tasks: Duration::ZERO,
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            between_feeds: Duration::from_secs(2),
            between_items: Duration::from_millis(1500),
            between_tasks: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("fetch timeout")]
    FetchTimeout,

    #[error("{0}")]
    FetchFailure(String),

    #[error("fetch worker crashed: {0}")]
    WorkerCrash(String),

    #[error("delivery to {destination} failed: {reason}")]
    DeliveryFailure { destination: String, reason: String },

    #[error("queue full ({capacity} requests pending)")]
    QueueFull { capacity: usize },

    #[error("shutting down, request not accepted")]
    ShuttingDown,

    #[error("completion provider timed out after {0:?}")]
    ProviderTimeout(Duration),

    #[error("completion provider failed: {message}")]
    ProviderFailure { status: Option<u16>, message: String },

    #[error("chat API error: {0}")]
    ChatApi(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
