pub mod types;
pub mod utils;
pub mod parser;
pub mod fetcher;
pub mod dedup;
pub mod worker;
pub mod persistence;
pub mod shutdown;
pub mod delivery;
pub mod telegram;
pub mod llm_adapter;
pub mod chat_queue;
pub mod inbound;
pub mod coordinator;
pub mod scheduler;
pub mod config;

pub use types::*;
pub use parser::FeedParser;
pub use fetcher::Fetcher;
pub use worker::{FeedSource, FeedUpdate, FetchRequest, FetchWorker, HttpFeedSource};
pub use persistence::{JsonStateStore, StateSnapshot};
pub use shutdown::StopFlag;
pub use delivery::{ChatSink, DeliveryPipeline, DeliveryReport, OutboundMessage};
pub use telegram::{TelegramSink, TelegramSource};
pub use llm_adapter::{CompletionRequest, LlmAdapter, OpenAiCompatibleAdapter};
pub use chat_queue::{ChatQueue, ChatQueueConfig, Enqueued};
pub use inbound::{ChatSource, InboundEvent, InboundRouter};
pub use coordinator::{ScanCoordinator, ScanOutcome, ScanState};
pub use scheduler::{ScanTrigger, Scheduler, SchedulerConfig};
pub use config::{Command, RelayConfig};
