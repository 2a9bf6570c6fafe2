//! Command-line and environment configuration.

use crate::chat_queue::ChatQueueConfig;
use crate::fetcher::validate_feed_url;
use crate::scheduler::SchedulerConfig;
use crate::types::{FetchConfig, Pacing, RelayError, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "rss-relay")]
#[command(about = "Relays new RSS items to Telegram chats and answers chat prompts")]
#[command(version)]
pub struct RelayConfig {
    /// Telegram bot token.
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    pub bot_token: String,

    /// Feeds to watch, comma separated.
    #[arg(long, env = "RSS_URLS", value_delimiter = ',', required = true)]
    pub rss_urls: Vec<String>,

    /// Chats that receive new items, comma separated. Group ids are negative.
    #[arg(
        long,
        env = "GROUP_IDS",
        value_delimiter = ',',
        required = true,
        allow_hyphen_values = true
    )]
    pub group_ids: Vec<String>,

    /// Minutes between scans.
    #[arg(long, env = "SCAN_INTERVAL", default_value_t = 30)]
    pub scan_interval: u64,

    #[arg(long, env = "DATA_FILE", default_value = "rss_data.json")]
    pub data_file: PathBuf,

    #[arg(long, env = "LLM_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub llm_base_url: String,

    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini")]
    pub llm_model: String,

    #[arg(long, env = "LLM_SYSTEM_PROMPT")]
    pub llm_system_prompt: Option<String>,

    /// Bot username used to spot mentions in groups; looked up with getMe when unset.
    #[arg(long, env = "BOT_USERNAME")]
    pub bot_username: Option<String>,

    /// Do not poll Telegram for prompts and refresh requests.
    #[arg(long, env = "NO_INBOUND")]
    pub no_inbound: bool,

    /// Seconds to wait for one completion.
    #[arg(long, env = "CHAT_TIMEOUT", default_value_t = 30)]
    pub chat_timeout: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Scan on a schedule until interrupted (default)
    Run,
    /// Scan every feed once and exit
    Scan,
    /// Send one prompt to the completion provider and relay the answer
    Ask {
        /// Chat that receives the answer
        #[arg(long, allow_hyphen_values = true)]
        chat: String,
        prompt: String,
    },
}

impl RelayConfig {
    /// Trim list entries, drop empty ones and check what clap cannot.
    pub fn validate(mut self) -> Result<Self> {
        self.rss_urls = clean_list(self.rss_urls);
        self.group_ids = clean_list(self.group_ids);

        if self.bot_token.trim().is_empty() {
            return Err(RelayError::Config("BOT_TOKEN must not be empty".to_string()));
        }
        if self.rss_urls.is_empty() {
            return Err(RelayError::Config("RSS_URLS must list at least one feed".to_string()));
        }
        if self.group_ids.is_empty() {
            return Err(RelayError::Config(
                "GROUP_IDS must list at least one chat".to_string(),
            ));
        }
        if self.scan_interval == 0 {
            return Err(RelayError::Config("SCAN_INTERVAL must be at least 1 minute".to_string()));
        }
        if self.chat_timeout == 0 {
            return Err(RelayError::Config("CHAT_TIMEOUT must be at least 1 second".to_string()));
        }

        for url in &self.rss_urls {
            validate_feed_url(url)
                .map_err(|e| RelayError::Config(format!("invalid feed URL {}: {}", url, e)))?;
        }

        Ok(self)
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig::default()
    }

    pub fn pacing(&self) -> Pacing {
        Pacing::default()
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.scan_interval * 60),
            ..SchedulerConfig::default()
        }
    }

    pub fn chat_queue_config(&self) -> ChatQueueConfig {
        ChatQueueConfig {
            model: self.llm_model.clone(),
            system_prompt: self
                .llm_system_prompt
                .clone()
                .filter(|p| !p.trim().is_empty()),
            call_timeout: Duration::from_secs(self.chat_timeout),
            task_pacing: self.pacing().between_tasks,
            ..ChatQueueConfig::default()
        }
    }
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}
