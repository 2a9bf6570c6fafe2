use anyhow::Context;
use clap::Parser;
use rss_relay::{
    ChatQueue, ChatSink, ChatSource, ChatTask, Command, DeliveryPipeline, Enqueued, FetchWorker,
    InboundRouter, JsonStateStore, LlmAdapter, OpenAiCompatibleAdapter, RelayConfig, ScanCoordinator,
    Scheduler, StopFlag, TelegramSink, TelegramSource,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RelayConfig::parse().validate()?;
    let stop = StopFlag::new();

    let sink: Arc<dyn ChatSink> = Arc::new(TelegramSink::new(config.bot_token.clone())?);

    match config.command() {
        Command::Ask { chat, prompt } => ask(&config, sink, stop, chat, prompt).await,
        command => {
            let coordinator = Arc::new(build_coordinator(&config, sink.clone(), stop.clone()).await?);
            if command == Command::Scan {
                let outcome = coordinator.run_scan().await;
                info!("Single scan finished: {:?}", outcome);
                return Ok(());
            }

            let scheduler = Scheduler::new(coordinator, config.scheduler_config(), stop.clone());
            if config.no_inbound {
                info!("Inbound chat polling disabled");
            } else {
                let queue = build_queue(&config, sink.clone(), stop.clone())?;
                let router = InboundRouter::new(queue, scheduler.trigger_handle(), sink, stop.clone());
                match TelegramSource::connect(config.bot_token.clone(), config.bot_username.clone()).await {
                    Ok(source) => {
                        let source: Arc<dyn ChatSource> = Arc::new(source);
                        tokio::spawn(async move { router.run(source).await });
                    }
                    // Feed relaying does not depend on inbound messages
                    Err(e) => warn!("Inbound chat polling unavailable: {}", e),
                }
            }
            tokio::spawn(watch_signals(stop));

            info!(
                "rss-relay running: {} feeds, {} destinations",
                config.rss_urls.len(),
                config.group_ids.len()
            );
            scheduler.run().await;
            info!("rss-relay stopped");
            Ok(())
        }
    }
}

async fn build_coordinator(
    config: &RelayConfig,
    sink: Arc<dyn ChatSink>,
    stop: StopFlag,
) -> anyhow::Result<ScanCoordinator> {
    let store = JsonStateStore::new(config.data_file.clone());
    let initial = store
        .load()
        .await
        .with_context(|| format!("failed to load state from {:?}", config.data_file))?;

    let pacing = config.pacing();
    let worker = FetchWorker::http(config.fetch_config())?;
    let delivery = DeliveryPipeline::new(
        sink,
        config.group_ids.clone(),
        pacing.between_items,
        stop.clone(),
    );

    Ok(ScanCoordinator::new(
        config.rss_urls.clone(),
        worker,
        delivery,
        store,
        initial,
        pacing.between_feeds,
        stop,
    ))
}

fn build_queue(config: &RelayConfig, sink: Arc<dyn ChatSink>, stop: StopFlag) -> anyhow::Result<ChatQueue> {
    let provider: Arc<dyn LlmAdapter> = Arc::new(OpenAiCompatibleAdapter::new(
        config.llm_base_url.clone(),
        config.llm_api_key.clone(),
    )?);
    info!("Using completion provider {}", provider.adapter_name());

    Ok(ChatQueue::new(config.chat_queue_config(), provider, sink, stop))
}

async fn ask(
    config: &RelayConfig,
    sink: Arc<dyn ChatSink>,
    stop: StopFlag,
    chat: String,
    prompt: String,
) -> anyhow::Result<()> {
    let queue = build_queue(config, sink, stop.clone())?;
    tokio::spawn(watch_signals(stop));

    match queue.enqueue(ChatTask::new(chat, None, prompt)).await? {
        Enqueued::Next => info!("Prompt submitted"),
        Enqueued::Waiting { ahead } => info!("Prompt queued behind {} requests", ahead),
    }

    queue.wait_idle().await;
    Ok(())
}

/// Set the stop flag on Ctrl-C or SIGTERM.
async fn watch_signals(stop: StopFlag) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if !ctrl_c_received(result) {
                            return;
                        }
                    }
                    _ = terminate.recv() => info!("SIGTERM received, shutting down"),
                }
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                if !ctrl_c_received(tokio::signal::ctrl_c().await) {
                    return;
                }
            }
        }
    }

    #[cfg(not(unix))]
    if !ctrl_c_received(tokio::signal::ctrl_c().await) {
        return;
    }

    stop.stop();
}

fn ctrl_c_received(result: std::io::Result<()>) -> bool {
    match result {
        Ok(()) => {
            info!("Ctrl-C received, shutting down");
            true
        }
        Err(e) => {
            error!("Failed to listen for Ctrl-C: {}", e);
            false
        }
    }
}
