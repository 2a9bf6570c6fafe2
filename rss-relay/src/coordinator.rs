use crate::delivery::DeliveryPipeline;
use crate::persistence::{JsonStateStore, StateSnapshot};
use crate::shutdown::StopFlag;
use crate::types::{ErrorRecord, Result, ScanStats, Watermark};
use crate::utils::time::format_server_time;
use crate::worker::{FetchRequest, FetchWorker};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Another scan was already running.
    Skipped,
    Completed { new_items: usize, failed_feeds: usize },
    /// The stop flag cut the scan short; nothing was persisted.
    Stopped { new_items: usize },
}

impl ScanOutcome {
    pub fn new_items(&self) -> usize {
        match self {
            ScanOutcome::Skipped => 0,
            ScanOutcome::Completed { new_items, .. } | ScanOutcome::Stopped { new_items } => *new_items,
        }
    }
}

/// Runs one pass over every configured feed.
///
/// Feeds are processed strictly one after another. Watermarks and counters
/// live here for the process lifetime; the state file is written after every
/// scan that was not stopped.
pub struct ScanCoordinator {
    feeds: Vec<String>,
    worker: FetchWorker,
    delivery: DeliveryPipeline,
    store: JsonStateStore,
    stop: StopFlag,
    feed_pacing: Duration,
    scanning: AtomicBool,
    book: Mutex<StateSnapshot>,
}

/// Returns the coordinator to `Idle` however the scan ends.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ScanCoordinator {
    pub fn new(
        feeds: Vec<String>,
        worker: FetchWorker,
        delivery: DeliveryPipeline,
        store: JsonStateStore,
        initial: StateSnapshot,
        feed_pacing: Duration,
        stop: StopFlag,
    ) -> Self {
        Self {
            feeds,
            worker,
            delivery,
            store,
            stop,
            feed_pacing,
            scanning: AtomicBool::new(false),
            book: Mutex::new(initial),
        }
    }

    pub fn feeds(&self) -> &[String] {
        &self.feeds
    }

    pub fn state(&self) -> ScanState {
        if self.scanning.load(Ordering::SeqCst) {
            ScanState::Scanning
        } else {
            ScanState::Idle
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn stats(&self) -> ScanStats {
        self.book().stats.clone()
    }

    pub fn watermark(&self, feed_url: &str) -> Option<Watermark> {
        self.book().watermarks.get(feed_url).cloned()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.book().clone()
    }

    /// Scan every feed once. Returns [`ScanOutcome::Skipped`] if a scan is
    /// already in progress.
    pub async fn run_scan(&self) -> ScanOutcome {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Previous scan still in progress, skipping this one");
            return ScanOutcome::Skipped;
        }
        let _guard = ScanGuard(&self.scanning);

        self.scan_feeds().await
    }

    async fn scan_feeds(&self) -> ScanOutcome {
        let previous_scan = {
            let mut book = self.book();
            let previous_scan = book.stats.last_scan_time;
            book.stats.total_scans += 1;
            book.stats.last_scan_time = Some(Utc::now());
            previous_scan
        };

        info!("Scanning {} feeds", self.feeds.len());

        let mut new_items = 0;
        let mut failed_feeds = 0;

        for (index, feed_url) in self.feeds.iter().enumerate() {
            if self.stop.is_stopped() {
                info!(
                    "Stop requested, skipping {} remaining feeds",
                    self.feeds.len() - index
                );
                return ScanOutcome::Stopped { new_items };
            }

            match self.process_feed(feed_url, previous_scan).await {
                Ok(count) => new_items += count,
                Err(e) => {
                    failed_feeds += 1;
                    warn!("Failed to process feed {}: {}", feed_url, e);
                    if let Err(save_error) = self
                        .store
                        .append_error(ErrorRecord::now(feed_url.as_str(), e.to_string()))
                        .await
                    {
                        error!("Failed to record error for {}: {}", feed_url, save_error);
                    }
                }
            }

            if !self.feed_pacing.is_zero() {
                tokio::time::sleep(self.feed_pacing).await;
            }
        }

        if self.stop.is_stopped() {
            info!("Stop requested, scan state not persisted");
            return ScanOutcome::Stopped { new_items };
        }

        let snapshot = self.snapshot();
        if let Err(e) = self.store.save(&snapshot).await {
            error!("Failed to save state to {:?}: {}", self.store.path(), e);
        }

        info!(
            "[{}] Scan complete: {} new items, {} failed feeds",
            format_server_time(Utc::now()),
            new_items,
            failed_feeds
        );

        ScanOutcome::Completed {
            new_items,
            failed_feeds,
        }
    }

    /// Fetch one feed, advance its watermark and deliver what is new.
    async fn process_feed(
        &self,
        feed_url: &str,
        previous_scan: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let watermark = self.watermark(feed_url);
        let request = FetchRequest::new(feed_url, watermark.as_ref(), previous_scan);

        let update = self.worker.run(request).await?;

        let feed_title = update
            .feed_title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(feed_url)
            .to_string();

        if let Some(next) = update.next_watermark {
            self.book().watermarks.insert(feed_url.to_string(), next);
        }

        if update.new_items.is_empty() {
            info!(
                "[{}] No new items: {}",
                format_server_time(Utc::now()),
                feed_title
            );
            return Ok(0);
        }

        let count = update.new_items.len();
        info!("Found {} new items from {}", count, feed_title);

        // Scan order is newest first; deliver oldest first
        let mut chronological = update.new_items;
        chronological.reverse();

        let report = self.delivery.deliver(&chronological, &feed_title).await;
        self.book().stats.total_articles_sent += report.items_delivered as u64;

        if report.sends_failed > 0 {
            warn!(
                "{} of {} sends failed for {}",
                report.sends_failed, report.sends_attempted, feed_title
            );
        }

        Ok(count)
    }

    fn book(&self) -> MutexGuard<'_, StateSnapshot> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
