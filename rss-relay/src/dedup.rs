//! Novelty decisions for feed items.
//!
//! Everything here is pure: given the items of one fetch (newest first), the
//! stored watermark and the timestamp of the previous scan, decide which items
//! are new and what the watermark becomes.

use crate::types::{FeedItem, Watermark};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// New items in feed order (newest first).
    pub new_items: Vec<FeedItem>,
    pub next_watermark: Option<Watermark>,
}

pub fn classify(
    items: &[FeedItem],
    watermark: Option<&Watermark>,
    previous_scan: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Classification {
    Classification {
        new_items: find_new_items(items, watermark, previous_scan),
        next_watermark: next_watermark(items, watermark, now),
    }
}

/// Walk `items` from the newest and collect everything not seen yet.
///
/// With a timestamped watermark an item is new when it is strictly newer than
/// the watermark and is not the watermark item itself; the walk stops at the
/// first item that is either. Without one, the walk stops at the stored
/// identity or at the first item published at or before `previous_scan`. With
/// neither, every item is new.
pub fn find_new_items(
    items: &[FeedItem],
    watermark: Option<&Watermark>,
    previous_scan: Option<DateTime<Utc>>,
) -> Vec<FeedItem> {
    let last_identity = watermark.and_then(|w| w.last_item_identity.as_deref());
    let last_published = watermark.and_then(|w| w.last_published_at);

    let mut new_items = Vec::new();

    for item in items {
        let is_known = last_identity.is_some() && item.identity() == last_identity;

        match last_published {
            Some(last_published) => match item.published_at {
                Some(published) if published > last_published && !is_known => {
                    new_items.push(item.clone());
                }
                Some(_) => break,
                None if is_known => break,
                // Undated and unknown: cannot place it relative to the watermark
                None => continue,
            },
            None => {
                if let (Some(previous_scan), Some(published)) = (previous_scan, item.published_at) {
                    if published <= previous_scan {
                        break;
                    }
                }

                if is_known {
                    break;
                }

                new_items.push(item.clone());
            }
        }
    }

    new_items
}

/// Watermark derived from the newest item, clamped to `now`.
///
/// Returns `None` when the feed is empty or its newest item has no identity.
/// A candidate older than the current watermark leaves the current one in place.
pub fn next_watermark(
    items: &[FeedItem],
    current: Option<&Watermark>,
    now: DateTime<Utc>,
) -> Option<Watermark> {
    let newest = items.first()?;
    let identity = newest.identity()?;
    let published = newest.published_at.unwrap_or(now).min(now);

    if let Some(current_published) = current.and_then(|w| w.last_published_at) {
        if published < current_published {
            return current.cloned();
        }
    }

    Some(Watermark::new(identity, published))
}
