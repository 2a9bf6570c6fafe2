use crate::types::{FeedItem, ParsedFeed, RelayError, Result};
use crate::utils::html::extract_text_from_html;
use chrono::Utc;
use feed_rs::model::Entry;
use feed_rs::parser;
use tracing::debug;

/// Parses RSS, Atom and JSON feed documents into [`ParsedFeed`].
///
/// Item order is kept exactly as the document lists it; most sources publish
/// newest-first and the dedup walk relies on that.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedParser;

impl FeedParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_feed(&self, content: &[u8]) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        // Entries without a guid get an empty id instead of a generated hash so
        // that identity falls back to link and then title.
        let feed = parser::Builder::new()
            .id_generator(|_links, _title, _uri| String::new())
            .build()
            .parse(content)
            .map_err(|e| RelayError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content);
        let items: Vec<FeedItem> = feed.entries.into_iter().map(Self::parse_entry).collect();

        debug!("Parsed feed with {} entries", items.len());

        Ok(ParsedFeed { title, items })
    }

    fn parse_entry(entry: Entry) -> FeedItem {
        let guid = Some(entry.id).filter(|id| !id.is_empty());
        // Atom entries can list replies/self/edit links ahead of the article
        let link = entry
            .links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| entry.links.first())
            .map(|l| l.href.clone());
        let title = entry.title.map(|t| t.content);

        // Prefer the summary, fall back to the content body
        let content_snippet = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .map(|body| extract_text_from_html(&body))
            .filter(|snippet| !snippet.is_empty());

        let published_at = entry
            .published
            .or(entry.updated)
            .map(|dt| dt.with_timezone(&Utc));

        FeedItem {
            guid,
            link,
            title,
            content_snippet,
            published_at,
        }
    }
}
