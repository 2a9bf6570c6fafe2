/// Text processing utilities
pub mod text {
    use unicode_segmentation::UnicodeSegmentation;

    /// Marker appended to text that was cut short.
    pub const ELLIPSIS: &str = "...";

    /// Number of user-perceived characters (grapheme clusters) in `text`.
    pub fn grapheme_len(text: &str) -> usize {
        text.graphemes(true).count()
    }

    /// Truncate to at most `max_graphemes` user-perceived characters.
    ///
    /// Emoji sequences and combining marks count as a single character and are
    /// never split. Truncated text gets a trailing [`ELLIPSIS`].
    pub fn truncate_graphemes(text: &str, max_graphemes: usize) -> String {
        match text.grapheme_indices(true).nth(max_graphemes) {
            None => text.to_string(),
            Some((cut, _)) => format!("{}{}", &text[..cut], ELLIPSIS),
        }
    }

    /// Remove every `\r` and `\n`.
    pub fn strip_line_breaks(text: &str) -> String {
        text.chars().filter(|c| *c != '\r' && *c != '\n').collect()
    }
}

/// HTML helpers for feed content
pub mod html {
    /// Extract readable text from an HTML fragment.
    ///
    /// Tags are dropped, character references are decoded, runs of spaces
    /// collapse to one and line structure is kept.
    pub fn extract_text_from_html(html: &str) -> String {
        let stripped = html
            .chars()
            .fold((String::with_capacity(html.len()), false), |(mut text, in_tag), c| {
                match c {
                    '<' => (text, true),
                    '>' if in_tag => (text, false),
                    _ if !in_tag => {
                        text.push(c);
                        (text, in_tag)
                    }
                    _ => (text, in_tag),
                }
            })
            .0;

        let decoded = decode_entities(&stripped);

        decoded
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Longest entity name we try to decode, e.g. `#x1F600`.
    const MAX_ENTITY_LEN: usize = 10;

    /// Decode named and numeric character references in one pass.
    ///
    /// Unknown or malformed references are left as they are.
    pub fn decode_entities(text: &str) -> String {
        let mut decoded = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(amp) = rest.find('&') {
            decoded.push_str(&rest[..amp]);
            let tail = &rest[amp + 1..];

            let entity = tail
                .find(';')
                .filter(|end| *end <= MAX_ENTITY_LEN)
                .and_then(|end| decode_entity(&tail[..end]).map(|c| (c, end)));

            match entity {
                Some((c, end)) => {
                    decoded.push(c);
                    rest = &tail[end + 1..];
                }
                None => {
                    decoded.push('&');
                    rest = tail;
                }
            }
        }

        decoded.push_str(rest);
        decoded
    }

    fn decode_entity(name: &str) -> Option<char> {
        if let Some(number) = name.strip_prefix('#') {
            return parse_numeric_entity(number).and_then(char::from_u32);
        }

        let c = match name {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            "nbsp" => ' ',
            "mdash" => '\u{2014}',
            "ndash" => '\u{2013}',
            "hellip" => '\u{2026}',
            "lsquo" => '\u{2018}',
            "rsquo" => '\u{2019}',
            "ldquo" => '\u{201C}',
            "rdquo" => '\u{201D}',
            "laquo" => '\u{00AB}',
            "raquo" => '\u{00BB}',
            "bull" => '\u{2022}',
            "middot" => '\u{00B7}',
            "copy" => '\u{00A9}',
            "reg" => '\u{00AE}',
            "trade" => '\u{2122}',
            "deg" => '\u{00B0}',
            "euro" => '\u{20AC}',
            "pound" => '\u{00A3}',
            "times" => '\u{00D7}',
            _ => return None,
        };
        Some(c)
    }

    /// `123` or `x7B`, the part after `&#`.
    fn parse_numeric_entity(number: &str) -> Option<u32> {
        match number.strip_prefix('x').or_else(|| number.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => number.parse().ok(),
        }
    }

    /// Heuristic: does `text` look like an HTML/XML document or fragment?
    pub fn looks_like_markup(text: &str) -> bool {
        let lower = text.trim_start().to_lowercase();
        if lower.starts_with("<!doctype") || lower.starts_with("<?xml") {
            return true;
        }

        ["<html", "<head", "<body", "<title", "<div", "<center", "<h1", "<p>", "</"]
            .iter()
            .any(|needle| lower.contains(needle))
    }
}

/// Time utilities
pub mod time {
    use chrono::{DateTime, Local, Utc};

    /// Server-local wall clock rendering used in log lines, e.g. `2025-07-10 15:30:45`.
    pub fn format_server_time(at: DateTime<Utc>) -> String {
        at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
