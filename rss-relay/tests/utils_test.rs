use pretty_assertions::assert_eq;
use rss_relay::utils::html::{decode_entities, extract_text_from_html, looks_like_markup};
use rss_relay::utils::text::{grapheme_len, strip_line_breaks, truncate_graphemes};

#[test]
fn html_is_reduced_to_text() {
    let html = "<p>Fish &amp; chips</p>\n<p>  served   <em>hot</em>&nbsp;today </p>";

    assert_eq!(extract_text_from_html(html), "Fish & chips\nserved hot today");
}

#[test]
fn markup_detection() {
    assert!(looks_like_markup("<!DOCTYPE html><html></html>"));
    assert!(looks_like_markup("  <?xml version=\"1.0\"?><error/>"));
    assert!(looks_like_markup("Error: <center>nginx</center>"));
    assert!(!looks_like_markup("invalid api key"));
    assert!(!looks_like_markup("temperature must be < 2"));
}

#[test]
fn truncation_counts_graphemes() {
    let flag = "\u{1F1F3}\u{1F1F4}";
    let text = format!("{}{}{}", flag, flag, flag);

    assert_eq!(grapheme_len(&text), 3);
    assert_eq!(truncate_graphemes(&text, 3), text);
    assert_eq!(truncate_graphemes(&text, 2), format!("{}{}...", flag, flag));
    assert_eq!(truncate_graphemes("e\u{301}tude", 1), "e\u{301}...");
}

#[test]
fn line_breaks_are_stripped() {
    assert_eq!(strip_line_breaks("a\r\nb\nc"), "abc");
}

#[test]
fn numeric_and_named_entities_are_decoded() {
    assert_eq!(decode_entities("It&#8217;s here"), "It\u{2019}s here");
    assert_eq!(decode_entities("It&#x2019;s &#X2019;"), "It\u{2019}s \u{2019}");
    assert_eq!(decode_entities("a &mdash; b &hellip;"), "a \u{2014} b \u{2026}");
    assert_eq!(decode_entities("&quot;q&quot; &apos;a&apos;"), "\"q\" 'a'");
}

#[test]
fn entities_are_decoded_once() {
    assert_eq!(decode_entities("&amp;lt;"), "&lt;");
    assert_eq!(decode_entities("&amp;#39;"), "&#39;");
}

#[test]
fn unknown_or_broken_entities_stay_raw() {
    assert_eq!(decode_entities("&foo; & bar"), "&foo; & bar");
    assert_eq!(decode_entities("AT&T rocks"), "AT&T rocks");
    assert_eq!(decode_entities("&#xZZ; &#1114112;"), "&#xZZ; &#1114112;");
    assert_eq!(decode_entities("trailing &amp"), "trailing &amp");
}

#[test]
fn snippets_keep_curly_quotes_from_feeds() {
    let html = "<p>It&#8217;s here &mdash; now</p>";

    assert_eq!(extract_text_from_html(html), "It\u{2019}s here \u{2014} now");
}
