mod common;

use common::{feed, init_tracing, item, minutes_after, t0, FeedScript, ScriptedSource};
use pretty_assertions::assert_eq;
use rss_relay::{FetchConfig, FetchRequest, FetchWorker, RelayError, Watermark};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example News</title>
    <link>https://news.example.com</link>
    <description>Latest stories</description>
    <item>
      <title>Third story</title>
      <link>https://news.example.com/3</link>
      <guid>story-3</guid>
      <description>&lt;p&gt;Third &lt;b&gt;body&lt;/b&gt;&lt;/p&gt;</description>
      <pubDate>Fri, 01 Mar 2024 12:30:00 GMT</pubDate>
    </item>
    <item>
      <title>Second story</title>
      <link>https://news.example.com/2</link>
      <guid>story-2</guid>
      <description>Second body</description>
      <pubDate>Fri, 01 Mar 2024 12:10:00 GMT</pubDate>
    </item>
    <item>
      <title>First story</title>
      <link>https://news.example.com/1</link>
      <description>No guid on this one</description>
      <pubDate>Fri, 01 Mar 2024 12:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

const SAMPLE_ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Blog</title>
  <id>urn:example:blog</id>
  <updated>2024-03-01T12:30:00Z</updated>
  <entry>
    <title>Threaded post</title>
    <id>urn:example:post-2</id>
    <link rel="replies" type="application/atom+xml" href="https://blog.example.com/2/comments.xml"/>
    <link rel="self" href="https://blog.example.com/api/2"/>
    <link rel="alternate" type="text/html" href="https://blog.example.com/2"/>
    <published>2024-03-01T12:30:00Z</published>
    <updated>2024-03-01T12:35:00Z</updated>
    <summary type="html">&lt;p&gt;It&amp;#8217;s here &amp;mdash; now&lt;/p&gt;</summary>
  </entry>
  <entry>
    <title>Plain post</title>
    <id>urn:example:post-1</id>
    <link href="https://blog.example.com/1"/>
    <updated>2024-03-01T12:00:00Z</updated>
    <content type="html">&lt;p&gt;Only content here&lt;/p&gt;</content>
  </entry>
</feed>"#;

const SAMPLE_JSON_FEED: &str = r#"{
  "version": "https://jsonfeed.org/version/1.1",
  "title": "Example JSON",
  "items": [
    {
      "id": "j-2",
      "url": "https://json.example.com/2",
      "title": "Second entry",
      "content_html": "<p>Second <em>entry</em></p>",
      "date_published": "2024-03-01T12:10:00Z"
    },
    {
      "id": "j-1",
      "url": "https://json.example.com/1",
      "title": "First entry",
      "content_text": "First entry",
      "date_published": "2024-03-01T12:00:00Z"
    }
  ]
}"#;

async fn serve(server: &MockServer, route: &str, content_type: &str, body: &str) -> String {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", content_type)
                .set_body_string(body),
        )
        .mount(server)
        .await;
    format!("{}{}", server.uri(), route)
}

fn scripted_worker(source: ScriptedSource, deadline: Duration) -> FetchWorker {
    FetchWorker::new(Arc::new(source), deadline)
}

#[tokio::test]
async fn worker_classifies_served_feed() {
    init_tracing();

    let base = t0();
    let source = ScriptedSource::new().with(
        "https://a.example/feed",
        FeedScript::Serve(feed(
            "Feed A",
            vec![
                item("x5", Some(minutes_after(base, 30))),
                item("x4", Some(minutes_after(base, 10))),
                item("x3", Some(base)),
            ],
        )),
    );
    let worker = scripted_worker(source, Duration::from_secs(5));
    let watermark = Watermark::new("x3", base);

    let update = worker
        .run(FetchRequest::new("https://a.example/feed", Some(&watermark), None))
        .await
        .unwrap();

    assert_eq!(update.feed_title.as_deref(), Some("Feed A"));
    assert_eq!(update.items.len(), 3);
    let new: Vec<_> = update.new_items.iter().filter_map(|i| i.guid.clone()).collect();
    assert_eq!(new, vec!["x5", "x4"]);
    assert_eq!(
        update.next_watermark,
        Some(Watermark::new("x5", minutes_after(base, 30)))
    );
}

#[tokio::test]
async fn hung_fetch_times_out_at_deadline() {
    init_tracing();

    let source = ScriptedSource::new().with("https://slow.example/feed", FeedScript::Hang);
    let worker = scripted_worker(source, Duration::from_millis(100));

    let started = Instant::now();
    let result = worker
        .run(FetchRequest::new("https://slow.example/feed", None, None))
        .await;

    assert!(matches!(result, Err(RelayError::FetchTimeout)));
    assert_eq!(result.unwrap_err().to_string(), "fetch timeout");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn slow_blocking_parse_still_times_out_at_deadline() {
    init_tracing();

    let source = ScriptedSource::new().with(
        "https://huge.example/feed",
        FeedScript::SlowParse(Duration::from_secs(2)),
    );
    let worker = scripted_worker(source, Duration::from_millis(100));

    let started = Instant::now();
    let result = worker
        .run(FetchRequest::new("https://huge.example/feed", None, None))
        .await;

    // The blocking thread keeps running; the caller does not wait for it
    assert!(matches!(result, Err(RelayError::FetchTimeout)));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn panicking_fetch_reports_worker_crash() {
    init_tracing();

    let source = ScriptedSource::new().with("https://boom.example/feed", FeedScript::Panic);
    let worker = scripted_worker(source, Duration::from_secs(5));

    let result = worker
        .run(FetchRequest::new("https://boom.example/feed", None, None))
        .await;

    match result {
        Err(RelayError::WorkerCrash(message)) => assert!(message.contains("parser blew up")),
        other => panic!("expected a worker crash, got {:?}", other),
    }
}

#[tokio::test]
async fn fetch_failure_is_passed_through() {
    init_tracing();

    let source = ScriptedSource::new().with(
        "https://down.example/feed",
        FeedScript::Fail("HTTP 503: Service Unavailable".to_string()),
    );
    let worker = scripted_worker(source, Duration::from_secs(5));

    let error = worker
        .run(FetchRequest::new("https://down.example/feed", None, None))
        .await
        .unwrap_err();

    assert_eq!(error.to_string(), "HTTP 503: Service Unavailable");
}

#[tokio::test]
async fn http_worker_fetches_and_parses_rss() {
    init_tracing();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(SAMPLE_RSS),
        )
        .mount(&server)
        .await;

    let worker = FetchWorker::http(FetchConfig::default()).unwrap();
    let url = format!("{}/feed.xml", server.uri());
    let watermark = Watermark::new("story-2", minutes_after(t0(), 10));

    let update = worker
        .run(FetchRequest::new(url, Some(&watermark), None))
        .await
        .unwrap();

    assert_eq!(update.feed_title.as_deref(), Some("Example News"));
    assert_eq!(update.items.len(), 3);

    let newest = &update.items[0];
    assert_eq!(newest.guid.as_deref(), Some("story-3"));
    assert_eq!(newest.link.as_deref(), Some("https://news.example.com/3"));
    assert_eq!(newest.content_snippet.as_deref(), Some("Third body"));
    assert_eq!(newest.published_at, Some(minutes_after(t0(), 30)));

    // No guid: identity falls back to the link
    assert_eq!(update.items[2].guid, None);
    assert_eq!(update.items[2].identity(), Some("https://news.example.com/1"));

    assert_eq!(update.new_items.len(), 1);
    assert_eq!(update.new_items[0].guid.as_deref(), Some("story-3"));
    assert_eq!(
        update.next_watermark,
        Some(Watermark::new("story-3", minutes_after(t0(), 30)))
    );
}

#[tokio::test]
async fn atom_entries_link_to_the_alternate_page() {
    init_tracing();

    let server = MockServer::start().await;
    let url = serve(&server, "/atom.xml", "application/atom+xml", SAMPLE_ATOM).await;
    let worker = FetchWorker::http(FetchConfig::default()).unwrap();

    let update = worker.run(FetchRequest::new(url, None, None)).await.unwrap();

    assert_eq!(update.feed_title.as_deref(), Some("Example Blog"));
    assert_eq!(update.items.len(), 2);

    let threaded = &update.items[0];
    assert_eq!(threaded.guid.as_deref(), Some("urn:example:post-2"));
    assert_eq!(threaded.link.as_deref(), Some("https://blog.example.com/2"));
    assert_eq!(
        threaded.content_snippet.as_deref(),
        Some("It\u{2019}s here \u{2014} now")
    );
    assert_eq!(threaded.published_at, Some(minutes_after(t0(), 30)));

    let plain = &update.items[1];
    assert_eq!(plain.link.as_deref(), Some("https://blog.example.com/1"));
    assert_eq!(plain.content_snippet.as_deref(), Some("Only content here"));
    assert_eq!(plain.published_at, Some(t0()));
}

#[tokio::test]
async fn json_feed_items_are_parsed_in_order() {
    init_tracing();

    let server = MockServer::start().await;
    let url = serve(&server, "/feed.json", "application/feed+json", SAMPLE_JSON_FEED).await;
    let worker = FetchWorker::http(FetchConfig::default()).unwrap();

    let update = worker.run(FetchRequest::new(url, None, None)).await.unwrap();

    assert_eq!(update.feed_title.as_deref(), Some("Example JSON"));
    let guids: Vec<_> = update.items.iter().filter_map(|i| i.guid.clone()).collect();
    assert_eq!(guids, vec!["j-2", "j-1"]);
    assert_eq!(update.items[0].link.as_deref(), Some("https://json.example.com/2"));
    assert_eq!(update.items[0].content_snippet.as_deref(), Some("Second entry"));
    assert_eq!(update.items[0].published_at, Some(minutes_after(t0(), 10)));
}

#[tokio::test]
async fn http_error_status_is_a_fetch_failure() {
    init_tracing();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let worker = FetchWorker::http(FetchConfig::default()).unwrap();
    let error = worker
        .run(FetchRequest::new(format!("{}/gone.xml", server.uri()), None, None))
        .await
        .unwrap_err();

    assert_eq!(error.to_string(), "HTTP 404: Not Found");
}

#[tokio::test]
async fn malformed_document_is_a_parse_error() {
    init_tracing();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("this is not a feed"))
        .mount(&server)
        .await;

    let worker = FetchWorker::http(FetchConfig::default()).unwrap();
    let result = worker
        .run(FetchRequest::new(format!("{}/broken.xml", server.uri()), None, None))
        .await;

    assert!(matches!(result, Err(RelayError::Parse(_))));
}

#[tokio::test]
async fn non_http_urls_are_rejected() {
    let worker = FetchWorker::http(FetchConfig::default()).unwrap();

    let result = worker
        .run(FetchRequest::new("ftp://files.example/feed.xml", None, None))
        .await;

    assert!(matches!(result, Err(RelayError::FetchFailure(_))));
}
