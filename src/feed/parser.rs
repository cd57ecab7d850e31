use feed_rs::parser;
use url::Url;

use super::author::author_extensions;
use super::fetcher::FetchError;
use super::gemtext::parse_gemtext;
use super::types::{Author, Feed, FeedKind, Item};

/// Result of parsing a feed body.
#[derive(Debug)]
pub struct ParseResult {
    pub feed: Feed,
    /// Syndication entries dropped for lacking a link or a date.
    pub skipped: usize,
}

/// Reduces a `Content-Type` or Gemini META value to its lowercase
/// `type/subtype`, dropping parameters.
///
/// Returns `None` when the value is not shaped like a media type.
pub fn media_type_essence(raw: &str) -> Option<String> {
    let essence = raw.split(';').next()?.trim().to_ascii_lowercase();
    let (kind, subtype) = essence.split_once('/')?;

    let valid = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$&-^_.+".contains(c))
    };
    if !valid(kind) || !valid(subtype) {
        return None;
    }
    Some(essence)
}

/// Parses a feed body according to its media type.
///
/// `source` is the URL the body was fetched from; gemtext links and relative
/// syndication links are resolved against it.
pub fn parse_feed(source: &Url, media_type: &str, body: &[u8]) -> Result<ParseResult, FetchError> {
    match media_type {
        "text/gemini" => {
            let text = String::from_utf8_lossy(body);
            Ok(ParseResult {
                feed: parse_gemtext(&text, source),
                skipped: 0,
            })
        }
        "text/xml" | "application/xml" | "application/rss+xml" | "application/atom+xml" => {
            let mut result = parse_syndication(source, body)?;
            result.feed.author.extensions = author_extensions(body);
            Ok(result)
        }
        "application/feed+json" => parse_syndication(source, body),
        "text/html" | "application/xhtml+xml" => Err(FetchError::NotImplemented(format!(
            "HTML feed extraction ({media_type})"
        ))),
        other => Err(FetchError::UnintelligibleContentType(other.to_string())),
    }
}

fn parse_syndication(source: &Url, body: &[u8]) -> Result<ParseResult, FetchError> {
    let parsed =
        parser::parse(body).map_err(|e| FetchError::MalformedSyndication(e.to_string()))?;

    let link = parsed
        .links
        .iter()
        .find(|l| l.rel.as_deref() != Some("self"))
        .or_else(|| parsed.links.first())
        .map(|l| l.href.clone())
        .unwrap_or_else(|| source.to_string());

    let author = parsed
        .authors
        .first()
        .map(|person| Author {
            name: person.name.clone(),
            homepage: person.uri.clone(),
            email: person.email.clone(),
            extensions: Vec::new(),
        })
        .unwrap_or_default();

    let mut skipped = 0;
    let mut items = Vec::with_capacity(parsed.entries.len());
    for entry in parsed.entries {
        let href = entry
            .links
            .iter()
            .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
            .or_else(|| entry.links.first())
            .and_then(|l| source.join(&l.href).ok());
        let published = entry.published.or(entry.updated);

        let (Some(url), Some(published)) = (href, published) else {
            skipped += 1;
            continue;
        };

        items.push(Item {
            title: entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string()),
            published,
            url: url.to_string(),
        });
    }

    Ok(ParseResult {
        feed: Feed {
            title: parsed.title.map(|t| t.content).unwrap_or_default(),
            description: parsed.description.map(|t| t.content),
            link,
            kind: FeedKind::Syndication,
            author,
            items,
        },
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn source() -> Url {
        Url::parse("https://blog.example/feed.xml").unwrap()
    }

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Alice's Blog</title>
  <subtitle>Notes</subtitle>
  <link rel="self" href="https://blog.example/feed.xml"/>
  <link href="https://blog.example/"/>
  <id>urn:uuid:1</id>
  <updated>2024-03-01T00:00:00Z</updated>
  <author>
    <name>Alice</name>
    <uri>https://blog.example/about</uri>
    <email>alice@blog.example</email>
    <link rel="payment" type="application/monero-paymentrequest" href="monero:4abc"/>
  </author>
  <entry>
    <title>First</title>
    <link href="/posts/1"/>
    <id>urn:uuid:2</id>
    <updated>2024-02-01T12:00:00Z</updated>
  </entry>
  <entry>
    <title>No link</title>
    <id>urn:uuid:3</id>
    <updated>2024-02-02T12:00:00Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn test_media_type_essence() {
        assert_eq!(
            media_type_essence("Text/Gemini; charset=utf-8").as_deref(),
            Some("text/gemini")
        );
        assert_eq!(
            media_type_essence("application/atom+xml").as_deref(),
            Some("application/atom+xml")
        );
        assert_eq!(media_type_essence(""), None);
        assert_eq!(media_type_essence("gemini"), None);
        assert_eq!(media_type_essence("text/"), None);
        assert_eq!(media_type_essence("text/ge mini"), None);
    }

    #[test]
    fn test_atom_feed() {
        let result = parse_feed(&source(), "application/atom+xml", ATOM.as_bytes()).unwrap();
        let feed = result.feed;

        assert_eq!(feed.title, "Alice's Blog");
        assert_eq!(feed.description.as_deref(), Some("Notes"));
        assert_eq!(feed.link, "https://blog.example/");
        assert_eq!(feed.kind, FeedKind::Syndication);
        assert_eq!(feed.author.name, "Alice");
        assert_eq!(feed.author.homepage.as_deref(), Some("https://blog.example/about"));
        assert_eq!(feed.author.email.as_deref(), Some("alice@blog.example"));
        assert_eq!(feed.author.extensions.len(), 1);
        assert_eq!(feed.author.extensions[0].href, "monero:4abc");

        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].title, "First");
        assert_eq!(feed.items[0].url, "https://blog.example/posts/1");
        assert_eq!(result.skipped, 1);
    }

    #[test]
    fn test_rss_item_without_date_skipped() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Podcast</title>
  <link>https://pod.example/</link>
  <description>Episodes</description>
  <item><title>Dated</title><link>https://pod.example/1</link><pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate></item>
  <item><title>Undated</title><link>https://pod.example/2</link></item>
</channel></rss>"#;

        let result = parse_feed(&source(), "application/rss+xml", rss.as_bytes()).unwrap();
        assert_eq!(result.feed.title, "Podcast");
        assert_eq!(result.feed.link, "https://pod.example/");
        assert_eq!(result.feed.items.len(), 1);
        assert_eq!(result.feed.items[0].url, "https://pod.example/1");
        assert_eq!(result.skipped, 1);
        assert!(result.feed.author.extensions.is_empty());
    }

    #[test]
    fn test_json_feed() {
        let json = r#"{
  "version": "https://jsonfeed.org/version/1.1",
  "title": "JSON Blog",
  "home_page_url": "https://json.example/",
  "items": [
    {"id": "1", "title": "Hello", "url": "https://json.example/hello", "date_published": "2024-01-05T10:00:00Z"}
  ]
}"#;

        let result = parse_feed(&source(), "application/feed+json", json.as_bytes()).unwrap();
        assert_eq!(result.feed.title, "JSON Blog");
        assert_eq!(result.feed.items.len(), 1);
        assert_eq!(result.feed.items[0].title, "Hello");
    }

    #[test]
    fn test_gemtext_dispatch() {
        let source = Url::parse("gemini://example/feed").unwrap();
        let result = parse_feed(&source, "text/gemini", b"# Log\n=> ./a 2023-05-01 A").unwrap();
        assert_eq!(result.feed.kind, FeedKind::Gemini);
        assert_eq!(result.feed.items.len(), 1);
    }

    #[test]
    fn test_malformed_xml() {
        let err = parse_feed(&source(), "application/xml", b"<not valid xml").unwrap_err();
        assert!(matches!(err, FetchError::MalformedSyndication(_)));
    }

    #[test]
    fn test_html_not_implemented() {
        let err = parse_feed(&source(), "text/html", b"<html></html>").unwrap_err();
        assert!(matches!(err, FetchError::NotImplemented(_)));
    }

    #[test]
    fn test_unknown_type() {
        let err = parse_feed(&source(), "image/png", b"\x89PNG").unwrap_err();
        assert!(matches!(err, FetchError::UnintelligibleContentType(t) if t == "image/png"));
    }
}
