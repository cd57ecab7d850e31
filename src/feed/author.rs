//! Author link extraction for XML feeds.
//!
//! feed-rs keeps an author's name, uri and email but drops any `<link>`
//! children of `<author>`. Payment declarations live in those links, so the
//! feed-level author is scanned a second time with quick-xml.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::types::Extension;

/// Nesting depth past which the scan stops.
const MAX_DEPTH: usize = 64;

/// Returns the `<link>` elements of the first feed-level `<author>`.
///
/// Authors nested inside `<entry>` or `<item>` are ignored. Malformed XML
/// ends the scan early and returns whatever was collected; the syndication
/// parser reports the document error itself.
pub fn author_extensions(bytes: &[u8]) -> Vec<Extension> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut author_depth: Option<usize> = None;
    let mut extensions = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) => {
                let name = element.local_name().as_ref().to_vec();
                if author_depth.is_some() {
                    if name == b"link" {
                        extensions.extend(extension_from(&reader, &element));
                    }
                } else if name == b"author" && !inside_entry(&stack) {
                    author_depth = Some(stack.len());
                }

                stack.push(name);
                if stack.len() > MAX_DEPTH {
                    tracing::warn!(depth = stack.len(), "Feed nesting too deep, author scan stopped");
                    break;
                }
            }
            Ok(Event::Empty(element)) => {
                if author_depth.is_some() && element.local_name().as_ref() == b"link" {
                    extensions.extend(extension_from(&reader, &element));
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
                if author_depth == Some(stack.len()) {
                    break;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Author scan stopped on malformed XML");
                break;
            }
            Ok(_) => {}
        }
        buf.clear();
    }

    extensions
}

fn inside_entry(stack: &[Vec<u8>]) -> bool {
    stack
        .iter()
        .any(|name| name.as_slice() == b"entry" || name.as_slice() == b"item")
}

/// Reads `rel`, `type` and `href` off a link element. Links without an
/// `href` carry nothing usable and are dropped.
fn extension_from(reader: &Reader<&[u8]>, element: &BytesStart<'_>) -> Option<Extension> {
    let mut rel = String::new();
    let mut media_type = String::new();
    let mut href = None;

    for attr in element.attributes().flatten() {
        let Ok(value) = attr.decode_and_unescape_value(reader.decoder()) else {
            continue;
        };
        match attr.key.local_name().as_ref() {
            b"rel" => rel = value.into_owned(),
            b"type" => media_type = value.into_owned(),
            b"href" => href = Some(value.into_owned()),
            _ => {}
        }
    }

    Some(Extension {
        rel,
        media_type,
        href: href?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_feed_level_author_links() {
        let xml = br#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Blog</title>
  <author>
    <name>Alice</name>
    <link rel="payment" type="application/monero-paymentrequest" href="monero:4abc"/>
    <link rel="payment" type="application/monero-viewkey" href="viewkey:00ff"></link>
  </author>
</feed>"#;

        assert_eq!(
            author_extensions(xml),
            vec![
                Extension {
                    rel: "payment".into(),
                    media_type: "application/monero-paymentrequest".into(),
                    href: "monero:4abc".into(),
                },
                Extension {
                    rel: "payment".into(),
                    media_type: "application/monero-viewkey".into(),
                    href: "viewkey:00ff".into(),
                },
            ]
        );
    }

    #[test]
    fn test_entry_authors_ignored() {
        let xml = br#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <author><name>Bob</name><link rel="payment" type="application/x-paymentrequest" href="x:1"/></author>
  </entry>
</feed>"#;

        assert!(author_extensions(xml).is_empty());
    }

    #[test]
    fn test_only_first_author_scanned() {
        let xml = br#"<feed>
  <author><link type="a/b" href="one:1"/></author>
  <author><link type="a/b" href="two:2"/></author>
</feed>"#;

        let links = author_extensions(xml);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].href, "one:1");
    }

    #[test]
    fn test_escaped_attributes_decoded() {
        let xml = br#"<feed><author><link type="application/x-paymentrequest" href="pay:a&amp;b"/></author></feed>"#;
        assert_eq!(author_extensions(xml)[0].href, "pay:a&b");
    }

    #[test]
    fn test_link_without_href_dropped() {
        let xml = br#"<feed><author><link rel="payment" type="a/b"/></author></feed>"#;
        assert!(author_extensions(xml).is_empty());
    }

    #[test]
    fn test_non_xml_input_yields_nothing() {
        assert!(author_extensions(br#"{"version": "https://jsonfeed.org/version/1.1"}"#).is_empty());
        assert!(author_extensions(b"<feed><author><link href=").is_empty());
    }
}
