//! Gemtext (`text/gemini`) line parser and feed extraction.
//!
//! A gemtext feed is an ordinary page whose dated links are the entries:
//!
//! ```text
//! # My Gemlog
//! => 2023-05-01-hello.gmi 2023-05-01 Hello world
//! => /archive.gmi Archive
//! ```
//!
//! The first level-one heading becomes the title and every link whose label
//! starts with a `YYYY-MM-DD` date becomes an [`Item`].

use chrono::NaiveDate;
use url::Url;

use super::types::{Author, Feed, FeedKind, Item};

/// Number of label characters holding the entry date.
const DATE_PREFIX_LEN: usize = 10;

/// A single classified gemtext line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    Text(&'a str),
    Link { url: &'a str, name: &'a str },
    Heading1(&'a str),
    Heading2(&'a str),
    Heading3(&'a str),
    ListItem(&'a str),
    Quote(&'a str),
    /// A ```` ``` ```` fence; carries the alt text after the backticks.
    PreformatToggle(&'a str),
    Preformatted(&'a str),
}

/// Splits a gemtext document into classified lines.
///
/// Lines between preformat fences are never interpreted, so a `=>` inside a
/// code block stays [`Line::Preformatted`].
pub fn parse_lines(text: &str) -> Vec<Line<'_>> {
    let mut preformatted = false;
    let mut lines = Vec::new();

    for raw in text.lines() {
        if let Some(alt) = raw.strip_prefix("```") {
            preformatted = !preformatted;
            lines.push(Line::PreformatToggle(alt.trim()));
            continue;
        }
        if preformatted {
            lines.push(Line::Preformatted(raw));
            continue;
        }
        lines.push(classify(raw));
    }

    lines
}

fn classify(raw: &str) -> Line<'_> {
    if let Some(rest) = raw.strip_prefix("=>") {
        let rest = rest.trim_start();
        return match rest.find(char::is_whitespace) {
            Some(split) => Line::Link {
                url: &rest[..split],
                name: rest[split..].trim(),
            },
            None => Line::Link { url: rest, name: "" },
        };
    }
    if let Some(rest) = raw.strip_prefix("###") {
        return Line::Heading3(rest.trim_start());
    }
    if let Some(rest) = raw.strip_prefix("##") {
        return Line::Heading2(rest.trim_start());
    }
    if let Some(rest) = raw.strip_prefix('#') {
        return Line::Heading1(rest.trim_start());
    }
    if let Some(rest) = raw.strip_prefix("* ") {
        return Line::ListItem(rest);
    }
    if let Some(rest) = raw.strip_prefix('>') {
        return Line::Quote(rest);
    }
    Line::Text(raw)
}

/// Builds a [`Feed`] from a gemtext document fetched from `base`.
///
/// Links that do not start with a date are skipped silently: most gemlog
/// index pages mix entries with navigation links.
pub fn parse_gemtext(text: &str, base: &Url) -> Feed {
    let mut title: Option<&str> = None;
    let mut items = Vec::new();

    for line in parse_lines(text) {
        match line {
            Line::Heading1(heading) => {
                if title.is_none() && !heading.is_empty() {
                    title = Some(heading);
                }
            }
            Line::Link { url, name } => {
                if let Some(item) = item_from_link(base, url, name) {
                    items.push(item);
                }
            }
            Line::Text(_)
            | Line::Heading2(_)
            | Line::Heading3(_)
            | Line::ListItem(_)
            | Line::Quote(_)
            | Line::PreformatToggle(_)
            | Line::Preformatted(_) => {}
        }
    }

    Feed {
        title: title.unwrap_or_default().to_string(),
        description: None,
        link: base.to_string(),
        kind: FeedKind::Gemini,
        author: Author::default(),
        items,
    }
}

/// Turns a link line into an item when its label starts with a date.
fn item_from_link(base: &Url, url: &str, name: &str) -> Option<Item> {
    if name.chars().count() < DATE_PREFIX_LEN {
        return None;
    }
    let split = name
        .char_indices()
        .nth(DATE_PREFIX_LEN)
        .map(|(i, _)| i)
        .unwrap_or(name.len());

    let date = entry_date(&name[..split])?;
    let link = base.join(url).ok()?;
    let published = date.and_hms_opt(0, 0, 0)?.and_utc();

    Some(Item {
        title: name[split..].trim_start_matches([':', ' ']).to_string(),
        published,
        url: link.to_string(),
    })
}

/// Parses the date prefix of a link label, ignoring leading list punctuation.
pub fn entry_date(prefix: &str) -> Option<NaiveDate> {
    let trimmed = prefix.trim_start_matches([' ', '-', '\u{2014}']);
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()
}
