use chrono::{DateTime, Utc};

/// Which parser produced a [`Feed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    /// A gemtext document served as `text/gemini`.
    Gemini,
    /// RSS, Atom or JSON Feed.
    Syndication,
}

impl FeedKind {
    /// Value stored in the `feeds.kind` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Gemini => "gemini",
            FeedKind::Syndication => "rss",
        }
    }
}

/// A feed in canonical form, independent of the wire format it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub title: String,
    pub description: Option<String>,
    /// Link the feed advertises for itself; the source URL for gemtext.
    pub link: String,
    pub kind: FeedKind,
    pub author: Author,
    pub items: Vec<Item>,
}

/// One dated, linked entry of a feed.
///
/// `(title, published, url)` together with the owning feed is the
/// deduplication key used by the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    pub published: DateTime<Utc>,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub homepage: Option<String>,
    pub email: Option<String>,
    /// `<link>` elements declared inside the feed-level `<author>`.
    pub extensions: Vec<Extension>,
}

/// An author-level link such as a payment request or a view key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub rel: String,
    pub media_type: String,
    pub href: String,
}
