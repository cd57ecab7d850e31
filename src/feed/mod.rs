//! Feed retrieval and parsing.
//!
//! - **Fetching**: Gemini (TLS on port 1965) and HTTPS transports with a
//!   timeout and a body size ceiling
//! - **Parsing**: gemtext, RSS, Atom and JSON Feed into one canonical [`Feed`]
//! - **Batch sync**: refetch and reindex stored feeds, one transaction each
//!
//! # Example
//!
//! ```ignore
//! use gemmit::feed::{FetchSettings, Fetcher};
//!
//! let fetcher = Fetcher::new(FetchSettings::default())?;
//! let feed = fetcher.fetch_feed(&"gemini://example.org/gemlog/".parse()?).await?;
//! println!("{} has {} entries", feed.title, feed.items.len());
//! ```

mod author;
mod fetcher;
pub mod gemini;
pub mod gemtext;
mod parser;
mod sync;
mod types;

pub use fetcher::{FetchError, FetchSettings, Fetcher, RawFeedPayload};
pub use parser::{media_type_essence, parse_feed, ParseResult};
pub use sync::{sync_feeds, RefreshError, RefreshResult};
pub use types::{Author, Extension, Feed, FeedKind, Item};
