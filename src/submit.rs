//! The interactive "add feed" path.
//!
//! A user behind a client certificate submits a feed URL. The feed is
//! fetched, its author's payment declarations validated, and everything
//! stored in one transaction. Failures become a Gemini response the server
//! writes back unchanged.

use thiserror::Error;
use url::Url;

use crate::feed::{FetchError, Fetcher};
use crate::payment::{extract_payment_accounts, PaymentError};
use crate::storage::{
    index_items, insert_author, insert_feed, insert_payment_account, record_submission, Database,
    DatabaseError, Identity,
};

/// A Gemini response header, ready to be written as `<STATUS> <META>\r\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// 10: ask the client for input again.
    Input(String),
    /// 30: send the client elsewhere.
    Redirect(String),
    /// 40: server-side failure; meta carries no internal detail.
    TemporaryFailure(String),
}

impl Response {
    pub fn status(&self) -> u8 {
        match self {
            Response::Input(_) => 10,
            Response::Redirect(_) => 30,
            Response::TemporaryFailure(_) => 40,
        }
    }

    pub fn meta(&self) -> &str {
        match self {
            Response::Input(meta) | Response::Redirect(meta) | Response::TemporaryFailure(meta) => {
                meta
            }
        }
    }

    /// The full header line including CRLF.
    pub fn header(&self) -> String {
        format!("{} {}\r\n", self.status(), self.meta())
    }
}

#[derive(Debug, Error)]
pub enum AddFeedError {
    #[error("{0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error("Feed already exists")]
    DuplicateFeed,
    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

impl AddFeedError {
    /// Maps the error to what the submitting client sees.
    ///
    /// Storage errors are logged by [`add_feed`] and never shown.
    pub fn response(&self) -> Response {
        match self {
            AddFeedError::DuplicateFeed => Response::Input("Feed already exists".to_string()),
            AddFeedError::Storage(_) => Response::TemporaryFailure("Internal server error".to_string()),
            other => Response::Input(format!("{other}: Try again")),
        }
    }
}

/// What a successful add stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedFeed {
    pub feed_id: i64,
    pub author_id: i64,
    pub payment_accounts: usize,
    pub items_indexed: u64,
}

impl AddedFeed {
    pub fn response(&self) -> Response {
        Response::Redirect("/".to_string())
    }
}

/// Adds the feed at `raw_url` on behalf of `identity`.
///
/// The source-URL lookup before fetching only saves a network round trip;
/// the unique constraint checked inside the transaction is what rejects a
/// duplicate that raced in meanwhile. Any failure after the transaction
/// opens leaves no author, account, feed, submission or item behind.
pub async fn add_feed(
    db: &Database,
    fetcher: &Fetcher,
    identity: &Identity,
    raw_url: &str,
) -> Result<AddedFeed, AddFeedError> {
    let url = Url::parse(raw_url.trim())?;
    if db.feed_exists(url.as_str()).await? {
        return Err(AddFeedError::DuplicateFeed);
    }

    let feed = fetcher.fetch_feed(&url).await?;
    let candidates = extract_payment_accounts(&feed.author.extensions)?;

    let mut tx = db.begin().await?;

    let author_id = insert_author(&mut tx, &feed.author).await?;
    for candidate in &candidates {
        insert_payment_account(&mut tx, author_id, candidate.as_new_account()).await?;
    }
    let feed_id = insert_feed(&mut tx, author_id, url.as_str(), &feed)
        .await?
        .ok_or(AddFeedError::DuplicateFeed)?;
    record_submission(&mut tx, identity.id, feed_id).await?;
    let items_indexed = index_items(&mut tx, feed_id, &feed.items).await?;

    tx.commit().await.map_err(DatabaseError::from)?;

    tracing::info!(
        feed_id = feed_id,
        url = %url,
        identity_id = identity.id,
        accounts = candidates.len(),
        items = items_indexed,
        "Feed added"
    );

    Ok(AddedFeed {
        feed_id,
        author_id,
        payment_accounts: candidates.len(),
        items_indexed,
    })
}

/// Runs an add request end to end and returns the response to send.
///
/// `input` is the decoded query of the request; without one the client is
/// prompted for a URL.
pub async fn handle_add(
    db: &Database,
    fetcher: &Fetcher,
    identity: &Identity,
    input: Option<&str>,
) -> Response {
    let Some(raw_url) = input.filter(|s| !s.trim().is_empty()) else {
        return Response::Input("Enter a feed URL".to_string());
    };

    match add_feed(db, fetcher, identity, raw_url).await {
        Ok(added) => added.response(),
        Err(e) => {
            match &e {
                AddFeedError::Storage(inner) => {
                    tracing::error!(url = %raw_url, error = %inner, "Storage failure while adding feed");
                }
                other => tracing::info!(url = %raw_url, error = %other, "Feed rejected"),
            }
            e.response()
        }
    }
}
