use thiserror::Error;
use url::Url;

use super::fetcher::{FetchError, Fetcher};
use crate::storage::{index_items, Database, DatabaseError, FeedSelection, StoredFeed};

/// Why a single feed failed to refresh.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

/// Outcome of refreshing one feed.
#[derive(Debug)]
pub struct RefreshResult {
    pub feed_id: i64,
    /// Number of new items indexed, or the error that occurred.
    pub result: Result<u64, RefreshError>,
}

/// Refetches and reindexes every feed picked by `selection`.
///
/// Feeds are processed one at a time. A feed that fails to fetch, parse or
/// index is logged and skipped, its transaction rolled back, and its
/// `updated` timestamp left alone so the next stale pass retries it.
///
/// # Errors
///
/// Only the initial feed listing can fail the whole pass.
pub async fn sync_feeds(
    db: &Database,
    fetcher: &Fetcher,
    selection: FeedSelection,
) -> Result<Vec<RefreshResult>, DatabaseError> {
    let feeds = db.feeds_for_sync(selection).await?;
    tracing::info!(count = feeds.len(), "Refreshing feeds");

    let mut results = Vec::with_capacity(feeds.len());
    for feed in feeds {
        let result = refresh_one(db, fetcher, &feed).await;
        match &result {
            Ok(inserted) => {
                tracing::info!(feed_id = feed.id, url = %feed.source_url, inserted = inserted, "Feed refreshed");
            }
            Err(e) => {
                tracing::warn!(feed_id = feed.id, url = %feed.source_url, error = %e, "Feed refresh failed, skipping");
            }
        }
        results.push(RefreshResult {
            feed_id: feed.id,
            result,
        });
    }

    Ok(results)
}

async fn refresh_one(
    db: &Database,
    fetcher: &Fetcher,
    feed: &StoredFeed,
) -> Result<u64, RefreshError> {
    let url = Url::parse(&feed.source_url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
    let parsed = fetcher.fetch_feed(&url).await?;

    let mut tx = db.begin().await?;
    let inserted = index_items(&mut tx, feed.id, &parsed.items).await?;
    tx.commit().await.map_err(DatabaseError::from)?;

    Ok(inserted)
}
