use chrono::Utc;
use sqlx::SqliteConnection;

use super::schema::Database;
use super::types::{DatabaseError, FeedSelection, StoredFeed, TableCounts};
use crate::feed::{Author, Feed};

const FEED_COLUMNS: &str =
    "id, author_id, kind, url, source_url, title, description, approved, created, updated";

// ============================================================================
// Transactional inserts (add-feed path)
// ============================================================================

/// Inserts a feed's author and returns its id.
pub async fn insert_author(conn: &mut SqliteConnection, author: &Author) -> Result<i64, DatabaseError> {
    let now = Utc::now().timestamp();
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO authors (name, url, email, created, updated)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
    "#,
    )
    .bind(&author.name)
    .bind(&author.homepage)
    .bind(&author.email)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Inserts a feed row keyed by its source URL.
///
/// Returns `None` when a feed with the same source URL already exists. The
/// unique constraint makes this the authoritative duplicate check, even when
/// two adds race past [`Database::feed_exists`].
pub async fn insert_feed(
    conn: &mut SqliteConnection,
    author_id: i64,
    source_url: &str,
    feed: &Feed,
) -> Result<Option<i64>, DatabaseError> {
    let now = Utc::now().timestamp();
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO feeds (author_id, kind, url, source_url, title, description, approved, created, updated)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
        ON CONFLICT(source_url) DO NOTHING
        RETURNING id
    "#,
    )
    .bind(author_id)
    .bind(feed.kind.as_str())
    .bind(&feed.link)
    .bind(source_url)
    .bind(&feed.title)
    .bind(&feed.description)
    .bind(now)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|(id,)| id))
}

/// Records that an identity submitted a feed. Returns `false` if the pair
/// was already recorded.
pub async fn record_submission(
    conn: &mut SqliteConnection,
    identity_id: i64,
    feed_id: i64,
) -> Result<bool, DatabaseError> {
    let result = sqlx::query(
        r#"
        INSERT INTO submissions (identity_id, feed_id, created)
        VALUES (?, ?, ?)
        ON CONFLICT(identity_id, feed_id) DO NOTHING
    "#,
    )
    .bind(identity_id)
    .bind(feed_id)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

impl Database {
    // ========================================================================
    // Feed Queries
    // ========================================================================

    /// Whether a feed with this source URL is already stored.
    pub async fn feed_exists(&self, source_url: &str) -> Result<bool, DatabaseError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM feeds WHERE source_url = ?)")
                .bind(source_url)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    pub async fn get_feed_by_source(
        &self,
        source_url: &str,
    ) -> Result<Option<StoredFeed>, DatabaseError> {
        let feed = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE source_url = ?"
        ))
        .bind(source_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// Feeds picked for a sync pass, oldest update first.
    pub async fn feeds_for_sync(
        &self,
        selection: FeedSelection,
    ) -> Result<Vec<StoredFeed>, DatabaseError> {
        let feeds = match selection {
            FeedSelection::StaleSince(cutoff) => {
                sqlx::query_as(&format!(
                    "SELECT {FEED_COLUMNS} FROM feeds WHERE updated < ? ORDER BY updated, id"
                ))
                .bind(cutoff.timestamp())
                .fetch_all(&self.pool)
                .await?
            }
            FeedSelection::All => {
                sqlx::query_as(&format!(
                    "SELECT {FEED_COLUMNS} FROM feeds ORDER BY updated, id"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(feeds)
    }

    /// Row counts of every table.
    pub async fn table_counts(&self) -> Result<TableCounts, DatabaseError> {
        let row: (i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM authors),
                (SELECT COUNT(*) FROM payment_accounts),
                (SELECT COUNT(*) FROM feeds),
                (SELECT COUNT(*) FROM items),
                (SELECT COUNT(*) FROM payments),
                (SELECT COUNT(*) FROM identities),
                (SELECT COUNT(*) FROM submissions)
        "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(TableCounts {
            authors: row.0,
            payment_accounts: row.1,
            feeds: row.2,
            items: row.3,
            payments: row.4,
            identities: row.5,
            submissions: row.6,
        })
    }
}
