use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::schema::Database;
use super::types::{DatabaseError, StoredItem};
use crate::feed::Item;

/// Rows per staging INSERT; three binds each keeps well under SQLite's
/// parameter limit.
const STAGING_BATCH: usize = 200;

/// Indexes a feed's items, skipping any already stored.
///
/// Must run on a connection inside a caller-owned transaction. Items are
/// bulk-loaded into a connection-local staging table and moved into `items`
/// with `INSERT OR IGNORE`, so the `(feed_id, title, published, url)` unique
/// key decides what is new. The feed's `updated` timestamp is advanced even
/// when nothing was inserted.
///
/// Returns the number of genuinely new rows.
pub async fn index_items(
    conn: &mut SqliteConnection,
    feed_id: i64,
    items: &[Item],
) -> Result<u64, DatabaseError> {
    sqlx::query(
        r#"
        CREATE TEMP TABLE IF NOT EXISTS item_staging (
            title TEXT NOT NULL,
            published INTEGER NOT NULL,
            url TEXT NOT NULL
        )
    "#,
    )
    .execute(&mut *conn)
    .await?;

    // A rolled-back run on this connection may have left rows behind
    sqlx::query("DELETE FROM item_staging")
        .execute(&mut *conn)
        .await?;

    for chunk in items.chunks(STAGING_BATCH) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO item_staging (title, published, url) ");
        builder.push_values(chunk, |mut b, item| {
            b.push_bind(&item.title)
                .push_bind(item.published.timestamp())
                .push_bind(&item.url);
        });
        builder.build().execute(&mut *conn).await?;
    }

    let now = Utc::now().timestamp();
    let inserted = sqlx::query(
        r#"
        INSERT OR IGNORE INTO items (feed_id, title, published, url, created)
        SELECT ?, title, published, url, ? FROM item_staging
    "#,
    )
    .bind(feed_id)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    sqlx::query("DELETE FROM item_staging")
        .execute(&mut *conn)
        .await?;

    sqlx::query("UPDATE feeds SET updated = ? WHERE id = ?")
        .bind(now)
        .bind(feed_id)
        .execute(&mut *conn)
        .await?;

    tracing::debug!(feed_id = feed_id, staged = items.len(), inserted = inserted, "Indexed items");
    Ok(inserted)
}

impl Database {
    /// Items of a feed, newest first.
    pub async fn items_for_feed(&self, feed_id: i64) -> Result<Vec<StoredItem>, DatabaseError> {
        let items = sqlx::query_as(
            r#"
            SELECT id, feed_id, title, published, url
            FROM items
            WHERE feed_id = ?
            ORDER BY published DESC, id
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }
}
