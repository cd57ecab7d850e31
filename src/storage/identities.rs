use chrono::Utc;
use sqlx::{Executor, Sqlite, SqliteConnection};

use super::types::{DatabaseError, Identity};

/// Looks up an identity by certificate hash.
///
/// Accepts the pool or a transaction.
pub async fn find_identity<'e, E>(
    executor: E,
    cert_hash: &str,
) -> Result<Option<Identity>, DatabaseError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let identity = sqlx::query_as("SELECT id, cert_hash, created FROM identities WHERE cert_hash = ?")
        .bind(cert_hash)
        .fetch_optional(executor)
        .await?;
    Ok(identity)
}

/// Inserts an identity unless the hash is already taken.
///
/// Returns `None` when another writer got there first; the caller re-reads.
pub async fn create_identity(
    conn: &mut SqliteConnection,
    cert_hash: &str,
) -> Result<Option<Identity>, DatabaseError> {
    let identity = sqlx::query_as(
        r#"
        INSERT INTO identities (cert_hash, created)
        VALUES (?, ?)
        ON CONFLICT(cert_hash) DO NOTHING
        RETURNING id, cert_hash, created
    "#,
    )
    .bind(cert_hash)
    .bind(Utc::now().timestamp())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(identity)
}
