use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::schema::Database;
use super::types::{DatabaseError, NewPaymentAccount, Payment, PaymentAccount};

const ACCOUNT_COLUMNS: &str =
    "id, author_id, pay_type, view_key, address, registered, scan_height, start_height";

// ============================================================================
// Payment Account Writes
// ============================================================================

/// Stores a payment method for an author, unregistered with a zero watermark.
pub async fn insert_payment_account(
    conn: &mut SqliteConnection,
    author_id: i64,
    account: NewPaymentAccount<'_>,
) -> Result<i64, DatabaseError> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO payment_accounts (author_id, pay_type, view_key, address, registered, scan_height)
        VALUES (?, ?, ?, ?, 0, 0)
        RETURNING id
    "#,
    )
    .bind(author_id)
    .bind(account.pay_type)
    .bind(account.view_key)
    .bind(account.address)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Flags an account as registered with the ledger.
///
/// `start_height` is only overwritten when the ledger reported one.
pub async fn mark_registered(
    conn: &mut SqliteConnection,
    account_id: i64,
    start_height: Option<i64>,
) -> Result<(), DatabaseError> {
    sqlx::query(
        "UPDATE payment_accounts SET registered = 1, start_height = COALESCE(?, start_height) WHERE id = ?",
    )
    .bind(start_height)
    .bind(account_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Records a ledger transaction. Returns `false` if this hash was already
/// recorded for the account.
pub async fn record_payment(
    conn: &mut SqliteConnection,
    account_id: i64,
    tx_hash: &str,
    tx_date: DateTime<Utc>,
    amount: i64,
) -> Result<bool, DatabaseError> {
    let result = sqlx::query(
        r#"
        INSERT INTO payments (payment_account_id, tx_hash, tx_date, amount)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(payment_account_id, tx_hash) DO NOTHING
    "#,
    )
    .bind(account_id)
    .bind(tx_hash)
    .bind(tx_date.timestamp())
    .bind(amount)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Raises the account watermark to `height`. Never lowers it.
pub async fn advance_scan_height(
    conn: &mut SqliteConnection,
    account_id: i64,
    height: i64,
) -> Result<(), DatabaseError> {
    sqlx::query("UPDATE payment_accounts SET scan_height = MAX(scan_height, ?) WHERE id = ?")
        .bind(height)
        .bind(account_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

impl Database {
    // ========================================================================
    // Payment Queries
    // ========================================================================

    /// All accounts declaring `pay_type`, in insertion order.
    pub async fn payment_accounts_of_type(
        &self,
        pay_type: &str,
    ) -> Result<Vec<PaymentAccount>, DatabaseError> {
        let accounts = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM payment_accounts WHERE pay_type = ? ORDER BY id"
        ))
        .bind(pay_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    pub async fn get_payment_account(
        &self,
        account_id: i64,
    ) -> Result<Option<PaymentAccount>, DatabaseError> {
        let account = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM payment_accounts WHERE id = ?"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    /// Accounts owned by the author of a feed.
    pub async fn payment_accounts_for_feed(
        &self,
        feed_id: i64,
    ) -> Result<Vec<PaymentAccount>, DatabaseError> {
        let accounts = sqlx::query_as(
            r#"
            SELECT pa.id, pa.author_id, pa.pay_type, pa.view_key, pa.address,
                   pa.registered, pa.scan_height, pa.start_height
            FROM payment_accounts pa
            JOIN feeds f ON f.author_id = pa.author_id
            WHERE f.id = ?
            ORDER BY pa.id
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    /// Payments recorded for an account, oldest first.
    pub async fn payments_for_account(
        &self,
        account_id: i64,
    ) -> Result<Vec<Payment>, DatabaseError> {
        let payments = sqlx::query_as(
            r#"
            SELECT id, payment_account_id, tx_hash, tx_date, amount
            FROM payments
            WHERE payment_account_id = ?
            ORDER BY tx_date, id
        "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }
}
