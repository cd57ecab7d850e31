use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The database is locked by another gemmit process. Wait for it to finish and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

// SQLITE_BUSY (5): database is locked
// SQLITE_LOCKED (6): database table is locked
// SQLITE_CANTOPEN (14): unable to open database file
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Queries
// ============================================================================

/// Which stored feeds a sync pass refetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSelection {
    /// Feeds whose `updated` timestamp is older than the cutoff.
    StaleSince(DateTime<Utc>),
    All,
}

// ============================================================================
// Row Types
// ============================================================================

/// A feed row as the sync jobs need it.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredFeed {
    pub id: i64,
    pub author_id: i64,
    pub kind: String,
    /// Link the feed advertises for itself.
    pub url: String,
    /// URL the feed was added from and is refetched from; unique.
    pub source_url: String,
    pub title: String,
    pub description: Option<String>,
    pub approved: bool,
    pub created: i64,
    pub updated: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredItem {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    /// Unix timestamp (seconds).
    pub published: i64,
    pub url: String,
}

/// A registered payment method of an author.
///
/// `Debug` redacts the view key.
#[derive(Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PaymentAccount {
    pub id: i64,
    pub author_id: i64,
    pub pay_type: String,
    pub view_key: Option<String>,
    pub address: String,
    /// Set once the ledger accepted a login for this account.
    pub registered: bool,
    /// Highest ledger height already imported.
    pub scan_height: i64,
    /// Height the ledger reported it starts scanning from.
    pub start_height: Option<i64>,
}

impl fmt::Debug for PaymentAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentAccount")
            .field("id", &self.id)
            .field("author_id", &self.author_id)
            .field("pay_type", &self.pay_type)
            .field("view_key", &self.view_key.as_ref().map(|_| "[REDACTED]"))
            .field("address", &self.address)
            .field("registered", &self.registered)
            .field("scan_height", &self.scan_height)
            .field("start_height", &self.start_height)
            .finish()
    }
}

/// A payment method ready to be stored with its author.
#[derive(Debug, Clone, Copy)]
pub struct NewPaymentAccount<'a> {
    pub pay_type: &'a str,
    pub address: &'a str,
    pub view_key: Option<&'a str>,
}

/// A ledger transaction recorded against a payment account.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Payment {
    pub id: i64,
    pub payment_account_id: i64,
    pub tx_hash: String,
    /// Unix timestamp (seconds).
    pub tx_date: i64,
    /// Atomic units of the account's currency.
    pub amount: i64,
}

/// A pseudonymous user derived from a client certificate.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Identity {
    pub id: i64,
    pub cert_hash: String,
    pub created: i64,
}

/// Row counts per table, for the `stats` command and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub authors: i64,
    pub payment_accounts: i64,
    pub feeds: i64,
    pub items: i64,
    pub payments: i64,
    pub identities: i64,
    pub submissions: i64,
}
