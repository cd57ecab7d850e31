use secrecy::SecretString;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use super::ledger::{LedgerClient, LedgerCredentials, LedgerError, LedgerTransaction};
use super::validator::MONERO_PAYMENT_REQUEST;
use crate::storage::{
    advance_scan_height, mark_registered, record_payment, Database, DatabaseError, PaymentAccount,
};

/// Throttling and time budget for a payment sync pass.
#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    /// Pause between two accounts.
    pub account_delay: Duration,
    /// Upper bound on the whole pass. The account in flight when it expires
    /// is rolled back; accounts after it wait for the next pass.
    pub pass_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            account_delay: Duration::from_secs(1),
            pass_timeout: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Storage(#[from] DatabaseError),
    #[error("Payment account {0} has no view key")]
    MissingViewKey(i64),
    #[error("Payment sync pass timed out")]
    DeadlineExceeded,
}

/// What one account's sync changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountSyncSummary {
    /// The ledger accepted a login for a previously unregistered account.
    pub newly_registered: bool,
    /// Payments inserted during this sync.
    pub recorded: usize,
    /// Transactions passed over because their amount does not fit storage.
    pub skipped: usize,
    /// Watermark after this sync.
    pub scan_height: i64,
}

#[derive(Debug)]
pub struct AccountSyncResult {
    pub account_id: i64,
    pub result: Result<AccountSyncSummary, SyncError>,
}

/// Imports new ledger transactions for every Monero payment account.
///
/// Accounts are handled one at a time with `account_delay` between them.
/// Each account's writes commit in their own transaction; a failing account
/// is logged and the pass moves on.
///
/// # Errors
///
/// Only listing the accounts can fail the whole pass.
pub async fn sync_payments(
    db: &Database,
    ledger: &LedgerClient,
    settings: SyncSettings,
) -> Result<Vec<AccountSyncResult>, DatabaseError> {
    let accounts = db.payment_accounts_of_type(MONERO_PAYMENT_REQUEST).await?;
    // An unrepresentable deadline means the pass is unbounded
    let deadline = Instant::now().checked_add(settings.pass_timeout);
    tracing::info!(count = accounts.len(), "Syncing payment accounts");

    let mut results = Vec::with_capacity(accounts.len());
    for (index, account) in accounts.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(settings.account_delay).await;
        }

        let sync = sync_account(db, ledger, account);
        let result = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, sync)
                .await
                .unwrap_or(Err(SyncError::DeadlineExceeded)),
            None => sync.await,
        };

        match &result {
            Ok(summary) => tracing::info!(
                account_id = account.id,
                recorded = summary.recorded,
                skipped = summary.skipped,
                scan_height = summary.scan_height,
                newly_registered = summary.newly_registered,
                "Payment account synced"
            ),
            Err(e) => tracing::warn!(account_id = account.id, error = %e, "Payment account sync failed, skipping"),
        }

        let expired = matches!(result, Err(SyncError::DeadlineExceeded));
        results.push(AccountSyncResult {
            account_id: account.id,
            result,
        });
        if expired {
            tracing::warn!(
                remaining = accounts.len() - index - 1,
                "Payment sync pass deadline reached, stopping"
            );
            break;
        }
    }

    Ok(results)
}

async fn sync_account(
    db: &Database,
    ledger: &LedgerClient,
    account: &PaymentAccount,
) -> Result<AccountSyncSummary, SyncError> {
    let view_key = account
        .view_key
        .clone()
        .ok_or(SyncError::MissingViewKey(account.id))?;
    let credentials = LedgerCredentials::new(account.address.as_str(), SecretString::from(view_key));

    // Network calls happen before the transaction opens
    let login = if account.registered {
        None
    } else {
        match ledger.login(&credentials).await {
            Ok(login) => Some(login),
            Err(e) => {
                tracing::warn!(account_id = account.id, error = %e, "Ledger login failed, account stays unregistered");
                None
            }
        }
    };
    let listing = ledger.address_transactions(&credentials).await;

    let mut summary = AccountSyncSummary {
        scan_height: account.scan_height,
        ..AccountSyncSummary::default()
    };

    let mut tx = db.begin().await?;
    if let Some(login) = &login {
        let start_height = login.start_height.and_then(|h| i64::try_from(h).ok());
        mark_registered(&mut tx, account.id, start_height).await?;
        summary.newly_registered = true;
    }

    let listing = match listing {
        Ok(listing) => listing,
        Err(e) => {
            // Keep the registration even though the listing failed
            tx.commit().await.map_err(DatabaseError::from)?;
            return Err(e.into());
        }
    };

    for (height, transaction) in select_new(listing.transactions, account.scan_height) {
        let Ok(amount) = i64::try_from(transaction.total_received) else {
            tracing::warn!(
                account_id = account.id,
                tx_hash = %transaction.hash,
                amount = transaction.total_received,
                "Transaction amount exceeds the storable range, skipping"
            );
            summary.skipped += 1;
            summary.scan_height = height;
            continue;
        };
        if record_payment(&mut tx, account.id, &transaction.hash, transaction.timestamp, amount).await? {
            summary.recorded += 1;
        }
        summary.scan_height = height;
    }

    advance_scan_height(&mut tx, account.id, summary.scan_height).await?;
    tx.commit().await.map_err(DatabaseError::from)?;

    Ok(summary)
}

/// Confirmed transactions above the watermark, in ascending height order.
pub fn select_new(
    transactions: Vec<LedgerTransaction>,
    watermark: i64,
) -> Vec<(i64, LedgerTransaction)> {
    let mut fresh: Vec<_> = transactions
        .into_iter()
        .filter(|t| !t.mempool)
        .filter_map(|t| {
            let height = i64::try_from(t.height?).ok()?;
            (height > watermark).then_some((height, t))
        })
        .collect();
    fresh.sort_by_key(|(height, _)| *height);
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn tx(hash: &str, height: Option<u64>, mempool: bool) -> LedgerTransaction {
        LedgerTransaction {
            hash: hash.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            total_received: 1,
            height,
            mempool,
        }
    }

    #[test]
    fn test_select_above_watermark_ascending() {
        let selected = select_new(
            vec![
                tx("c", Some(110), false),
                tx("a", Some(95), false),
                tx("b", Some(102), false),
            ],
            100,
        );
        let picked: Vec<_> = selected.iter().map(|(h, t)| (*h, t.hash.as_str())).collect();
        assert_eq!(picked, vec![(102, "b"), (110, "c")]);
    }

    #[test]
    fn test_mempool_and_unconfirmed_skipped() {
        let selected = select_new(
            vec![tx("a", None, true), tx("b", Some(150), true), tx("c", None, false)],
            100,
        );
        assert!(selected.is_empty());
    }

    #[test]
    fn test_watermark_height_itself_excluded() {
        let selected = select_new(vec![tx("a", Some(100), false)], 100);
        assert!(selected.is_empty());
    }

    #[test]
    fn test_default_settings() {
        let settings = SyncSettings::default();
        assert_eq!(settings.account_delay, Duration::from_secs(1));
        assert_eq!(settings.pass_timeout, Duration::from_secs(3600));
    }
}
