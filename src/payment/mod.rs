//! Author payment methods and the ledger synchronizer.
//!
//! - `validator` turns author link extensions into payment candidates
//! - [`ledger`] talks to a Monero light-wallet server
//! - [`sync_payments`] imports new transactions per account above its
//!   `scan_height` watermark

pub mod ledger;
mod sync;
mod validator;

pub use ledger::{LedgerClient, LedgerCredentials, LedgerError};
pub use sync::{
    select_new, sync_payments, AccountSyncResult, AccountSyncSummary, SyncError, SyncSettings,
};
pub use validator::{
    extract_payment_accounts, PaymentCandidate, PaymentError, MONERO_PAYMENT_REQUEST,
    MONERO_VIEW_KEY,
};
