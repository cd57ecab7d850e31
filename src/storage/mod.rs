//! SQLite persistence.
//!
//! Reads go through [`Database`] methods on the pool. Writes that must be
//! atomic with other writes are free functions taking a connection, called
//! with `&mut tx` on a transaction from [`Database::begin`].

mod accounts;
mod feeds;
mod identities;
mod items;
mod schema;
mod types;

pub use accounts::{advance_scan_height, insert_payment_account, mark_registered, record_payment};
pub use feeds::{insert_author, insert_feed, record_submission};
pub use identities::{create_identity, find_identity};
pub use items::index_items;
pub use schema::Database;
pub use types::{
    DatabaseError, FeedSelection, Identity, NewPaymentAccount, Payment, PaymentAccount,
    StoredFeed, StoredItem, TableCounts,
};
