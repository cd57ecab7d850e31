//! gemmit: a feed aggregator for Gemini and RSS/Atom that ranks authors by
//! the Monero payments they receive.
//!
//! The crate is the synchronization engine behind the dashboard:
//!
//! - [`feed`] fetches feeds over Gemini or HTTPS and parses gemtext or
//!   syndication documents into a canonical [`feed::Feed`].
//! - [`payment`] validates author payment declarations and keeps each
//!   payment account in step with a Monero light-wallet server.
//! - [`storage`] owns the SQLite schema and the idempotent item indexer.
//! - [`identity`] reduces client certificates to stable account rows.
//! - [`submit`] is the interactive "add feed" path.

pub mod config;
pub mod feed;
pub mod identity;
pub mod payment;
pub mod storage;
pub mod submit;
pub mod util;
