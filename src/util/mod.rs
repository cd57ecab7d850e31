//! Utility functions shared by the fetcher and the ledger client.
//!
//! - **URL validation**: scheme selection and SSRF protection for every
//!   outbound request.
//! - **Bounded reads**: response bodies capped while streaming.

mod limited;
mod url_validator;

#[cfg(test)]
pub(crate) use limited::serve_chunked;
pub use limited::{read_limited_bytes, LimitedReadError};
pub use url_validator::{
    ensure_public_ip, transport_for, validate_service_url, Transport, UrlValidationError,
};
