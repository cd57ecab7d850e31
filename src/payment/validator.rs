use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

use crate::feed::Extension;
use crate::storage::NewPaymentAccount;

pub const MONERO_PAYMENT_REQUEST: &str = "application/monero-paymentrequest";
pub const MONERO_VIEW_KEY: &str = "application/monero-viewkey";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error("Author's payment data within feed is malformed")]
    MalformedPaymentData,
    #[error("No accepted payments found within feed")]
    NoPaymentCapability,
}

/// A payment method extracted from author extensions, not yet stored.
///
/// `Debug` redacts the view key.
#[derive(Clone, PartialEq, Eq)]
pub struct PaymentCandidate {
    pub pay_type: String,
    pub address: String,
    pub view_key: Option<String>,
}

impl PaymentCandidate {
    pub fn as_new_account(&self) -> NewPaymentAccount<'_> {
        NewPaymentAccount {
            pay_type: &self.pay_type,
            address: &self.address,
            view_key: self.view_key.as_deref(),
        }
    }
}

impl fmt::Debug for PaymentCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentCandidate")
            .field("pay_type", &self.pay_type)
            .field("address", &self.address)
            .field("view_key", &self.view_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn payment_request_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^application/.+-paymentrequest$").expect("valid regex"))
}

fn monero_address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^4[0-9A-Za-z]{94}$").expect("valid regex"))
}

/// Turns author extensions into payment candidates.
///
/// - An extension is a payment request when its media type matches
///   `application/<name>-paymentrequest`; the address is the href after
///   the first `:`.
/// - Monero requests need a well-formed address and are paired with every
///   `application/monero-viewkey` sibling, one candidate per pair.
/// - Other payment types are taken as-is, without a view key.
///
/// # Errors
///
/// - [`PaymentError::MalformedPaymentData`] - href without `:`, bad Monero
///   address, or bad view key
/// - [`PaymentError::NoPaymentCapability`] - nothing usable was declared
pub fn extract_payment_accounts(
    extensions: &[Extension],
) -> Result<Vec<PaymentCandidate>, PaymentError> {
    let mut candidates = Vec::new();

    for ext in extensions
        .iter()
        .filter(|e| payment_request_re().is_match(&e.media_type))
    {
        let (_, address) = ext
            .href
            .split_once(':')
            .ok_or(PaymentError::MalformedPaymentData)?;

        if ext.media_type != MONERO_PAYMENT_REQUEST {
            candidates.push(PaymentCandidate {
                pay_type: ext.media_type.clone(),
                address: address.to_string(),
                view_key: None,
            });
            continue;
        }

        if !monero_address_re().is_match(address) {
            return Err(PaymentError::MalformedPaymentData);
        }
        for key_ext in extensions.iter().filter(|e| e.media_type == MONERO_VIEW_KEY) {
            candidates.push(PaymentCandidate {
                pay_type: ext.media_type.clone(),
                address: address.to_string(),
                view_key: Some(view_key(&key_ext.href)?.to_string()),
            });
        }
    }

    if candidates.is_empty() {
        return Err(PaymentError::NoPaymentCapability);
    }
    Ok(candidates)
}

/// Strips an optional `scheme:` prefix and checks for 64 hex characters.
fn view_key(href: &str) -> Result<&str, PaymentError> {
    let key = href.split_once(':').map_or(href, |(_, key)| key);
    if key.len() == 64 && key.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(key)
    } else {
        Err(PaymentError::MalformedPaymentData)
    }
}
