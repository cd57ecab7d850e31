//! Client for a Monero light-wallet server (the MyMonero API).
//!
//! Only the two calls the synchronizer needs are implemented:
//!
//! - `POST /login` registers an address + view key so the server starts
//!   scanning for it.
//! - `POST /get_address_txs` lists the incoming transactions seen so far.
//!
//! Responses are untrusted input; anything unexpected is a [`LedgerError`].

use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::util::{read_limited_bytes, validate_service_url, LimitedReadError};

/// Largest ledger response body accepted.
const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Ledger returned status {0}")]
    Status(u16),
    #[error("Invalid ledger response: {0}")]
    Decode(String),
    #[error("Invalid ledger URL: {0}")]
    InvalidUrl(String),
}

impl From<LimitedReadError> for LedgerError {
    fn from(err: LimitedReadError) -> Self {
        match err {
            LimitedReadError::TooLarge => LedgerError::Decode("response too large".to_string()),
            LimitedReadError::Network(e) => LedgerError::Network(e),
        }
    }
}

/// Address and view key of one account. `Debug` never shows the key.
pub struct LedgerCredentials {
    pub address: String,
    view_key: SecretString,
}

impl LedgerCredentials {
    pub fn new(address: impl Into<String>, view_key: SecretString) -> Self {
        Self {
            address: address.into(),
            view_key,
        }
    }
}

impl fmt::Debug for LedgerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerCredentials")
            .field("address", &self.address)
            .field("view_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    address: &'a str,
    view_key: &'a str,
    create_account: bool,
    generated_locally: bool,
}

#[derive(Serialize)]
struct AddressRequest<'a> {
    address: &'a str,
    view_key: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub new_address: bool,
    #[serde(default)]
    pub start_height: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddressTransactions {
    #[serde(default)]
    pub scanned_block_height: u64,
    #[serde(default)]
    pub blockchain_height: u64,
    #[serde(default, alias = "transaction", deserialize_with = "nullable_list")]
    pub transactions: Vec<LedgerTransaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedgerTransaction {
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    /// Atomic units. The server sends either a number or a decimal string.
    #[serde(deserialize_with = "atomic_amount")]
    pub total_received: u64,
    /// Absent while the transaction is still in the mempool.
    #[serde(default)]
    pub height: Option<u64>,
    #[serde(default)]
    pub mempool: bool,
}

fn nullable_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn atomic_amount<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(u64),
        Text(String),
    }

    match Amount::deserialize(deserializer)? {
        Amount::Number(n) => Ok(n),
        Amount::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// HTTP client bound to one light-wallet server.
#[derive(Clone)]
pub struct LedgerClient {
    client: reqwest::Client,
    base: Url,
    max_response_size: usize,
}

impl LedgerClient {
    /// HTTPS is required, except for loopback servers used in tests.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let base =
            validate_service_url(base_url).map_err(|e| LedgerError::InvalidUrl(e.to_string()))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("gemmit/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base,
            max_response_size: MAX_RESPONSE_SIZE,
        })
    }

    pub async fn login(&self, credentials: &LedgerCredentials) -> Result<LoginResponse, LedgerError> {
        let body = LoginRequest {
            address: &credentials.address,
            view_key: credentials.view_key.expose_secret(),
            create_account: true,
            generated_locally: false,
        };
        self.post("/login", &body).await
    }

    pub async fn address_transactions(
        &self,
        credentials: &LedgerCredentials,
    ) -> Result<AddressTransactions, LedgerError> {
        let body = AddressRequest {
            address: &credentials.address,
            view_key: credentials.view_key.expose_secret(),
        };
        self.post("/get_address_txs", &body).await
    }

    async fn post<B, T>(&self, method: &str, body: &B) -> Result<T, LedgerError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = self
            .base
            .join(method)
            .map_err(|e| LedgerError::InvalidUrl(e.to_string()))?;

        let response = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(method = method, status = status.as_u16(), "Ledger call rejected");
            return Err(LedgerError::Status(status.as_u16()));
        }
        let bytes = read_limited_bytes(response, self.max_response_size).await?;
        serde_json::from_slice(&bytes).map_err(|e| LedgerError::Decode(e.to_string()))
    }
}
