//! Pseudonymous identities derived from client certificates.
//!
//! The server collaborator terminates TLS and hands over the raw DER bytes
//! of the client certificate. Its SHA-256 is the only thing stored.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::storage::{create_identity, find_identity, Database, DatabaseError, Identity};

/// Lowercase hex SHA-256 of a client certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialFingerprint(String);

impl CredentialFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprints a DER-encoded certificate.
pub fn fingerprint(credential_der: &[u8]) -> CredentialFingerprint {
    CredentialFingerprint(format!("{:x}", Sha256::digest(credential_der)))
}

/// Maps a fingerprint to its identity row, creating it on first contact.
///
/// Returns the identity and whether this call created it. Concurrent first
/// contacts for one fingerprint produce a single row: the insert that loses
/// the unique-constraint race returns nothing, and the winner is re-read.
pub async fn identify(
    db: &Database,
    fingerprint: &CredentialFingerprint,
) -> Result<(Identity, bool), DatabaseError> {
    if let Some(identity) = find_identity(&db.pool, fingerprint.as_str()).await? {
        return Ok((identity, false));
    }

    let mut tx = db.begin().await?;
    let created = create_identity(&mut tx, fingerprint.as_str()).await?;
    let result = match created {
        Some(identity) => {
            tracing::info!(identity_id = identity.id, "Created identity");
            (identity, true)
        }
        None => {
            let identity = find_identity(&mut *tx, fingerprint.as_str())
                .await?
                .ok_or(DatabaseError::Other(sqlx::Error::RowNotFound))?;
            (identity, false)
        }
    };
    tx.commit().await?;

    Ok(result)
}
