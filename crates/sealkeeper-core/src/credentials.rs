//! Master-credential extraction from the removable medium.
//!
//! One file per account at the medium root, named `<account>.enc`. The
//! content is opaque text to this layer — it is read once, trimmed, and
//! wrapped in a zeroizing [`MasterCredential`]. An empty medium is not an
//! error; the orchestrator decides whether that is fatal.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::CredentialError;
use crate::secret::MasterCredential;

/// File extension marking a credential blob (`<account>.enc`).
pub const CREDENTIAL_EXTENSION: &str = "enc";

/// One candidate account with its master credential.
#[derive(Debug)]
pub struct AccountCredential {
    /// Account identifier — the blob's file stem, usually an email address.
    pub account: String,
    /// The master credential read from the blob.
    pub credential: MasterCredential,
}

/// Read every credential blob at the medium root.
///
/// Accounts come back in lexicographic order so the attempt sequence is
/// deterministic. An empty result is `Ok` — no blobs is the caller's call.
///
/// # Errors
///
/// [`CredentialError::Io`] if the medium directory or a blob cannot be
/// read; [`CredentialError::NotUtf8`] if a blob is not UTF-8 text.
pub fn extract(mount: &Path) -> Result<Vec<AccountCredential>, CredentialError> {
    let entries = fs::read_dir(mount).map_err(|source| CredentialError::Io {
        path: mount.to_path_buf(),
        source,
    })?;

    let mut accounts = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CredentialError::Io {
            path: mount.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(CREDENTIAL_EXTENSION) {
            continue;
        }
        let Some(account) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let raw = fs::read(&path).map_err(|source| CredentialError::Io {
            path: path.clone(),
            source,
        })?;
        let text = String::from_utf8(raw).map_err(|_| CredentialError::NotUtf8 {
            path: path.clone(),
        })?;

        accounts.push(AccountCredential {
            account: account.to_owned(),
            credential: MasterCredential::new(text.trim().to_owned()),
        });
    }

    accounts.sort_by(|a, b| a.account.cmp(&b.account));
    debug!(count = accounts.len(), "credential blobs read from medium");
    Ok(accounts)
}
