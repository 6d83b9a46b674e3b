//! Password-manager vault client.
//!
//! The unseal key shares live in an external password-manager vault reached
//! through its CLI binary. This module defines the narrow surface the
//! pipeline needs — logout, login, unlock, item listing — and the
//! production implementation that shells out to the Bitwarden CLI. Tests
//! substitute scripted implementations of [`VaultClient`].
//!
//! The master credential is handed to the binary exclusively through a
//! process environment variable (`--passwordenv`); it never appears on the
//! command line, in logs, or in error messages.

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::BrokerError;
use crate::secret::{MasterCredential, SessionToken};

/// Default environment variable carrying the master credential into the
/// client binary.
pub const DEFAULT_CREDENTIAL_ENV: &str = "BW_PASSWORD";

/// Upper bound on stderr text quoted into error messages.
const STDERR_EXCERPT_LEN: usize = 200;

/// One item returned by the vault search.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultItem {
    /// Item display name.
    #[serde(default)]
    pub name: String,
    /// Custom fields attached to the item.
    #[serde(default)]
    pub fields: Vec<ItemField>,
}

/// A custom field on a vault item.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemField {
    /// Field name; the CLI emits `null` for unnamed fields.
    #[serde(default)]
    pub name: Option<String>,
    /// Field value; `None` or empty means no share here.
    #[serde(default)]
    pub value: Option<String>,
}

/// Narrow surface of the password-manager vault.
///
/// One production implementation ([`BitwardenCli`]) spawns the external
/// binary; tests provide scripted responses. Implementations must be safe
/// to share across async tasks.
#[async_trait::async_trait]
pub trait VaultClient: Send + Sync {
    /// Drop any existing session. Idempotent — "not logged in" is success.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Io`] only if the client binary cannot be
    /// spawned at all.
    async fn logout(&self) -> Result<(), BrokerError>;

    /// Authenticate the account against the vault server.
    ///
    /// Callers run [`logout`](VaultClient::logout) first when a previous
    /// account may still be signed in.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Auth`] when the vault rejects the credential,
    /// [`BrokerError::Io`] when the binary cannot be spawned.
    async fn login(&self, account: &str, credential: &MasterCredential)
    -> Result<(), BrokerError>;

    /// Unlock the vault, producing a fresh session token.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Auth`] when the vault rejects the credential,
    /// [`BrokerError::Query`] when the binary produced no usable token,
    /// [`BrokerError::Io`] when it cannot be spawned.
    async fn unlock(
        &self,
        account: &str,
        credential: &MasterCredential,
    ) -> Result<SessionToken, BrokerError>;

    /// List items matching the search term.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Query`] when the query fails or returns something we
    /// cannot parse, [`BrokerError::Io`] when the binary cannot be spawned.
    async fn list_items(
        &self,
        session: &SessionToken,
        search: &str,
    ) -> Result<Vec<VaultItem>, BrokerError>;
}

/// Production client wrapping the Bitwarden CLI binary.
pub struct BitwardenCli {
    binary: String,
    credential_env: String,
}

impl BitwardenCli {
    /// Client using the `bw` binary on `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary("bw")
    }

    /// Client using a specific binary path.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            credential_env: DEFAULT_CREDENTIAL_ENV.to_owned(),
        }
    }
}

impl Default for BitwardenCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl VaultClient for BitwardenCli {
    async fn logout(&self) -> Result<(), BrokerError> {
        // "You are not logged in" exits non-zero; that is the state we want.
        let out = Command::new(&self.binary).arg("logout").output().await?;
        if out.status.success() {
            debug!("previous session logged out");
        }
        Ok(())
    }

    async fn login(
        &self,
        account: &str,
        credential: &MasterCredential,
    ) -> Result<(), BrokerError> {
        let out = Command::new(&self.binary)
            .args(["login", account, "--passwordenv", &self.credential_env])
            .env(&self.credential_env, credential.expose())
            .output()
            .await?;
        if !out.status.success() {
            return Err(BrokerError::Auth {
                account: account.to_owned(),
                detail: stderr_excerpt(&out),
            });
        }
        info!(account, "password-manager login succeeded");
        Ok(())
    }

    async fn unlock(
        &self,
        account: &str,
        credential: &MasterCredential,
    ) -> Result<SessionToken, BrokerError> {
        let out = Command::new(&self.binary)
            .args(["unlock", "--raw", "--passwordenv", &self.credential_env])
            .env(&self.credential_env, credential.expose())
            .output()
            .await?;
        if !out.status.success() {
            return Err(BrokerError::Auth {
                account: account.to_owned(),
                detail: stderr_excerpt(&out),
            });
        }
        let token = String::from_utf8(out.stdout).map_err(|_| BrokerError::Query {
            reason: "session token is not UTF-8".to_owned(),
        })?;
        let token = SessionToken::new(token.trim().to_owned());
        if token.is_empty() {
            return Err(BrokerError::Query {
                reason: "unlock produced an empty session token".to_owned(),
            });
        }
        info!(account, session = %token.preview(), "vault unlocked");
        Ok(token)
    }

    async fn list_items(
        &self,
        session: &SessionToken,
        search: &str,
    ) -> Result<Vec<VaultItem>, BrokerError> {
        let out = Command::new(&self.binary)
            .args(["list", "items", "--search", search, "--session", session.expose()])
            .output()
            .await?;
        if !out.status.success() {
            return Err(BrokerError::Query {
                reason: stderr_excerpt(&out),
            });
        }
        serde_json::from_slice(&out.stdout).map_err(|e| BrokerError::Query {
            reason: format!("item list parse failed: {e}"),
        })
    }
}

impl std::fmt::Debug for BitwardenCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitwardenCli")
            .field("binary", &self.binary)
            .finish_non_exhaustive()
    }
}

/// Bounded stderr excerpt for diagnostics. Quotes the binary's own output
/// only — never argv, never the environment.
fn stderr_excerpt(out: &std::process::Output) -> String {
    let text = String::from_utf8_lossy(&out.stderr);
    let excerpt: String = text.trim().chars().take(STDERR_EXCERPT_LEN).collect();
    if excerpt.is_empty() {
        format!("exit status {}", out.status)
    } else {
        excerpt
    }
}
