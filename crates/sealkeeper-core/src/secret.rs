//! Secret wrapper types with bounded-preview diagnostics.
//!
//! Three secrets move through the recovery pipeline: the master credential
//! read from the removable medium, the password-manager session token, and
//! the unseal key shares. Each is held in a zeroizing wrapper so the value
//! is wiped from memory on drop, and each has a redacted `Debug` — the full
//! value never reaches a log or error message. Diagnostics may surface at
//! most [`PREVIEW_LEN`] characters via [`preview`].

use zeroize::Zeroizing;

/// Maximum number of characters a diagnostic preview may reveal.
pub const PREVIEW_LEN: usize = 8;

/// Bounded prefix of a secret value for diagnostics.
///
/// Operates on characters, not bytes, so multi-byte input cannot split.
#[must_use]
pub fn preview(value: &str) -> String {
    let prefix: String = value.chars().take(PREVIEW_LEN).collect();
    if value.chars().count() > PREVIEW_LEN {
        format!("{prefix}…")
    } else {
        prefix
    }
}

/// A master credential for one password-manager account.
///
/// Read once from the removable medium, handed to the session broker, never
/// persisted anywhere else. `Debug` reveals nothing at all.
pub struct MasterCredential(Zeroizing<String>);

impl MasterCredential {
    /// Wrap a credential value.
    #[must_use]
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    /// Access the raw credential. Callers must not log or persist it.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for MasterCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterCredential").finish_non_exhaustive()
    }
}

/// A live authenticated session with the password-manager vault.
///
/// Obtained fresh per account attempt, never reused across accounts,
/// invalidated by logout.
pub struct SessionToken(Zeroizing<String>);

impl SessionToken {
    /// Wrap a session token.
    #[must_use]
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    /// Access the raw token for handing to the external client binary.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Bounded prefix for diagnostics.
    #[must_use]
    pub fn preview(&self) -> String {
        preview(&self.0)
    }

    /// Whether the token is empty (an unlock that produced nothing).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionToken({}…)", self.preview())
    }
}

/// One fragment of the target service's unseal secret.
///
/// Produced by the key-share resolver, consumed exactly once by the
/// unsealer, dropped (and wiped) immediately after submission.
pub struct KeyShare {
    value: Zeroizing<String>,
    /// Name of the custom field the share was read from.
    pub field: String,
    /// Zero-based discovery position; submission preserves this order.
    pub ordinal: usize,
}

impl KeyShare {
    /// Wrap a share value with its provenance.
    #[must_use]
    pub fn new(value: String, field: String, ordinal: usize) -> Self {
        Self {
            value: Zeroizing::new(value),
            field,
            ordinal,
        }
    }

    /// Access the raw share for submission.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyShare")
            .field("field", &self.field)
            .field("ordinal", &self.ordinal)
            .finish_non_exhaustive()
    }
}
