//! Key-share resolution from the password-manager vault.
//!
//! Given an unlocked session, queries the vault for the item holding the
//! unseal key shares and collects every custom field whose name satisfies
//! the configured matching rule. Share order follows field order — the
//! unsealer submits them exactly as discovered.

use std::time::Duration;

use tracing::debug;

use crate::error::BrokerError;
use crate::secret::{KeyShare, SessionToken};
use crate::vault_client::{VaultClient, VaultItem};

/// Field-name matching rule for key-share fields.
///
/// Both rules are in real use: vaults keyed with a single `unseal key`
/// field, and vaults enumerating `Unseal Key 1`, `Unseal Key 2`, ….
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMatch {
    /// Case-insensitive equality with the configured name.
    Exact(String),
    /// Case-insensitive prefix match against the configured prefix.
    Prefix(String),
}

impl FieldMatch {
    /// Whether a field name satisfies this rule.
    #[must_use]
    pub fn matches(&self, field_name: &str) -> bool {
        match self {
            Self::Exact(name) => field_name.to_lowercase() == name.to_lowercase(),
            Self::Prefix(prefix) => field_name
                .to_lowercase()
                .starts_with(&prefix.to_lowercase()),
        }
    }
}

/// Resolve key shares for one account.
///
/// Queries the vault with `search`, picks the best-matching item, and
/// collects every non-empty custom field matching `matcher`, preserving
/// field order. No matching item or field yields an empty vec, not an
/// error — the caller decides whether that is fatal.
///
/// The underlying query runs under `deadline`; elapse is reported as
/// [`BrokerError::Timeout`], distinct from query failure.
///
/// # Errors
///
/// [`BrokerError::Timeout`] when the query deadline elapses; any other
/// [`BrokerError`] from the underlying client is passed through.
pub async fn resolve_shares(
    client: &dyn VaultClient,
    session: &SessionToken,
    search: &str,
    matcher: &FieldMatch,
    deadline: Duration,
) -> Result<Vec<KeyShare>, BrokerError> {
    let items = match tokio::time::timeout(deadline, client.list_items(session, search)).await {
        Ok(result) => result?,
        Err(_) => return Err(BrokerError::Timeout { timeout: deadline }),
    };

    let Some(item) = pick_item(&items, search) else {
        debug!(search, "no vault item matched the search term");
        return Ok(Vec::new());
    };

    let shares = collect_shares(item, matcher);
    debug!(item = %item.name, count = shares.len(), "key shares resolved");
    Ok(shares)
}

/// Prefer a case-insensitive exact name match; fall back to the first hit.
fn pick_item<'a>(items: &'a [VaultItem], search: &str) -> Option<&'a VaultItem> {
    items
        .iter()
        .find(|item| item.name.eq_ignore_ascii_case(search))
        .or_else(|| items.first())
}

/// Collect matching, non-empty fields as ordered shares.
fn collect_shares(item: &VaultItem, matcher: &FieldMatch) -> Vec<KeyShare> {
    let mut shares = Vec::new();
    for field in &item.fields {
        let Some(name) = field.name.as_deref() else {
            continue;
        };
        if !matcher.matches(name) {
            continue;
        }
        let Some(value) = field.value.as_deref() else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        shares.push(KeyShare::new(
            value.to_owned(),
            name.to_owned(),
            shares.len(),
        ));
    }
    shares
}
