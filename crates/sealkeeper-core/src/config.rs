//! Configuration for the auto-unseal pipeline.
//!
//! Every knob is an explicit struct field threaded through constructors.
//! [`UnsealConfig::from_env`] reads the documented environment variables
//! once, at the CLI edge — nothing deeper in the call graph touches the
//! process environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::resolver::FieldMatch;

/// Default target secrets-service address.
pub const DEFAULT_TARGET_ADDR: &str = "https://127.0.0.1:8200";

/// Default volume label of the removable medium.
pub const DEFAULT_VOLUME_LABEL: &str = "BW_PW_USB";

/// Default search term for the password-manager item holding the shares.
pub const DEFAULT_ITEM_SEARCH: &str = "vault unseal key - desktop";

/// Default field-name prefix in prefix-matching mode.
pub const DEFAULT_FIELD_PREFIX: &str = "Unseal Key";

/// Default field name in exact-matching mode.
pub const DEFAULT_FIELD_EXACT: &str = "unseal key";

/// Filesystem locations probed during medium discovery.
///
/// Injectable so tests can point discovery at a scratch directory instead
/// of the live system.
#[derive(Debug, Clone)]
pub struct MediumConfig {
    /// Root of the by-label device symlink tree.
    pub by_label_root: PathBuf,
    /// Mount table scanned for the labelled device.
    pub mount_table: PathBuf,
    /// Root under which single-letter fallback mounts live.
    pub mount_root: PathBuf,
}

impl Default for MediumConfig {
    fn default() -> Self {
        Self {
            by_label_root: PathBuf::from("/dev/disk/by-label"),
            mount_table: PathBuf::from("/proc/mounts"),
            mount_root: PathBuf::from("/mnt"),
        }
    }
}

/// Configuration for one auto-unseal run.
#[derive(Debug, Clone)]
pub struct UnsealConfig {
    /// Target secrets-service address.
    pub target_addr: String,
    /// Verify the target's TLS certificate. Off by default: the internal
    /// network runs on self-issued certificates. A toggle, not a constant.
    pub tls_verify: bool,
    /// Per-request timeout toward the target service (local network).
    pub http_timeout: Duration,
    /// Volume label of the removable medium.
    pub volume_label: String,
    /// Marker file expected on the medium. `None` accepts any mount
    /// carrying at least one credential blob.
    pub marker_file: Option<String>,
    /// Search term for the password-manager item holding the shares.
    pub item_search: String,
    /// Field-name matching rule for key-share fields.
    pub field_match: FieldMatch,
    /// Deadline for the password-manager item query.
    pub list_timeout: Duration,
    /// Filesystem locations probed during medium discovery.
    pub medium: MediumConfig,
}

impl Default for UnsealConfig {
    fn default() -> Self {
        Self {
            target_addr: DEFAULT_TARGET_ADDR.to_owned(),
            tls_verify: false,
            http_timeout: Duration::from_secs(5),
            volume_label: DEFAULT_VOLUME_LABEL.to_owned(),
            marker_file: None,
            item_search: DEFAULT_ITEM_SEARCH.to_owned(),
            field_match: FieldMatch::Prefix(DEFAULT_FIELD_PREFIX.to_owned()),
            list_timeout: Duration::from_secs(60),
            medium: MediumConfig::default(),
        }
    }
}

impl UnsealConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `VAULT_ADDR` — target service address (default: `https://127.0.0.1:8200`)
    /// - `SEALKEEPER_TLS_VERIFY` — verify the target's certificate (default: `false`)
    /// - `SEALKEEPER_VOLUME_LABEL` — removable-medium label (default: `BW_PW_USB`)
    /// - `SEALKEEPER_MARKER_FILE` — marker filename on the medium (default: unset)
    /// - `SEALKEEPER_ITEM_SEARCH` — item search term (default: `vault unseal key - desktop`)
    /// - `SEALKEEPER_FIELD_MODE` — `prefix` or `exact` (default: `prefix`)
    /// - `SEALKEEPER_FIELD_NAME` — field name or prefix to match (mode-dependent default)
    /// - `SEALKEEPER_LIST_TIMEOUT_SECS` — item query deadline in seconds (default: `60`)
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(addr) = std::env::var("VAULT_ADDR") {
            if !addr.is_empty() {
                cfg.target_addr = addr;
            }
        }

        cfg.tls_verify = std::env::var("SEALKEEPER_TLS_VERIFY")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        if let Ok(label) = std::env::var("SEALKEEPER_VOLUME_LABEL") {
            if !label.is_empty() {
                cfg.volume_label = label;
            }
        }

        cfg.marker_file = std::env::var("SEALKEEPER_MARKER_FILE")
            .ok()
            .filter(|v| !v.is_empty());

        if let Ok(search) = std::env::var("SEALKEEPER_ITEM_SEARCH") {
            if !search.is_empty() {
                cfg.item_search = search;
            }
        }

        cfg.field_match = field_match_from(
            std::env::var("SEALKEEPER_FIELD_MODE").ok().as_deref(),
            std::env::var("SEALKEEPER_FIELD_NAME").ok(),
        );

        if let Some(secs) = std::env::var("SEALKEEPER_LIST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            cfg.list_timeout = Duration::from_secs(secs);
        }

        cfg
    }
}

/// Build a [`FieldMatch`] from a mode string and an optional name.
///
/// Unknown modes fall back to prefix matching; the name defaults to the
/// conventional value for the chosen mode.
#[must_use]
pub fn field_match_from(mode: Option<&str>, name: Option<String>) -> FieldMatch {
    match mode.map(str::to_lowercase).as_deref() {
        Some("exact") => FieldMatch::Exact(name.unwrap_or_else(|| DEFAULT_FIELD_EXACT.to_owned())),
        _ => FieldMatch::Prefix(name.unwrap_or_else(|| DEFAULT_FIELD_PREFIX.to_owned())),
    }
}
