//! Removable-medium discovery.
//!
//! The master credentials live on a small removable volume identified by a
//! filesystem label. Discovery is two-stage: resolve the by-label device
//! symlink against the mount table, then fall back to scanning
//! single-letter mount points for environments without a by-label tree
//! (WSL drive mounts in particular). Nothing here is fatal — unreadable
//! mount points are skipped and a fruitless search returns `None`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::MediumConfig;
use crate::credentials::CREDENTIAL_EXTENSION;

/// A located removable medium. Resolved once per run, never persisted.
#[derive(Debug, Clone)]
pub struct MediumHandle {
    /// Mount point of the volume.
    pub mount: PathBuf,
}

/// Locate the removable medium, or `None` if nothing matches.
///
/// Stage one resolves `<by_label_root>/<label>` and matches the canonical
/// device path against the mount table. Stage two probes single-letter
/// directories under the mount root in lexicographic order. A mount counts
/// only if it carries the marker; with no marker configured, any directory
/// holding at least one credential blob counts.
#[must_use]
pub fn locate(cfg: &MediumConfig, label: &str, marker: Option<&str>) -> Option<MediumHandle> {
    if let Some(found) = locate_by_label(cfg, label, marker) {
        return Some(found);
    }
    scan_fallback_mounts(&cfg.mount_root, marker)
}

/// Stage one: by-label symlink → mount table → marker check.
fn locate_by_label(cfg: &MediumConfig, label: &str, marker: Option<&str>) -> Option<MediumHandle> {
    let link = cfg.by_label_root.join(label);
    let device = fs::canonicalize(&link).ok()?;
    let table = fs::read_to_string(&cfg.mount_table).ok()?;

    for line in table.lines() {
        let mut fields = line.split_whitespace();
        let (Some(dev), Some(mount)) = (fields.next(), fields.next()) else {
            continue;
        };
        if Path::new(dev) != device {
            continue;
        }
        let mount = PathBuf::from(mount);
        if has_marker(&mount, marker) {
            debug!(mount = %mount.display(), label, "medium found via by-label lookup");
            return Some(MediumHandle { mount });
        }
    }
    None
}

/// Stage two: probe `<root>/a` … `<root>/z` for the marker.
fn scan_fallback_mounts(root: &Path, marker: Option<&str>) -> Option<MediumHandle> {
    for letter in b'a'..=b'z' {
        let mount = root.join(char::from(letter).to_string());
        if !mount.is_dir() {
            continue;
        }
        if has_marker(&mount, marker) {
            debug!(mount = %mount.display(), "medium found via fallback mount scan");
            return Some(MediumHandle { mount });
        }
    }
    None
}

/// Whether a mount carries the marker.
///
/// With a configured marker filename, that file must be present. With none,
/// any directory holding at least one credential blob counts. Unreadable
/// directories count as unmarked, never as errors.
fn has_marker(mount: &Path, marker: Option<&str>) -> bool {
    match marker {
        Some(name) => mount.join(name).exists(),
        None => fs::read_dir(mount).is_ok_and(|entries| {
            entries.filter_map(Result::ok).any(|e| {
                e.path()
                    .extension()
                    .is_some_and(|ext| ext == CREDENTIAL_EXTENSION)
            })
        }),
    }
}
