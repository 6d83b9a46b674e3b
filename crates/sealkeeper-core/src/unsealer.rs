//! Target secrets-service unsealer.
//!
//! Talks to the target's seal API: one read for status, one write per
//! share. Submission is strictly ordered, short-circuits on the first
//! unsealed response, and never retries a share on its own — resubmitting
//! a used or rejected share is the caller's decision, not this layer's.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::UnsealConfig;
use crate::error::UnsealError;
use crate::secret::KeyShare;

/// Seal state reported by the target service.
///
/// Wire shape: `{"sealed": bool, "progress": int, "t": int}`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SealStatus {
    /// Whether the service is sealed.
    pub sealed: bool,
    /// Shares accepted toward the current unseal attempt.
    #[serde(default)]
    pub progress: u32,
    /// Shares required to unseal.
    #[serde(rename = "t", default)]
    pub threshold: u32,
}

/// Read/write surface of the target's seal API.
///
/// The production implementation is [`HttpSealTarget`]; tests script one.
#[async_trait]
pub trait SealTarget: Send + Sync {
    /// Read the current seal status. Read-only, freely repeatable.
    ///
    /// # Errors
    ///
    /// [`UnsealError::Unreachable`] when the service cannot be reached,
    /// [`UnsealError::UnexpectedResponse`] on a non-status payload.
    async fn status(&self) -> Result<SealStatus, UnsealError>;

    /// Submit one unseal share. Never retried by this layer.
    ///
    /// # Errors
    ///
    /// [`UnsealError::ShareRejected`] when the service refuses the share,
    /// [`UnsealError::Unreachable`] on transport failure,
    /// [`UnsealError::UnexpectedResponse`] on a non-status payload.
    async fn submit(&self, share: &KeyShare) -> Result<SealStatus, UnsealError>;
}

/// HTTP implementation of [`SealTarget`].
pub struct HttpSealTarget {
    http: reqwest::Client,
    addr: String,
}

impl HttpSealTarget {
    /// Build the client from configuration.
    ///
    /// TLS verification follows `cfg.tls_verify`. The default is off — the
    /// internal network runs on self-issued certificates, and the toggle
    /// exists so hardened deployments can turn verification back on.
    ///
    /// # Errors
    ///
    /// [`UnsealError::ClientBuild`] when the HTTP client cannot be built.
    pub fn new(cfg: &UnsealConfig) -> Result<Self, UnsealError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .danger_accept_invalid_certs(!cfg.tls_verify)
            .build()
            .map_err(UnsealError::ClientBuild)?;
        Ok(Self {
            http,
            addr: cfg.target_addr.trim_end_matches('/').to_owned(),
        })
    }
}

impl std::fmt::Debug for HttpSealTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSealTarget")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SealTarget for HttpSealTarget {
    async fn status(&self) -> Result<SealStatus, UnsealError> {
        let url = format!("{}/v1/sys/seal-status", self.addr);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(UnsealError::Unreachable)?;
        decode_status(resp).await
    }

    async fn submit(&self, share: &KeyShare) -> Result<SealStatus, UnsealError> {
        let url = format!("{}/v1/sys/unseal", self.addr);
        let resp = self
            .http
            .put(&url)
            .json(&json!({ "key": share.expose() }))
            .send()
            .await
            .map_err(UnsealError::Unreachable)?;
        if !resp.status().is_success() {
            return Err(UnsealError::ShareRejected {
                ordinal: share.ordinal,
                status: resp.status().as_u16(),
            });
        }
        decode_status(resp).await
    }
}

/// Decode a successful response body into a [`SealStatus`].
async fn decode_status(resp: reqwest::Response) -> Result<SealStatus, UnsealError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(UnsealError::UnexpectedResponse {
            reason: format!("HTTP {status}"),
        });
    }
    let body = resp.text().await.map_err(UnsealError::Unreachable)?;
    serde_json::from_str(&body).map_err(|e| UnsealError::UnexpectedResponse {
        reason: format!("seal-status parse failed: {e}"),
    })
}

/// Submit shares in order until the target reports unsealed.
///
/// Short-circuits the moment a response reports `sealed: false` — the
/// remaining shares are never sent. A rejected share is logged and
/// skipped. Shares are consumed by value and wiped as each is dropped.
///
/// # Errors
///
/// [`UnsealError::PartialQuorum`] when every share was offered and the
/// target is still sealed; transport and decode failures pass through.
pub async fn unseal_with_shares(
    target: &dyn SealTarget,
    shares: Vec<KeyShare>,
) -> Result<SealStatus, UnsealError> {
    let total = shares.len();
    let mut submitted = 0usize;
    let mut threshold = 0u32;

    for share in shares {
        match target.submit(&share).await {
            Ok(state) => {
                submitted += 1;
                threshold = state.threshold;
                info!(
                    ordinal = share.ordinal,
                    progress = state.progress,
                    threshold = state.threshold,
                    "share submitted"
                );
                if !state.sealed {
                    info!(submitted, "target unsealed");
                    return Ok(state);
                }
            }
            Err(UnsealError::ShareRejected { ordinal, status }) => {
                warn!(ordinal, status, "share rejected, continuing with remaining shares");
                submitted += 1;
            }
            Err(other) => return Err(other),
        }
    }

    warn!(submitted, total, "shares exhausted, target still sealed");
    Err(UnsealError::PartialQuorum {
        submitted,
        threshold,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Scripted target: counts calls, unseals after a set number of
    /// accepted shares, optionally rejects specific ordinals.
    struct ScriptedTarget {
        status_calls: AtomicUsize,
        submit_calls: AtomicUsize,
        accepted: AtomicUsize,
        /// Accepted-share count at which the target unseals; 0 = never.
        unseal_at: usize,
        threshold: u32,
        reject_ordinals: Vec<usize>,
    }

    impl ScriptedTarget {
        fn unseal_after(unseal_at: usize, threshold: u32) -> Self {
            Self {
                status_calls: AtomicUsize::new(0),
                submit_calls: AtomicUsize::new(0),
                accepted: AtomicUsize::new(0),
                unseal_at,
                threshold,
                reject_ordinals: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl SealTarget for ScriptedTarget {
        async fn status(&self) -> Result<SealStatus, UnsealError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let accepted = self.accepted.load(Ordering::SeqCst);
            Ok(SealStatus {
                sealed: self.unseal_at == 0 || accepted < self.unseal_at,
                progress: u32::try_from(accepted).unwrap(),
                threshold: self.threshold,
            })
        }

        async fn submit(&self, share: &KeyShare) -> Result<SealStatus, UnsealError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            if self.reject_ordinals.contains(&share.ordinal) {
                return Err(UnsealError::ShareRejected {
                    ordinal: share.ordinal,
                    status: 400,
                });
            }
            let accepted = self.accepted.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SealStatus {
                sealed: self.unseal_at == 0 || accepted < self.unseal_at,
                progress: u32::try_from(accepted).unwrap(),
                threshold: self.threshold,
            })
        }
    }

    fn shares(n: usize) -> Vec<KeyShare> {
        (0..n)
            .map(|i| KeyShare::new(format!("share-{i}"), format!("Unseal Key {}", i + 1), i))
            .collect()
    }

    // ── status idempotence ───────────────────────────────────────────

    #[tokio::test]
    async fn status_query_never_changes_seal_state() {
        let target = ScriptedTarget::unseal_after(3, 3);
        for _ in 0..5 {
            let status = target.status().await.unwrap();
            assert!(status.sealed);
            assert_eq!(status.progress, 0);
        }
        assert_eq!(target.submit_calls.load(Ordering::SeqCst), 0);
    }

    // ── short-circuit ────────────────────────────────────────────────

    #[tokio::test]
    async fn submission_stops_at_first_unsealed_response() {
        // Unseals on its 3rd accepted share; 5 offered.
        let target = ScriptedTarget::unseal_after(3, 3);

        let state = unseal_with_shares(&target, shares(5)).await.unwrap();
        assert!(!state.sealed);
        assert_eq!(target.submit_calls.load(Ordering::SeqCst), 3);
    }

    // ── partial quorum ───────────────────────────────────────────────

    #[tokio::test]
    async fn exhausted_shares_report_partial_quorum() {
        let target = ScriptedTarget::unseal_after(0, 5);

        let err = unseal_with_shares(&target, shares(2)).await.unwrap_err();
        let UnsealError::PartialQuorum {
            submitted,
            threshold,
        } = err
        else {
            unreachable!("expected PartialQuorum");
        };
        assert_eq!(submitted, 2);
        assert_eq!(threshold, 5);
        assert_eq!(target.submit_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_share_set_is_immediate_partial_quorum() {
        let target = ScriptedTarget::unseal_after(3, 3);
        let err = unseal_with_shares(&target, Vec::new()).await.unwrap_err();
        assert!(matches!(
            err,
            UnsealError::PartialQuorum { submitted: 0, .. }
        ));
        assert_eq!(target.submit_calls.load(Ordering::SeqCst), 0);
    }

    // ── rejected shares ──────────────────────────────────────────────

    #[tokio::test]
    async fn rejected_share_is_skipped_not_fatal() {
        // Rejects the 2nd share; unseals once 3 shares are accepted.
        let mut target = ScriptedTarget::unseal_after(3, 3);
        target.reject_ordinals = vec![1];

        let state = unseal_with_shares(&target, shares(5)).await.unwrap();
        assert!(!state.sealed);
        // Shares 0, 1 (rejected), 2, 3 — the 4th offered is the 3rd accepted.
        assert_eq!(target.submit_calls.load(Ordering::SeqCst), 4);
    }

    // ── wire mapping ─────────────────────────────────────────────────

    #[test]
    fn seal_status_decodes_wire_shape() {
        let status: SealStatus =
            serde_json::from_str(r#"{"sealed": true, "progress": 2, "t": 5}"#).unwrap();
        assert!(status.sealed);
        assert_eq!(status.progress, 2);
        assert_eq!(status.threshold, 5);
    }

    #[test]
    fn seal_status_tolerates_missing_counters() {
        let status: SealStatus = serde_json::from_str(r#"{"sealed": false}"#).unwrap();
        assert!(!status.sealed);
        assert_eq!(status.progress, 0);
        assert_eq!(status.threshold, 0);
    }
}
