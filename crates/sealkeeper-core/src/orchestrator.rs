//! End-to-end auto-unseal orchestration.
//!
//! Drives the pipeline: target status gate, medium discovery, credential
//! extraction, then a strictly sequential per-account loop of
//! logout → login → unlock → resolve → submit. The first account whose
//! shares unseal the target wins and everything after is skipped. Strictly
//! one live password-manager session at a time — each account's session is
//! torn down before the next begins.

use tracing::{info, warn};

use crate::config::UnsealConfig;
use crate::credentials::{self, AccountCredential};
use crate::error::{AccountAttempt, AccountFailure, RunError, UnsealError};
use crate::medium;
use crate::resolver;
use crate::secret::MasterCredential;
use crate::unsealer::{self, SealTarget};
use crate::vault_client::VaultClient;

/// Terminal outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The target was never sealed — nothing was touched.
    AlreadyUnsealed,
    /// This run unsealed the target using the named account's shares.
    UnsealedThisRun {
        /// Account whose shares completed the quorum.
        account: String,
    },
}

/// Execute one auto-unseal run.
///
/// Transition rules: a failed initial status query terminates immediately
/// with [`RunError::TargetUnreachable`] — no medium or vault access is
/// attempted. An already-unsealed target is a trivial success with zero
/// side effects. Within the per-account loop, any failure advances to the
/// next candidate; only a missing medium or an empty credential set is
/// run-fatal.
///
/// # Errors
///
/// [`RunError::TargetUnreachable`], [`RunError::MediumNotFound`],
/// [`RunError::NoCredentials`], [`RunError::Credentials`], or
/// [`RunError::AllAccountsExhausted`] carrying every per-account failure.
pub async fn run(
    cfg: &UnsealConfig,
    target: &dyn SealTarget,
    client: &dyn VaultClient,
) -> Result<RunOutcome, RunError> {
    let status = target.status().await.map_err(RunError::TargetUnreachable)?;
    if !status.sealed {
        info!("target already unsealed, nothing to do");
        return Ok(RunOutcome::AlreadyUnsealed);
    }
    info!(
        progress = status.progress,
        threshold = status.threshold,
        "target is sealed, starting recovery"
    );

    let Some(handle) = medium::locate(&cfg.medium, &cfg.volume_label, cfg.marker_file.as_deref())
    else {
        return Err(RunError::MediumNotFound {
            label: cfg.volume_label.clone(),
        });
    };
    info!(mount = %handle.mount.display(), "removable medium located");

    let accounts = credentials::extract(&handle.mount)?;
    if accounts.is_empty() {
        return Err(RunError::NoCredentials { path: handle.mount });
    }
    info!(count = accounts.len(), "candidate accounts found on medium");

    let mut attempts = Vec::new();
    for AccountCredential {
        account,
        credential,
    } in accounts
    {
        info!(account, "attempting account");
        let result = try_account(cfg, target, client, &account, &credential).await;
        teardown(client, &account).await;
        match result {
            Ok(()) => return Ok(RunOutcome::UnsealedThisRun { account }),
            Err(failure) => {
                warn!(account, %failure, "account attempt failed, moving on");
                attempts.push(AccountAttempt { account, failure });
            }
        }
    }

    Err(RunError::AllAccountsExhausted { attempts })
}

/// One account attempt: logout → login → unlock → resolve → submit.
async fn try_account(
    cfg: &UnsealConfig,
    target: &dyn SealTarget,
    client: &dyn VaultClient,
    account: &str,
    credential: &MasterCredential,
) -> Result<(), AccountFailure> {
    // A stale session from a previous account or run would make login fail.
    if let Err(err) = client.logout().await {
        warn!(account, %err, "pre-login logout failed, continuing");
    }

    client
        .login(account, credential)
        .await
        .map_err(AccountFailure::Login)?;
    let session = client
        .unlock(account, credential)
        .await
        .map_err(AccountFailure::Unlock)?;

    let shares = resolver::resolve_shares(
        client,
        &session,
        &cfg.item_search,
        &cfg.field_match,
        cfg.list_timeout,
    )
    .await
    .map_err(AccountFailure::Resolve)?;
    if shares.is_empty() {
        return Err(AccountFailure::NoKeyShares);
    }
    info!(account, count = shares.len(), "key shares resolved, submitting");

    match unsealer::unseal_with_shares(target, shares).await {
        Ok(_) => Ok(()),
        Err(UnsealError::PartialQuorum {
            submitted,
            threshold,
        }) => Err(AccountFailure::PartialQuorum {
            submitted,
            threshold,
        }),
        Err(other) => Err(AccountFailure::Submit(other)),
    }
}

/// Best-effort session teardown between accounts. Never fatal.
async fn teardown(client: &dyn VaultClient, account: &str) {
    if let Err(err) = client.logout().await {
        warn!(account, %err, "session teardown failed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::MediumConfig;
    use crate::error::BrokerError;
    use crate::resolver::FieldMatch;
    use crate::secret::{KeyShare, SessionToken};
    use crate::unsealer::SealStatus;
    use crate::vault_client::{ItemField, VaultItem};

    // ── fakes ────────────────────────────────────────────────────────

    /// Scripted seal target: unseals after a set number of accepted shares.
    struct FakeTarget {
        sealed: bool,
        unseal_at: usize,
        accepted: AtomicUsize,
        submit_calls: AtomicUsize,
    }

    impl FakeTarget {
        fn sealed_until(unseal_at: usize) -> Self {
            Self {
                sealed: true,
                unseal_at,
                accepted: AtomicUsize::new(0),
                submit_calls: AtomicUsize::new(0),
            }
        }

        fn already_unsealed() -> Self {
            Self {
                sealed: false,
                unseal_at: 0,
                accepted: AtomicUsize::new(0),
                submit_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SealTarget for FakeTarget {
        async fn status(&self) -> Result<SealStatus, UnsealError> {
            Ok(SealStatus {
                sealed: self.sealed,
                progress: 0,
                threshold: 3,
            })
        }

        async fn submit(&self, _share: &KeyShare) -> Result<SealStatus, UnsealError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            let accepted = self.accepted.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SealStatus {
                sealed: self.unseal_at == 0 || accepted < self.unseal_at,
                progress: u32::try_from(accepted).unwrap(),
                threshold: 3,
            })
        }
    }

    /// Unreachable target: every call fails.
    struct DeadTarget;

    #[async_trait]
    impl SealTarget for DeadTarget {
        async fn status(&self) -> Result<SealStatus, UnsealError> {
            Err(UnsealError::UnexpectedResponse {
                reason: "connection refused".to_owned(),
            })
        }

        async fn submit(&self, _: &KeyShare) -> Result<SealStatus, UnsealError> {
            Err(UnsealError::UnexpectedResponse {
                reason: "connection refused".to_owned(),
            })
        }
    }

    /// Scripted vault client: per-account login verdicts and share sets,
    /// with a call log for ordering assertions.
    #[derive(Default)]
    struct FakeClient {
        /// Accounts whose login is rejected.
        reject_login: Vec<String>,
        /// Shares returned per account (as item fields).
        shares: HashMap<String, Vec<String>>,
        log: Mutex<Vec<String>>,
        current: Mutex<Option<String>>,
    }

    impl FakeClient {
        fn log_entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn calls_of(&self, verb: &str) -> usize {
            self.log_entries()
                .iter()
                .filter(|entry| entry.starts_with(verb))
                .count()
        }
    }

    #[async_trait]
    impl VaultClient for FakeClient {
        async fn logout(&self) -> Result<(), BrokerError> {
            self.log.lock().unwrap().push("logout".to_owned());
            *self.current.lock().unwrap() = None;
            Ok(())
        }

        async fn login(&self, account: &str, _: &MasterCredential) -> Result<(), BrokerError> {
            self.log.lock().unwrap().push(format!("login {account}"));
            if self.reject_login.contains(&account.to_owned()) {
                return Err(BrokerError::Auth {
                    account: account.to_owned(),
                    detail: "scripted rejection".to_owned(),
                });
            }
            Ok(())
        }

        async fn unlock(
            &self,
            account: &str,
            _: &MasterCredential,
        ) -> Result<SessionToken, BrokerError> {
            self.log.lock().unwrap().push(format!("unlock {account}"));
            *self.current.lock().unwrap() = Some(account.to_owned());
            Ok(SessionToken::new(format!("session-{account}")))
        }

        async fn list_items(
            &self,
            _: &SessionToken,
            search: &str,
        ) -> Result<Vec<VaultItem>, BrokerError> {
            self.log.lock().unwrap().push(format!("list {search}"));
            let account = self.current.lock().unwrap().clone().unwrap_or_default();
            let fields = self
                .shares
                .get(&account)
                .map(|values| {
                    values
                        .iter()
                        .enumerate()
                        .map(|(i, v)| ItemField {
                            name: Some(format!("Unseal Key {}", i + 1)),
                            value: Some(v.clone()),
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(vec![VaultItem {
                name: search.to_owned(),
                fields,
            }])
        }
    }

    /// Config pointing medium discovery at a scratch directory holding one
    /// fallback mount (`<root>/a`) with the given account blobs.
    fn scratch_setup(accounts: &[&str]) -> (tempfile::TempDir, UnsealConfig) {
        let dir = tempfile::tempdir().unwrap();
        let mount = dir.path().join("mnt").join("a");
        std::fs::create_dir_all(&mount).unwrap();
        for account in accounts {
            std::fs::write(mount.join(format!("{account}.enc")), b"master-pw\n").unwrap();
        }
        let cfg = UnsealConfig {
            field_match: FieldMatch::Prefix("Unseal Key".to_owned()),
            medium: MediumConfig {
                by_label_root: dir.path().join("by-label"),
                mount_table: dir.path().join("mounts"),
                mount_root: dir.path().join("mnt"),
            },
            ..UnsealConfig::default()
        };
        (dir, cfg)
    }

    // ── trivial success ──────────────────────────────────────────────

    #[tokio::test]
    async fn already_unsealed_touches_nothing() {
        let (_dir, cfg) = scratch_setup(&["ops@example.com"]);
        let target = FakeTarget::already_unsealed();
        let client = FakeClient::default();

        let outcome = run(&cfg, &target, &client).await.unwrap();
        assert_eq!(outcome, RunOutcome::AlreadyUnsealed);
        assert!(client.log_entries().is_empty());
        assert_eq!(target.submit_calls.load(Ordering::SeqCst), 0);
    }

    // ── run-fatal failures ───────────────────────────────────────────

    #[tokio::test]
    async fn unreachable_target_fails_before_medium_access() {
        let (_dir, cfg) = scratch_setup(&["ops@example.com"]);
        let client = FakeClient::default();

        let err = run(&cfg, &DeadTarget, &client).await.unwrap_err();
        assert_eq!(err.reason_code(), "target-unreachable");
        assert!(client.log_entries().is_empty());
    }

    #[tokio::test]
    async fn missing_medium_fails_without_any_session() {
        let (_dir, cfg) = scratch_setup(&[]);
        // Remove the fallback mount so nothing is discoverable.
        std::fs::remove_dir_all(cfg.medium.mount_root.join("a")).unwrap();
        let target = FakeTarget::sealed_until(1);
        let client = FakeClient::default();

        let err = run(&cfg, &target, &client).await.unwrap_err();
        assert_eq!(err.reason_code(), "medium-not-found");
        assert!(client.log_entries().is_empty());
    }

    #[tokio::test]
    async fn marked_medium_without_blobs_is_no_credentials() {
        let (_dir, mut cfg) = scratch_setup(&[]);
        // Mark the otherwise-empty mount so discovery succeeds.
        std::fs::write(cfg.medium.mount_root.join("a").join("marker"), b"").unwrap();
        cfg.marker_file = Some("marker".to_owned());
        let target = FakeTarget::sealed_until(1);
        let client = FakeClient::default();

        let err = run(&cfg, &target, &client).await.unwrap_err();
        assert_eq!(err.reason_code(), "no-credentials");
        assert!(client.log_entries().is_empty());
    }

    // ── per-account loop ─────────────────────────────────────────────

    #[tokio::test]
    async fn first_unsealing_account_wins() {
        let (_dir, cfg) = scratch_setup(&["ada@example.com", "zoe@example.com"]);
        // Two shares per account; target unseals on the 4th accepted share,
        // so ada's pair cannot finish the quorum but zoe's second can.
        let target = FakeTarget::sealed_until(4);
        let mut client = FakeClient::default();
        client.shares.insert(
            "ada@example.com".to_owned(),
            vec!["a1".to_owned(), "a2".to_owned()],
        );
        client.shares.insert(
            "zoe@example.com".to_owned(),
            vec!["z1".to_owned(), "z2".to_owned()],
        );

        let outcome = run(&cfg, &target, &client).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::UnsealedThisRun {
                account: "zoe@example.com".to_owned()
            }
        );
        // Accounts attempted in lexicographic order, ada first.
        let logins: Vec<String> = client
            .log_entries()
            .into_iter()
            .filter(|e| e.starts_with("login"))
            .collect();
        assert_eq!(logins, vec!["login ada@example.com", "login zoe@example.com"]);
        assert_eq!(target.submit_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn login_failure_advances_to_next_account() {
        let (_dir, cfg) = scratch_setup(&["ada@example.com", "zoe@example.com"]);
        let target = FakeTarget::sealed_until(1);
        let mut client = FakeClient::default();
        client.reject_login.push("ada@example.com".to_owned());
        client
            .shares
            .insert("zoe@example.com".to_owned(), vec!["z1".to_owned()]);

        let outcome = run(&cfg, &target, &client).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::UnsealedThisRun {
                account: "zoe@example.com".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn all_accounts_exhausted_reports_each_failure() {
        let (_dir, cfg) = scratch_setup(&["ada@example.com", "zoe@example.com"]);
        let target = FakeTarget::sealed_until(0);
        let mut client = FakeClient::default();
        client.reject_login.push("ada@example.com".to_owned());
        client
            .shares
            .insert("zoe@example.com".to_owned(), vec!["z1".to_owned()]);

        let err = run(&cfg, &target, &client).await.unwrap_err();
        let RunError::AllAccountsExhausted { attempts } = err else {
            unreachable!("expected AllAccountsExhausted");
        };
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].account, "ada@example.com");
        assert!(matches!(attempts[0].failure, AccountFailure::Login(_)));
        assert_eq!(attempts[1].account, "zoe@example.com");
        assert!(matches!(
            attempts[1].failure,
            AccountFailure::PartialQuorum { .. }
        ));
    }

    #[tokio::test]
    async fn account_without_shares_is_no_key_shares() {
        let (_dir, cfg) = scratch_setup(&["ops@example.com"]);
        let target = FakeTarget::sealed_until(1);
        let client = FakeClient::default();

        let err = run(&cfg, &target, &client).await.unwrap_err();
        let RunError::AllAccountsExhausted { attempts } = err else {
            unreachable!("expected AllAccountsExhausted");
        };
        assert!(matches!(attempts[0].failure, AccountFailure::NoKeyShares));
        // No shares ever reached the target.
        assert_eq!(target.submit_calls.load(Ordering::SeqCst), 0);
    }

    // ── session hygiene ──────────────────────────────────────────────

    #[tokio::test]
    async fn every_account_attempt_is_bracketed_by_logout() {
        let (_dir, cfg) = scratch_setup(&["ada@example.com", "zoe@example.com"]);
        let target = FakeTarget::sealed_until(0);
        let mut client = FakeClient::default();
        client
            .shares
            .insert("ada@example.com".to_owned(), vec!["a1".to_owned()]);
        client
            .shares
            .insert("zoe@example.com".to_owned(), vec!["z1".to_owned()]);

        let _ = run(&cfg, &target, &client).await;
        // Two accounts, each with a pre-login and a teardown logout.
        assert_eq!(client.calls_of("logout"), 4);
    }
}
