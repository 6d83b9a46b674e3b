//! Error types for `sealkeeper-core`.
//!
//! Each variant carries enough context to tell *which* stage failed without
//! a debugger. No variant embeds secret material — only account identifiers,
//! paths, timing, and HTTP status codes. Failures local to one candidate
//! account are [`AccountFailure`]; failures with no fallback are [`RunError`].

use std::path::PathBuf;
use std::time::Duration;

/// Errors reading credential blobs from the removable medium.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The medium directory or a blob could not be read.
    #[error("credential read failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A blob's content was not valid UTF-8 text.
    #[error("credential file {path} is not valid UTF-8")]
    NotUtf8 { path: PathBuf },
}

/// Errors from the password-manager vault client.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Login or unlock was rejected by the password manager.
    #[error("authentication failed for {account}: {detail}")]
    Auth { account: String, detail: String },

    /// The item query exceeded its deadline.
    #[error("vault item query timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The query failed or the client produced output we could not interpret.
    #[error("vault item query failed: {reason}")]
    Query { reason: String },

    /// Spawning or talking to the external client binary failed.
    #[error("vault client I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the target secrets service.
#[derive(Debug, thiserror::Error)]
pub enum UnsealError {
    /// Building the HTTP client failed (bad address or TLS setup).
    #[error("http client construction failed: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// The target service could not be reached.
    #[error("target service unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    /// The service answered, but not with a seal-status payload.
    #[error("unexpected seal-status response: {reason}")]
    UnexpectedResponse { reason: String },

    /// A share submission was rejected outright by the service.
    #[error("share {ordinal} rejected with HTTP {status}")]
    ShareRejected { ordinal: usize, status: u16 },

    /// Every share was submitted and the service is still sealed.
    #[error(
        "partial quorum: {submitted} share(s) submitted against threshold {threshold}, still sealed"
    )]
    PartialQuorum { submitted: usize, threshold: u32 },
}

/// Why one candidate account failed to unseal the target.
///
/// These are caught and logged by the orchestrator, which then advances to
/// the next account — they only surface as a run failure once every account
/// is exhausted.
#[derive(Debug, thiserror::Error)]
pub enum AccountFailure {
    /// `login` was rejected.
    #[error("login failed: {0}")]
    Login(#[source] BrokerError),

    /// `unlock` was rejected after a successful login.
    #[error("unlock failed: {0}")]
    Unlock(#[source] BrokerError),

    /// The key-share query failed or timed out.
    #[error("share resolution failed: {0}")]
    Resolve(#[source] BrokerError),

    /// The vault held no matching item or no matching non-empty field.
    #[error("no key shares found in the vault")]
    NoKeyShares,

    /// The account's complete share set left the target sealed.
    #[error("shares exhausted: {submitted} submitted against threshold {threshold}")]
    PartialQuorum { submitted: usize, threshold: u32 },

    /// Share submission failed for a non-quorum reason (e.g. transport).
    #[error("share submission failed: {0}")]
    Submit(#[source] UnsealError),
}

/// One attempted account and how it failed.
#[derive(Debug)]
pub struct AccountAttempt {
    /// Account identifier (the blob's file stem).
    pub account: String,
    /// Terminal failure for this account.
    pub failure: AccountFailure,
}

/// Run-level failures with no fallback.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The initial seal-status query failed — nothing else was attempted.
    #[error("target unreachable: {0}")]
    TargetUnreachable(#[source] UnsealError),

    /// No removable medium carrying the marker was found.
    #[error("removable medium not found (label {label})")]
    MediumNotFound { label: String },

    /// The medium was found but carried no credential blobs.
    #[error("no credential files on medium at {path}")]
    NoCredentials { path: PathBuf },

    /// Reading the medium failed outright.
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    /// Every candidate account was attempted and the target is still sealed.
    #[error("all {} candidate account(s) exhausted, target still sealed", attempts.len())]
    AllAccountsExhausted { attempts: Vec<AccountAttempt> },

    /// The operator interrupted the run.
    #[error("interrupted by operator")]
    Interrupted,
}

impl RunError {
    /// Stable reason code for the exit/report contract.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::TargetUnreachable(_) => "target-unreachable",
            Self::MediumNotFound { .. } => "medium-not-found",
            Self::NoCredentials { .. } | Self::Credentials(_) => "no-credentials",
            Self::AllAccountsExhausted { .. } => "all-accounts-exhausted",
            Self::Interrupted => "interrupted",
        }
    }
}
