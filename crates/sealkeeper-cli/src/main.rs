//! `sealkeeper` CLI — automated recovery for a sealed secrets service.
//!
//! A thin shell over `sealkeeper-core`: parses flags and environment,
//! initializes tracing, stamps every run with an execution id, and races
//! the orchestration against Ctrl-C so an interrupted run still tears down
//! its password-manager session.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Instrument, info, warn};
use tracing_subscriber::EnvFilter;

use sealkeeper_core::config::{self, UnsealConfig};
use sealkeeper_core::credentials;
use sealkeeper_core::error::RunError;
use sealkeeper_core::medium;
use sealkeeper_core::orchestrator::{self, RunOutcome};
use sealkeeper_core::unsealer::{HttpSealTarget, SealTarget};
use sealkeeper_core::vault_client::{BitwardenCli, VaultClient};

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";

const BANNER_SMALL: &str = "⟐ sealkeeper";

// ── CLI structure ────────────────────────────────────────────────────

/// sealkeeper — take a sealed secrets service back to unsealed, unattended.
#[derive(Parser)]
#[command(
    name = "sealkeeper",
    version,
    about = "sealkeeper — sealed-vault auto-recovery from a removable medium",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         VAULT_ADDR                    Target service address (default: https://127.0.0.1:8200)\n  \
         SEALKEEPER_TLS_VERIFY         Verify the target's TLS certificate (default: false)\n  \
         SEALKEEPER_VOLUME_LABEL       Removable-medium volume label (default: BW_PW_USB)\n  \
         SEALKEEPER_MARKER_FILE        Marker filename on the medium\n  \
         SEALKEEPER_ITEM_SEARCH        Password-manager item search term\n  \
         SEALKEEPER_FIELD_MODE         Field matching: prefix | exact (default: prefix)\n  \
         SEALKEEPER_FIELD_NAME         Field name or prefix to match\n  \
         SEALKEEPER_LIST_TIMEOUT_SECS  Item query deadline (default: 60)\n\n\
         {DIM}Examples:{RESET}\n  \
         sealkeeper status\n  \
         sealkeeper medium --label BW_PW_USB\n  \
         sealkeeper unseal --field-mode exact --field-name 'unseal key'"
    ),
)]
struct Cli {
    /// Target secrets-service address.
    #[arg(long, env = "VAULT_ADDR", default_value = config::DEFAULT_TARGET_ADDR)]
    addr: String,

    /// Verify the target's TLS certificate (self-issued certs fail this).
    #[arg(long, env = "SEALKEEPER_TLS_VERIFY", default_value = "false")]
    tls_verify: bool,

    /// Log filter when RUST_LOG is unset (e.g. info, debug).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the auto-unseal pipeline against the target service.
    Unseal {
        /// Volume label of the removable medium.
        #[arg(long, env = "SEALKEEPER_VOLUME_LABEL")]
        label: Option<String>,
        /// Marker file expected on the medium.
        #[arg(long, env = "SEALKEEPER_MARKER_FILE")]
        marker: Option<String>,
        /// Search term for the password-manager item holding the shares.
        #[arg(long, env = "SEALKEEPER_ITEM_SEARCH")]
        item: Option<String>,
        /// Field matching mode: "prefix" or "exact".
        #[arg(long, env = "SEALKEEPER_FIELD_MODE")]
        field_mode: Option<String>,
        /// Field name (exact mode) or name prefix (prefix mode) to match.
        #[arg(long, env = "SEALKEEPER_FIELD_NAME")]
        field_name: Option<String>,
        /// Password-manager CLI binary.
        #[arg(long, default_value = "bw")]
        bw_binary: String,
    },
    /// Show the target service's seal status.
    Status,
    /// Probe for the removable medium and list candidate accounts.
    Medium {
        /// Volume label of the removable medium.
        #[arg(long, env = "SEALKEEPER_VOLUME_LABEL")]
        label: Option<String>,
        /// Marker file expected on the medium.
        #[arg(long, env = "SEALKEEPER_MARKER_FILE")]
        marker: Option<String>,
    },
}

// ── Entry point ──────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    // Every run gets an execution id so audit trails can correlate events.
    let exec_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("run", exec_id = %exec_id);
    let result = dispatch(cli).instrument(span).await;

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let mut cfg = UnsealConfig::from_env();
    cfg.target_addr = cli.addr;
    cfg.tls_verify = cli.tls_verify;

    match cli.command {
        Commands::Unseal {
            label,
            marker,
            item,
            field_mode,
            field_name,
            bw_binary,
        } => {
            if let Some(label) = label {
                cfg.volume_label = label;
            }
            if marker.is_some() {
                cfg.marker_file = marker;
            }
            if let Some(item) = item {
                cfg.item_search = item;
            }
            if field_mode.is_some() || field_name.is_some() {
                cfg.field_match = config::field_match_from(field_mode.as_deref(), field_name);
            }
            cmd_unseal(&cfg, &bw_binary).await
        }
        Commands::Status => cmd_status(&cfg).await,
        Commands::Medium { label, marker } => {
            if let Some(label) = label {
                cfg.volume_label = label;
            }
            if marker.is_some() {
                cfg.marker_file = marker;
            }
            Ok(cmd_medium(&cfg))
        }
    }
}

// ── Commands ─────────────────────────────────────────────────────────

async fn cmd_unseal(cfg: &UnsealConfig, bw_binary: &str) -> Result<ExitCode> {
    let target = HttpSealTarget::new(cfg).context("building http client")?;
    let client = BitwardenCli::with_binary(bw_binary);

    println!();
    println!("  {BANNER_SMALL} {DIM}starting auto-unseal against {}{RESET}", cfg.target_addr);
    println!();

    let outcome = tokio::select! {
        result = orchestrator::run(cfg, &target, &client) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, tearing down any live session");
            let _ = tokio::time::timeout(Duration::from_secs(5), client.logout()).await;
            Err(RunError::Interrupted)
        }
    };

    match outcome {
        Ok(RunOutcome::AlreadyUnsealed) => {
            println!("  {GREEN}{BOLD}✓{RESET} already-unsealed");
            Ok(ExitCode::SUCCESS)
        }
        Ok(RunOutcome::UnsealedThisRun { account }) => {
            info!(account, "run complete");
            println!("  {GREEN}{BOLD}✓{RESET} unsealed-this-run {DIM}(account {account}){RESET}");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            if let RunError::AllAccountsExhausted { attempts } = &err {
                for attempt in attempts {
                    eprintln!("  {DIM}· {}: {}{RESET}", attempt.account, attempt.failure);
                }
            }
            eprintln!("  {RED}{BOLD}✗{RESET} failed: {err} {DIM}[{}]{RESET}", err.reason_code());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cmd_status(cfg: &UnsealConfig) -> Result<ExitCode> {
    let target = HttpSealTarget::new(cfg).context("building http client")?;
    let status = target.status().await.context("seal-status query failed")?;

    println!();
    if status.sealed {
        println!(
            "  {YELLOW}{BOLD}● sealed{RESET} {DIM}({}/{} shares toward quorum){RESET}",
            status.progress, status.threshold
        );
    } else {
        println!("  {GREEN}{BOLD}● unsealed{RESET}");
    }
    println!();
    Ok(ExitCode::SUCCESS)
}

fn cmd_medium(cfg: &UnsealConfig) -> ExitCode {
    match medium::locate(&cfg.medium, &cfg.volume_label, cfg.marker_file.as_deref()) {
        Some(handle) => {
            println!();
            println!("  {GREEN}{BOLD}✓{RESET} medium at {}", handle.mount.display());
            match credentials::extract(&handle.mount) {
                Ok(accounts) if accounts.is_empty() => {
                    println!("  {DIM}no credential blobs found{RESET}");
                }
                Ok(accounts) => {
                    for account in &accounts {
                        println!("  {DIM}·{RESET} {}", account.account);
                    }
                }
                Err(err) => {
                    eprintln!("  {YELLOW}!{RESET} could not read blobs: {err}");
                }
            }
            println!();
            ExitCode::SUCCESS
        }
        None => {
            eprintln!();
            eprintln!(
                "  {RED}{BOLD}✗{RESET} medium not found {DIM}(label {}){RESET}",
                cfg.volume_label
            );
            eprintln!();
            ExitCode::FAILURE
        }
    }
}
