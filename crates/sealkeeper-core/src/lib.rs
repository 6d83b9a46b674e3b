//! Core library for `sealkeeper` — sealed-vault auto-recovery.
//!
//! A storage-backed secrets service starts sealed after every restart and
//! cannot serve secrets until a quorum of unseal key shares is supplied.
//! This crate takes such a service from "sealed" to "unsealed" without a
//! human present, across three trust boundaries: a removable medium
//! carrying master credentials, a password-manager vault holding the key
//! shares, and the target service's seal API. Zero secrets are persisted
//! at rest beyond the removable medium itself.
//!
//! Execution is strictly sequential by design — each share submission
//! depends on observing the previous response, and concurrent attempts
//! against one target would risk submitting stale or duplicate shares.

pub mod config;
pub mod credentials;
pub mod error;
pub mod medium;
pub mod orchestrator;
pub mod resolver;
pub mod secret;
pub mod unsealer;
pub mod vault_client;
