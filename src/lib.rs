//! Close Reconciler Library
//!
//! Confirms pending position closes on-chain. A pass reads close requests
//! from the trading contract, fetches a proof for each from the proof
//! oracle, validates it and submits a close confirmation, retrying transient
//! failures under a bounded policy.
//!
//! ## Modules
//!
//! - [`domain`] - Close requests, proofs and pass outcomes
//! - [`infra`] - Error taxonomy, retry policy and client traits
//! - [`ledger`] - Contract bindings and the alloy-backed ledger gateway
//! - [`oracle`] - Proof oracle HTTP client and proof sources
//! - [`reconciler`] - The reconciliation loop
//! - [`metrics`] - In-process metrics registry
//! - [`config`] - Environment configuration
//! - [`api`] - HTTP routes
//! - [`server`] - Process bootstrap

pub mod api;
pub mod config;
pub mod domain;
pub mod infra;
pub mod ledger;
pub mod metrics;
pub mod oracle;
pub mod reconciler;
pub mod server;

// Re-export commonly used types
pub use domain::{AttemptOutcome, CloseRequest, OutcomeStatus, PassResult, Proof, Resolution};
pub use infra::{LedgerGateway, ProofOracle, ReconcileError, Result};
pub use reconciler::{Reconciler, ReconcilerConfig};
