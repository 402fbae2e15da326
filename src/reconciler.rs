//! Reconciliation loop
//!
//! One pass discovers pending close requests, acquires a proof for each,
//! and submits close confirmations strictly one at a time. Submissions share
//! one signing key, so running them sequentially keeps nonces consistent
//! without explicit allocation.
//!
//! Only discovery failures and batch-proof failures abort a pass. Every
//! other error is recorded against the request that caused it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::{parse_env, parse_env_millis, parse_env_secs};
use crate::domain::{
    AttemptOutcome, CloseRequest, InspectionEntry, InspectionStatus, OutcomeStatus, PassResult,
    Proof, INVALID_ID_REASON,
};
use crate::infra::{LedgerGateway, ReconcileError, Result, Retry, RetryConfig};
use crate::ledger::DEFAULT_CLOSE_GAS_LIMIT;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::oracle::{with_timeout, PassProofs, ProofMode, ProofSource};

/// Default budget for any single network call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on submission attempts per request
pub const MAX_SUBMISSION_ATTEMPTS: u32 = 15;

/// Cap on the wait between submissions when backoff grows
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Reconciliation loop configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Gas limit attached to each close confirmation
    pub gas_limit: u64,
    /// Retry policy for transient submission failures
    pub retry: RetryConfig,
    /// Budget for each discovery, proof or submission call
    pub call_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_CLOSE_GAS_LIMIT,
            retry: RetryConfig::close_submission(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl ReconcilerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let retry = submission_retry_policy(
            parse_env("SUBMIT_MAX_ATTEMPTS", defaults.retry.max_attempts())?,
            parse_env_millis("SUBMIT_RETRY_INTERVAL_MS", defaults.retry.initial_delay)?,
            parse_env("SUBMIT_RETRY_MULTIPLIER", defaults.retry.multiplier)?,
            parse_env_millis("SUBMIT_RETRY_MAX_DELAY_MS", DEFAULT_MAX_RETRY_DELAY)?,
            parse_env("SUBMIT_RETRY_JITTER", defaults.retry.jitter)?,
        )?;

        Ok(Self {
            gas_limit: parse_env("CLOSE_GAS_LIMIT", defaults.gas_limit)?,
            retry,
            call_timeout: parse_env_secs("CALL_TIMEOUT_SECS", defaults.call_timeout)?,
        })
    }
}

/// Build the submission retry policy from its configured parts.
///
/// Attempts must lie in `1..=15`, the multiplier must be at least 1.0 and
/// jitter within `0.0..=1.0`. The delay cap never undercuts the interval.
pub fn submission_retry_policy(
    max_attempts: u32,
    interval: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter: f64,
) -> Result<RetryConfig> {
    if !(1..=MAX_SUBMISSION_ATTEMPTS).contains(&max_attempts) {
        return Err(ReconcileError::Configuration(format!(
            "SUBMIT_MAX_ATTEMPTS must be between 1 and {MAX_SUBMISSION_ATTEMPTS}, got {max_attempts}"
        )));
    }
    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(ReconcileError::Configuration(format!(
            "SUBMIT_RETRY_MULTIPLIER must be at least 1.0, got {multiplier}"
        )));
    }
    if !(0.0..=1.0).contains(&jitter) {
        return Err(ReconcileError::Configuration(format!(
            "SUBMIT_RETRY_JITTER must be between 0.0 and 1.0, got {jitter}"
        )));
    }

    Ok(RetryConfig::fixed(0, interval)
        .with_max_attempts(max_attempts)
        .with_multiplier(multiplier)
        .with_max_delay(max_delay.max(interval))
        .with_jitter(jitter))
}

/// Drives reconciliation passes against injected ledger and proof clients
pub struct Reconciler {
    ledger: Arc<dyn LedgerGateway>,
    proofs: ProofSource,
    config: ReconcilerConfig,
    metrics: Arc<MetricsRegistry>,
    /// Single-flight guard: at most one pass runs at a time
    pass_guard: Mutex<()>,
    /// Set while `pass_guard` is held; read by the health endpoint
    busy: AtomicBool,
}

/// Clears the busy flag when a pass ends, including on cancellation.
struct BusyFlag<'a>(&'a AtomicBool);

impl<'a> BusyFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for BusyFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        proofs: ProofSource,
        config: ReconcilerConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            ledger,
            proofs,
            config,
            metrics,
            pass_guard: Mutex::new(()),
            busy: AtomicBool::new(false),
        }
    }

    pub fn proof_mode(&self) -> ProofMode {
        self.proofs.mode()
    }

    /// Whether a pass is currently running
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Execute exactly one reconciliation pass.
    ///
    /// Returns one outcome per discovered request, in discovery order, or a
    /// pass-level error when nothing could be processed. A trigger that
    /// arrives while another pass runs gets [`ReconcileError::PassInProgress`].
    pub async fn run_pass(&self) -> Result<PassResult> {
        let _guard = match self.pass_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Rejected reconciliation trigger: pass already running");
                self.metrics.inc_counter(metric_names::PASSES_REJECTED).await;
                return Err(ReconcileError::PassInProgress);
            }
        };
        let _busy = BusyFlag::raise(&self.busy);

        self.metrics.inc_counter(metric_names::PASSES_STARTED).await;
        let started = Instant::now();

        let result = self.execute_pass().await;

        self.metrics
            .observe_histogram(metric_names::PASS_DURATION, started.elapsed().as_secs_f64())
            .await;

        match &result {
            Ok(pass) => {
                let closed = pass.count(OutcomeStatus::Closed);
                let failed = pass.count(OutcomeStatus::Failed);
                let skipped = pass.count(OutcomeStatus::Skipped);

                self.metrics
                    .add_counter(metric_names::POSITIONS_CLOSED, closed as u64)
                    .await;
                self.metrics
                    .add_counter(metric_names::POSITIONS_FAILED, failed as u64)
                    .await;
                self.metrics
                    .add_counter(metric_names::POSITIONS_SKIPPED, skipped as u64)
                    .await;
                self.metrics
                    .set_gauge(metric_names::LAST_PASS_SIZE, pass.len() as u64)
                    .await;

                info!(
                    requests = pass.len(),
                    closed,
                    failed,
                    skipped,
                    attempts = pass.total_attempts(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Reconciliation pass finished"
                );
            }
            Err(e) => {
                self.metrics.inc_counter(metric_names::PASSES_ABORTED).await;
                error!(error = %e, "Reconciliation pass aborted");
            }
        }

        result
    }

    async fn execute_pass(&self) -> Result<PassResult> {
        let requests = self.discover().await?;
        info!(
            requests = requests.len(),
            mode = %self.proofs.mode(),
            "Starting reconciliation pass"
        );

        if requests.is_empty() {
            return Ok(PassResult::default());
        }

        // Batch mode fetches the shared proof here; failing it aborts the pass
        let proofs = self.proofs.open_pass(self.config.call_timeout).await?;

        let mut result = PassResult::with_capacity(requests.len());
        for request in &requests {
            result.push(self.resolve(request, &proofs).await);
        }

        Ok(result)
    }

    async fn discover(&self) -> Result<Vec<CloseRequest>> {
        with_timeout(
            "discovery",
            self.config.call_timeout,
            self.ledger.discover_pending_closes(),
        )
        .await
        .map_err(|e| match e {
            ReconcileError::Discovery(_) => e,
            other => ReconcileError::Discovery(other.to_string()),
        })
    }

    /// Drive one request to a terminal outcome.
    async fn resolve(&self, request: &CloseRequest, proofs: &PassProofs<'_>) -> AttemptOutcome {
        if !request.has_assigned_id() {
            info!(asset_index = request.asset_index, "Skipping close request without id");
            return AttemptOutcome::skipped(request.position_id, INVALID_ID_REASON);
        }

        let proof = match proofs.acquire_proof(request).await {
            Ok(proof) => proof,
            Err(e) => {
                if matches!(e, ReconcileError::Validation(_)) {
                    self.metrics.inc_counter(metric_names::PROOFS_REJECTED).await;
                }
                warn!(
                    position_id = request.position_id,
                    asset_index = request.asset_index,
                    error = %e,
                    "Proof unavailable"
                );
                return AttemptOutcome::failed(request.position_id, e.to_string(), 0);
            }
        };

        self.submit_with_retry(request.position_id, &proof).await
    }

    /// Submit a confirmation, retrying transient failures under the policy.
    ///
    /// The proof is reused across attempts.
    async fn submit_with_retry(&self, position_id: u64, proof: &Proof) -> AttemptOutcome {
        let ledger = self.ledger.as_ref();
        let metrics = self.metrics.as_ref();
        let gas_limit = self.config.gas_limit;
        let call_timeout = self.config.call_timeout;

        let outcome = Retry::new(self.config.retry.clone())
            .run_with_predicate(
                "close confirmation",
                move || async move {
                    metrics.inc_counter(metric_names::SUBMISSION_ATTEMPTS).await;
                    with_timeout(
                        "close submission",
                        call_timeout,
                        ledger.submit_close_confirmation(position_id, proof, gas_limit),
                    )
                    .await
                },
                |e: &ReconcileError| e.is_transient(),
            )
            .await;

        if outcome.attempts > 1 {
            self.metrics
                .add_counter(
                    metric_names::SUBMISSION_RETRIES,
                    u64::from(outcome.attempts - 1),
                )
                .await;
        }

        match outcome.result {
            Ok(tx_hash) => {
                info!(position_id, %tx_hash, attempts = outcome.attempts, "Position closed");
                AttemptOutcome::closed(position_id, tx_hash, outcome.attempts)
            }
            Err(e) => {
                warn!(
                    position_id,
                    attempts = outcome.attempts,
                    error = %e,
                    "Position close failed"
                );
                AttemptOutcome::failed(position_id, e.to_string(), outcome.attempts)
            }
        }
    }

    /// Discover requests and check their proofs without submitting anything.
    pub async fn inspect(&self) -> Result<Vec<InspectionEntry>> {
        let requests = self.discover().await?;
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let proofs = self.proofs.open_pass(self.config.call_timeout).await?;

        let mut entries = Vec::with_capacity(requests.len());
        for request in &requests {
            let status = if !request.has_assigned_id() {
                InspectionStatus::Invalid {
                    reason: INVALID_ID_REASON.to_string(),
                }
            } else {
                match proofs.acquire_proof(request).await {
                    Ok(proof) => InspectionStatus::Valid {
                        proof_length: proof.len(),
                    },
                    Err(e) => InspectionStatus::Invalid {
                        reason: e.to_string(),
                    },
                }
            };

            entries.push(InspectionEntry {
                position_id: request.position_id,
                asset_index: request.asset_index,
                status,
            });
        }

        Ok(entries)
    }
}
