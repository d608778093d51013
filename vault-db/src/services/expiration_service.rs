//! Expiration Service
//!
//! Reaps attempts left `pending` past their `expires_at`. Two mechanisms
//! share one idempotent expire step:
//!
//! - a one-shot timer armed when an attempt is created inside the horizon
//! - a periodic sweep over stored pending attempts, which also covers
//!   timers lost to a restart
//!
//! Expiring an attempt that already left `pending` is a no-op.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::SweepConfig;
use crate::storage::LedgerStore;
use vault_core::constants::{EXPIRATION_ACTOR, MAX_CONFLICT_RETRIES};
use vault_core::error::{LedgerError, LedgerResult};
use vault_core::logging::operations;
use vault_core::types::{AccessAttempt, AttemptStatus, RequestContext, TransitionRequest};

/// Result of one expire step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// The attempt moved to `expired`
    Expired,
    /// The attempt is no longer pending
    AlreadySettled,
    /// The attempt is pending but `expires_at` has not passed
    NotDue,
    NotFound,
}

/// Result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Expiration Service implementation
#[derive(Clone)]
pub struct ExpirationService {
    store: Arc<dyn LedgerStore>,
    horizon: chrono::Duration,
    sweep: SweepConfig,
}

impl ExpirationService {
    pub fn new(store: Arc<dyn LedgerStore>, horizon: chrono::Duration, sweep: SweepConfig) -> Self {
        Self { store, horizon, sweep }
    }

    /// Arm a one-shot timer for a new pending attempt
    ///
    /// Returns false when no timer was armed: the attempt is not pending, is
    /// already due, or expires beyond the horizon. The sweep covers those.
    pub fn schedule(&self, attempt: &AccessAttempt) -> bool {
        let now = Utc::now();
        if attempt.status != AttemptStatus::Pending
            || attempt.expires_at <= now
            || attempt.expires_at - now > self.horizon
        {
            return false;
        }
        let delay = match (attempt.expires_at - now).to_std() {
            Ok(delay) => delay,
            Err(_) => return false,
        };

        let service = self.clone();
        let attempt_id = attempt.attempt_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match service.expire(&attempt_id).await {
                Ok(outcome) => debug!(
                    attempt_id = %attempt_id,
                    outcome = ?outcome,
                    operation = operations::EXPIRE_FIRE,
                    "Expiration timer fired"
                ),
                Err(e) => warn!(
                    attempt_id = %attempt_id,
                    error = %e,
                    operation = operations::EXPIRE_FIRE,
                    "Expiration timer failed, sweep will retry"
                ),
            }
        });
        true
    }

    /// Expire an attempt if it is still pending and due
    pub async fn expire(&self, attempt_id: &str) -> LedgerResult<ExpireOutcome> {
        let ctx = RequestContext::system(EXPIRATION_ACTOR);
        let request = TransitionRequest::to(AttemptStatus::Expired).with_reason("expiration window elapsed");

        for _ in 0..MAX_CONFLICT_RETRIES {
            let now = Utc::now();
            let Some(current) = self.store.get_attempt(attempt_id).await? else {
                return Ok(ExpireOutcome::NotFound);
            };
            if current.status != AttemptStatus::Pending {
                return Ok(ExpireOutcome::AlreadySettled);
            }
            if current.expires_at > now {
                return Ok(ExpireOutcome::NotDue);
            }

            let applied = match current.apply_transition(&ctx, &request, now) {
                Ok(applied) => applied,
                Err(LedgerError::InvalidStatusTransition { .. }) => return Ok(ExpireOutcome::AlreadySettled),
                Err(e) => return Err(e),
            };

            match self.store.replace_attempt(&applied.attempt, current.revision).await {
                Ok(stored) => {
                    info!(
                        attempt_id = %stored.attempt_id,
                        subject_id = %stored.subject_id,
                        operation = operations::EXPIRE_FIRE,
                        "Access attempt expired"
                    );
                    return Ok(ExpireOutcome::Expired);
                }
                Err(e) => match LedgerError::from(e) {
                    LedgerError::Conflict(_) => {
                        debug!(attempt_id = %attempt_id, "Expiration raced another write, re-reading");
                    }
                    other => return Err(other),
                },
            }
        }
        Err(LedgerError::Conflict(format!("Attempt {} kept changing", attempt_id)))
    }

    /// Expire one batch of overdue pending attempts
    pub async fn sweep_once(&self) -> LedgerResult<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    async fn sweep_at(&self, now: DateTime<Utc>) -> LedgerResult<SweepReport> {
        let due = self.store.list_expired_pending(now, self.sweep.batch_size).await?;
        let mut report = SweepReport {
            scanned: due.len(),
            ..SweepReport::default()
        };

        for attempt in due {
            match self.expire(&attempt.attempt_id).await {
                Ok(ExpireOutcome::Expired) => report.expired += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    report.errors += 1;
                    warn!(attempt_id = %attempt.attempt_id, error = %e, "Failed to expire attempt");
                }
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                expired = report.expired,
                skipped = report.skipped,
                errors = report.errors,
                operation = operations::EXPIRE_SWEEP,
                "Expiration sweep finished"
            );
        }
        Ok(report)
    }

    /// Spawn the periodic sweep
    pub fn start(&self) -> SweepHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let running = Arc::new(RwLock::new(true));
        let running_clone = running.clone();
        let service = self.clone();
        let period: Duration = self.sweep.interval();

        tokio::spawn(async move {
            let mut timer = interval(period);
            info!(interval_secs = period.as_secs(), "Expiration sweep started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Expiration sweep received shutdown signal");
                        break;
                    }
                    _ = timer.tick() => {
                        if *running_clone.read().await {
                            if let Err(e) = service.sweep_once().await {
                                error!(error = %e, "Expiration sweep failed");
                            }
                        }
                    }
                }
            }

            *running_clone.write().await = false;
            info!("Expiration sweep stopped");
        });

        SweepHandle { shutdown_tx, running }
    }
}

/// Handle to a running sweep loop
pub struct SweepHandle {
    shutdown_tx: mpsc::Sender<()>,
    running: Arc<RwLock<bool>>,
}

impl SweepHandle {
    /// Stop the sweep loop
    pub async fn shutdown(self) {
        *self.running.write().await = false;
        let _ = self.shutdown_tx.send(()).await;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
