use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use crate::config::toml_config::EngineConfig;
use crate::core::lifecycle::OccupancyLifecycle;
use crate::core::provisioning::{LotProvisioner, DEFAULT_MAX_SLOTS_PER_LOT};
use crate::core::reporting::ReportingView;
use crate::domain::model::{DailyReport, Lot, LotId, LotStatus, Occupancy};
use crate::domain::ports::{Clock, ParkingService, Store};
use crate::utils::error::{ErrorKind, ParkingError, Result};

/// Retries apply to store serialization failures only; business conflicts
/// are returned immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before attempt `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub retry: RetryPolicy,
    pub max_slots_per_lot: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_slots_per_lot: DEFAULT_MAX_SLOTS_PER_LOT,
        }
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            retry: RetryPolicy {
                max_retries: config.max_retries,
                backoff: Duration::from_millis(config.retry_backoff_ms),
            },
            max_slots_per_lot: config.max_slots_per_lot,
        }
    }
}

/// Async facade over provisioning, the occupancy lifecycle and reporting.
///
/// Store work runs on the blocking pool. Every call gets its own child
/// cancellation token; dropping the returned future cancels it, so an
/// abandoned request rolls back instead of committing behind the caller's
/// back.
pub struct ParkingEngine<S: Store + 'static> {
    store: Arc<S>,
    provisioner: Arc<LotProvisioner<S>>,
    lifecycle: Arc<OccupancyLifecycle<S>>,
    reporting: Arc<ReportingView<S>>,
    retry: RetryPolicy,
}

impl<S: Store + 'static> Clone for ParkingEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            provisioner: Arc::clone(&self.provisioner),
            lifecycle: Arc::clone(&self.lifecycle),
            reporting: Arc::clone(&self.reporting),
            retry: self.retry,
        }
    }
}

impl<S: Store + 'static> ParkingEngine<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, settings: EngineSettings) -> Self {
        Self {
            provisioner: Arc::new(LotProvisioner::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                settings.max_slots_per_lot,
            )),
            lifecycle: Arc::new(OccupancyLifecycle::new(Arc::clone(&store), clock)),
            reporting: Arc::new(ReportingView::new(Arc::clone(&store))),
            store,
            retry: settings.retry,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn create_lot_with(
        &self,
        cancel: &CancellationToken,
        name: &str,
        desired_slots: u32,
    ) -> Result<Lot> {
        let provisioner = Arc::clone(&self.provisioner);
        let name = name.to_string();
        self.run_blocking("create_lot", cancel, move |token| {
            provisioner.create_lot(token, &name, desired_slots)
        })
        .await
    }

    #[tracing::instrument(skip(self, cancel), fields(lot = %lot_id))]
    pub async fn park_vehicle_with(
        &self,
        cancel: &CancellationToken,
        lot_id: LotId,
        registration_number: &str,
    ) -> Result<Occupancy> {
        let lifecycle = Arc::clone(&self.lifecycle);
        let registration = registration_number.to_string();
        self.run_blocking("park_vehicle", cancel, move |token| {
            lifecycle.park(token, &lot_id, &registration)
        })
        .await
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn unpark_vehicle_with(
        &self,
        cancel: &CancellationToken,
        registration_number: &str,
    ) -> Result<Occupancy> {
        let lifecycle = Arc::clone(&self.lifecycle);
        let registration = registration_number.to_string();
        self.run_blocking("unpark_vehicle", cancel, move |token| {
            lifecycle.unpark(token, &registration)
        })
        .await
    }

    #[tracing::instrument(skip(self), fields(lot = %lot_id))]
    pub async fn lot_status(&self, lot_id: LotId) -> Result<LotStatus> {
        let reporting = Arc::clone(&self.reporting);
        self.run_blocking("lot_status", &CancellationToken::new(), move |_| {
            reporting.lot_status(&lot_id)
        })
        .await
    }

    #[tracing::instrument(skip(self), fields(lot = %lot_id))]
    pub async fn daily_report(&self, lot_id: LotId, date: NaiveDate) -> Result<DailyReport> {
        let reporting = Arc::clone(&self.reporting);
        self.run_blocking("daily_report", &CancellationToken::new(), move |_| {
            reporting.daily_report(&lot_id, date)
        })
        .await
    }

    async fn run_blocking<T, F>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&CancellationToken) -> Result<T> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let mut attempt: u32 = 0;

        loop {
            let token = cancel.child_token();
            // Cancels the attempt if this future is dropped mid-flight.
            let guard = token.clone().drop_guard();
            let job = Arc::clone(&work);

            let outcome = tokio::task::spawn_blocking(move || (*job)(&token))
                .await
                .map_err(|e| ParkingError::Internal {
                    message: format!("{} task failed: {}", operation, e),
                })
                .and_then(|result| result);
            guard.disarm();

            match outcome {
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    tracing::warn!(operation, attempt, error = %err, "store busy, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(ParkingError::cancelled(operation));
                        }
                        _ = tokio::time::sleep(self.retry.backoff * attempt) => {}
                    }
                }
                other => {
                    if let Err(err) = &other {
                        trace_failure(operation, err);
                    }
                    return other;
                }
            }
        }
    }
}

fn trace_failure(operation: &str, err: &ParkingError) {
    match err.kind() {
        ErrorKind::StorageFailure => {
            tracing::error!(operation, error = %err, severity = ?err.severity(), "operation failed")
        }
        ErrorKind::Cancelled => tracing::info!(operation, "operation cancelled, rolled back"),
        ErrorKind::BadInput | ErrorKind::Conflict | ErrorKind::NotFound => {
            tracing::warn!(operation, error = %err, "operation rejected")
        }
    }
}

#[async_trait]
impl<S: Store + 'static> ParkingService for ParkingEngine<S> {
    async fn create_lot(&self, name: &str, desired_slots: u32) -> Result<Lot> {
        self.create_lot_with(&CancellationToken::new(), name, desired_slots)
            .await
    }

    async fn park_vehicle(&self, lot_id: LotId, registration_number: &str) -> Result<Occupancy> {
        self.park_vehicle_with(&CancellationToken::new(), lot_id, registration_number)
            .await
    }

    async fn unpark_vehicle(&self, registration_number: &str) -> Result<Occupancy> {
        self.unpark_vehicle_with(&CancellationToken::new(), registration_number)
            .await
    }

    async fn lot_status(&self, lot_id: LotId) -> Result<LotStatus> {
        ParkingEngine::lot_status(self, lot_id).await
    }

    async fn daily_report(&self, lot_id: LotId, date: NaiveDate) -> Result<DailyReport> {
        ParkingEngine::daily_report(self, lot_id, date).await
    }
}
