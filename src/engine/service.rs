use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{Config, SubmitLimit};
use crate::engine::lifecycle::{self, INITIAL_STATUS};
use crate::engine::pricing::{PricingConfig, QuoteBreakdown};
use crate::engine::rate_limiter::RateLimiter;
use crate::error::AppError;
use crate::models::money::Money;
use crate::models::request::{
    DeliveryRequest, MembershipTier, RequestEvent, RequestStatus, ServiceType,
};
use crate::observability::metrics::Metrics;
use crate::store::{RequestStore, StatusUpdate, StoreError};

#[derive(Debug, Clone, Deserialize)]
pub struct NewRequest {
    pub requester_id: String,
    pub pickup: String,
    pub dropoff: String,
    pub service_type: ServiceType,
    pub miles: f64,
    #[serde(default)]
    pub tier: MembershipTier,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub request_id: Uuid,
    pub stored_status: RequestStatus,
    pub replayed_status: Option<RequestStatus>,
    pub events: usize,
    pub consistent: bool,
    pub error: Option<String>,
}

/// Gatekeeper for every change to a delivery request. Legality is checked
/// against the lifecycle table before the store is touched, and the store's
/// conditional update turns a lost race into [`AppError::Conflict`].
pub struct RequestService {
    store: Arc<dyn RequestStore>,
    limiter: RateLimiter,
    pricing: PricingConfig,
    submit_limit: SubmitLimit,
    clock: Arc<dyn Clock>,
    events_tx: broadcast::Sender<RequestEvent>,
    metrics: Metrics,
}

impl RequestService {
    pub fn new(
        config: &Config,
        store: Arc<dyn RequestStore>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size.max(1));
        let limiter = RateLimiter::new(clock.clone()).with_max_keys(config.rate_limit_max_keys);

        Self {
            store,
            limiter,
            pricing: config.pricing.clone(),
            submit_limit: config.submit_limit,
            clock,
            events_tx,
            metrics,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RequestEvent> {
        self.events_tx.subscribe()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn sweep_rate_limits(&self) -> usize {
        let removed = self.limiter.sweep_idle_now();
        self.metrics.rate_limit_buckets.set(self.limiter.len() as i64);
        removed
    }

    pub fn quote(
        &self,
        miles: f64,
        service_type: ServiceType,
        tier: MembershipTier,
    ) -> Result<Money, AppError> {
        let price = self
            .pricing
            .estimate_price(miles, service_type, tier)
            .map_err(|err| AppError::InvalidConfig(err.to_string()))?;

        self.metrics
            .quotes_total
            .with_label_values(&[service_type.as_str()])
            .inc();
        Ok(price)
    }

    pub fn quote_breakdown(
        &self,
        miles: f64,
        service_type: ServiceType,
        tier: MembershipTier,
    ) -> Result<QuoteBreakdown, AppError> {
        let breakdown = self
            .pricing
            .quote_breakdown(miles, service_type, tier)
            .map_err(|err| AppError::InvalidConfig(err.to_string()))?;

        self.metrics
            .quotes_total
            .with_label_values(&[service_type.as_str()])
            .inc();
        Ok(breakdown)
    }

    pub async fn submit(&self, new: NewRequest) -> Result<DeliveryRequest, AppError> {
        self.timed("submit", self.submit_inner(new)).await
    }

    pub async fn assign(&self, id: Uuid, driver_id: &str) -> Result<DeliveryRequest, AppError> {
        self.timed("assign", self.assign_inner(id, driver_id)).await
    }

    pub async fn advance(&self, id: Uuid, to: RequestStatus) -> Result<DeliveryRequest, AppError> {
        self.timed("advance", self.advance_inner(id, to, None)).await
    }

    pub async fn cancel(&self, id: Uuid, reason: &str) -> Result<DeliveryRequest, AppError> {
        let reason = reason.trim();
        let message = if reason.is_empty() {
            "cancelled".to_string()
        } else {
            format!("cancelled: {reason}")
        };

        self.timed(
            "cancel",
            self.advance_inner(id, RequestStatus::Cancelled, Some(message)),
        )
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<DeliveryRequest, AppError> {
        Ok(self.store.fetch(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<DeliveryRequest>, AppError> {
        Ok(self.store.list().await?)
    }

    pub async fn events(&self, id: Uuid) -> Result<Vec<RequestEvent>, AppError> {
        Ok(self.store.events(id).await?)
    }

    /// Replays the audit log and compares it with the stored status.
    pub async fn verify(&self, id: Uuid) -> Result<AuditReport, AppError> {
        let request = self.store.fetch(id).await?;
        let mut events = self.store.events(id).await?;

        // Events committed after the fetch are not part of this snapshot:
        // the insert appends one event and every transition one more.
        events.truncate(request.version as usize + 1);

        let report = match lifecycle::replay(&events) {
            Ok(replayed) => AuditReport {
                request_id: id,
                stored_status: request.status,
                replayed_status: Some(replayed),
                events: events.len(),
                consistent: replayed == request.status,
                error: None,
            },
            Err(err) => AuditReport {
                request_id: id,
                stored_status: request.status,
                replayed_status: None,
                events: events.len(),
                consistent: false,
                error: Some(format!(
                    "event {} moves {} -> {} which is not allowed",
                    err.position, err.from, err.to
                )),
            },
        };

        if !report.consistent {
            warn!(request_id = %id, stored = %request.status, "audit log disagrees with stored status");
        }

        Ok(report)
    }

    async fn submit_inner(&self, new: NewRequest) -> Result<DeliveryRequest, AppError> {
        let requester_id = new.requester_id.trim();
        if requester_id.is_empty() {
            return Err(AppError::BadRequest("requester_id cannot be empty".to_string()));
        }
        if new.pickup.trim().is_empty() || new.dropoff.trim().is_empty() {
            return Err(AppError::BadRequest(
                "pickup and dropoff cannot be empty".to_string(),
            ));
        }

        let decision = self
            .limiter
            .attempt(
                requester_id,
                self.submit_limit.interval_ms,
                self.submit_limit.max,
            )
            .map_err(|err| AppError::InvalidConfig(err.to_string()))?;
        self.metrics.rate_limit_buckets.set(self.limiter.len() as i64);

        if !decision.allowed {
            self.metrics.rate_limited_total.inc();
            warn!(key = %requester_id, retry_after_ms = decision.retry_after_ms, "submit rate limited");
            return Err(AppError::RateLimited {
                retry_after_ms: decision.retry_after_ms,
            });
        }

        let quoted_price = self.quote(new.miles, new.service_type, new.tier)?;
        let now = self.clock.now();
        let id = Uuid::new_v4();

        debug_assert!(lifecycle::can_transition(INITIAL_STATUS, RequestStatus::Submitted));

        let request = DeliveryRequest {
            id,
            requester_id: requester_id.to_string(),
            status: RequestStatus::Submitted,
            assigned_driver: None,
            pickup: new.pickup,
            dropoff: new.dropoff,
            service_type: new.service_type,
            tier: new.tier,
            miles: new.miles,
            quoted_price,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let event = RequestEvent::new(
            id,
            RequestStatus::Submitted,
            format!("submitted by {requester_id}"),
            now,
        );

        let (request, event) = self
            .store
            .insert(request, event)
            .await
            .map_err(|err| self.store_failure(id, err))?;

        self.metrics.requests_submitted_total.inc();
        self.metrics
            .transitions_total
            .with_label_values(&[RequestStatus::Submitted.as_str()])
            .inc();
        self.publish(event);

        info!(
            request_id = %request.id,
            requester_id = %request.requester_id,
            quoted_price = %request.quoted_price,
            "request submitted"
        );

        Ok(request)
    }

    async fn assign_inner(&self, id: Uuid, driver_id: &str) -> Result<DeliveryRequest, AppError> {
        let driver_id = driver_id.trim();
        if driver_id.is_empty() {
            return Err(AppError::BadRequest("driver_id cannot be empty".to_string()));
        }

        let current = self.store.fetch(id).await?;
        if current.status != RequestStatus::Submitted {
            warn!(request_id = %id, from = %current.status, "assign rejected");
            return Err(AppError::InvalidTransition {
                from: current.status,
                to: RequestStatus::Assigned,
            });
        }

        let updated = self
            .commit(
                &current,
                StatusUpdate {
                    status: RequestStatus::Assigned,
                    assigned_driver: Some(driver_id.to_string()),
                },
                format!("assigned to driver {driver_id}"),
            )
            .await?;

        info!(request_id = %id, driver_id = %driver_id, "driver assigned");
        Ok(updated)
    }

    async fn advance_inner(
        &self,
        id: Uuid,
        to: RequestStatus,
        message: Option<String>,
    ) -> Result<DeliveryRequest, AppError> {
        let current = self.store.fetch(id).await?;

        if !lifecycle::can_transition(current.status, to) {
            warn!(request_id = %id, from = %current.status, to = %to, "transition rejected");
            return Err(AppError::InvalidTransition {
                from: current.status,
                to,
            });
        }

        // ASSIGNED always carries a driver, which only `assign` supplies.
        if to == RequestStatus::Assigned {
            return Err(AppError::BadRequest(
                "use assign to move a request to ASSIGNED".to_string(),
            ));
        }

        let message = message.unwrap_or_else(|| format!("status changed to {to}"));
        let updated = self
            .commit(
                &current,
                StatusUpdate {
                    status: to,
                    assigned_driver: current.assigned_driver.clone(),
                },
                message,
            )
            .await?;

        info!(request_id = %id, from = %current.status, to = %to, "status advanced");
        Ok(updated)
    }

    async fn commit(
        &self,
        current: &DeliveryRequest,
        update: StatusUpdate,
        message: String,
    ) -> Result<DeliveryRequest, AppError> {
        let to = update.status;
        let event = RequestEvent::new(current.id, to, message, self.clock.now());

        let (updated, event) = self
            .store
            .transition(current.id, current.status, current.version, update, event)
            .await
            .map_err(|err| self.store_failure(current.id, err))?;

        self.metrics
            .transitions_total
            .with_label_values(&[to.as_str()])
            .inc();
        self.publish(event);

        Ok(updated)
    }

    fn store_failure(&self, id: Uuid, err: StoreError) -> AppError {
        match &err {
            StoreError::Conflict { .. } => {
                warn!(request_id = %id, error = %err, "lost concurrent update");
            }
            StoreError::NotFound(_) => {}
            _ => {
                error!(request_id = %id, error = %err, "store failure");
            }
        }
        AppError::from(err)
    }

    fn publish(&self, event: RequestEvent) {
        // no subscribers is not an error
        let _ = self.events_tx.send(event);
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        let start = Instant::now();
        let result = fut.await;
        let outcome = result.as_ref().map(|_| ()).map_err(|err| err.kind());
        self.metrics
            .observe(operation, outcome, start.elapsed().as_secs_f64());
        result
    }
}
