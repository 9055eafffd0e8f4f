use std::sync::Arc;

use async_trait::async_trait;
use delivery_core::clock::ManualClock;
use delivery_core::config::Config;
use delivery_core::engine::lifecycle;
use delivery_core::engine::service::{NewRequest, RequestService};
use delivery_core::error::AppError;
use delivery_core::models::request::{
    DeliveryRequest, MembershipTier, RequestEvent, RequestStatus, ServiceType,
};
use delivery_core::observability::metrics::Metrics;
use delivery_core::store::{InMemoryRequestStore, RequestStore, StatusUpdate, StoreError};
use tokio::sync::Barrier;
use uuid::Uuid;

fn new_request() -> NewRequest {
    NewRequest {
        requester_id: "customer-42".to_string(),
        pickup: "Pier 9".to_string(),
        dropoff: "401 Market St".to_string(),
        service_type: ServiceType::Store,
        miles: 4.0,
        tier: MembershipTier::Basic,
    }
}

fn service(store: Arc<dyn RequestStore>, clock: Arc<ManualClock>) -> RequestService {
    RequestService::new(&Config::default(), store, clock, Metrics::new())
}

#[tokio::test]
async fn full_lifecycle_produces_ordered_audit_log() {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let service = service(Arc::new(InMemoryRequestStore::new()), clock.clone());

    let request = service.submit(new_request()).await.unwrap();
    clock.advance_ms(1_000);
    service.assign(request.id, "driver-7").await.unwrap();
    for status in [
        RequestStatus::PickedUp,
        RequestStatus::Delivered,
        RequestStatus::Completed,
    ] {
        clock.advance_ms(1_000);
        service.advance(request.id, status).await.unwrap();
    }

    let events = service.events(request.id).await.unwrap();
    let kinds: Vec<RequestStatus> = events.iter().map(|event| event.event_type).collect();
    assert_eq!(
        kinds,
        vec![
            RequestStatus::Submitted,
            RequestStatus::Assigned,
            RequestStatus::PickedUp,
            RequestStatus::Delivered,
            RequestStatus::Completed,
        ]
    );
    assert!(events.windows(2).all(|pair| pair[0].created_at <= pair[1].created_at));
    assert!(events.iter().all(|event| event.request_id == request.id));

    let stored = service.get(request.id).await.unwrap();
    assert_eq!(stored.status, RequestStatus::Completed);
    assert_eq!(stored.version, 4);
    assert_eq!(stored.assigned_driver.as_deref(), Some("driver-7"));
    assert_eq!(stored.quoted_price, request.quoted_price);
    assert_eq!(lifecycle::replay(&events), Ok(stored.status));

    let report = service.verify(request.id).await.unwrap();
    assert!(report.consistent);
    assert_eq!(report.events, 5);
}

/// Holds every `fetch` at a barrier so concurrent callers all observe the
/// same state before any of them writes.
struct LockstepStore {
    inner: InMemoryRequestStore,
    barrier: Barrier,
    armed: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl RequestStore for LockstepStore {
    async fn insert(
        &self,
        request: DeliveryRequest,
        event: RequestEvent,
    ) -> Result<(DeliveryRequest, RequestEvent), StoreError> {
        self.inner.insert(request, event).await
    }

    async fn fetch(&self, id: Uuid) -> Result<DeliveryRequest, StoreError> {
        let request = self.inner.fetch(id).await?;
        if self.armed.load(std::sync::atomic::Ordering::SeqCst) {
            self.barrier.wait().await;
        }
        Ok(request)
    }

    async fn list(&self) -> Result<Vec<DeliveryRequest>, StoreError> {
        self.inner.list().await
    }

    async fn events(&self, id: Uuid) -> Result<Vec<RequestEvent>, StoreError> {
        self.inner.events(id).await
    }

    async fn transition(
        &self,
        id: Uuid,
        expected_status: RequestStatus,
        expected_version: u64,
        update: StatusUpdate,
        event: RequestEvent,
    ) -> Result<(DeliveryRequest, RequestEvent), StoreError> {
        self.inner
            .transition(id, expected_status, expected_version, update, event)
            .await
    }
}

#[tokio::test]
async fn concurrent_advance_from_same_state_has_one_winner() {
    let store = Arc::new(LockstepStore {
        inner: InMemoryRequestStore::new(),
        barrier: Barrier::new(2),
        armed: std::sync::atomic::AtomicBool::new(false),
    });
    let service = Arc::new(service(store.clone(), Arc::new(ManualClock::new(0))));

    let request = service.submit(new_request()).await.unwrap();
    service.assign(request.id, "driver-7").await.unwrap();
    store.armed.store(true, std::sync::atomic::Ordering::SeqCst);

    let first = tokio::spawn({
        let service = service.clone();
        async move { service.advance(request.id, RequestStatus::PickedUp).await }
    });
    let second = tokio::spawn({
        let service = service.clone();
        async move { service.advance(request.id, RequestStatus::PickedUp).await }
    });

    let results = [first.await.unwrap(), second.await.unwrap()];
    let winners = results.iter().filter(|result| result.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|result| matches!(result, Err(AppError::Conflict(_))))
        .count();

    assert_eq!(winners, 1);
    assert_eq!(conflicts, 1);

    store.armed.store(false, std::sync::atomic::Ordering::SeqCst);
    let events = service.events(request.id).await.unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(service.get(request.id).await.unwrap().status, RequestStatus::PickedUp);
}

#[tokio::test]
async fn loser_can_retry_after_refetching() {
    let service = service(
        Arc::new(InMemoryRequestStore::new()),
        Arc::new(ManualClock::new(0)),
    );
    let request = service.submit(new_request()).await.unwrap();
    service.assign(request.id, "driver-7").await.unwrap();
    service
        .advance(request.id, RequestStatus::PickedUp)
        .await
        .unwrap();

    // a retry re-validates against fresh state: PICKED_UP -> PICKED_UP is not an edge
    let retry = service.advance(request.id, RequestStatus::PickedUp).await;
    assert!(matches!(retry, Err(AppError::InvalidTransition { .. })));
}

struct FailingStore;

#[async_trait]
impl RequestStore for FailingStore {
    async fn insert(
        &self,
        _request: DeliveryRequest,
        _event: RequestEvent,
    ) -> Result<(DeliveryRequest, RequestEvent), StoreError> {
        Err(StoreError::Backend("connection reset".to_string()))
    }

    async fn fetch(&self, _id: Uuid) -> Result<DeliveryRequest, StoreError> {
        Err(StoreError::Backend("connection reset".to_string()))
    }

    async fn list(&self) -> Result<Vec<DeliveryRequest>, StoreError> {
        Err(StoreError::Backend("connection reset".to_string()))
    }

    async fn events(&self, _id: Uuid) -> Result<Vec<RequestEvent>, StoreError> {
        Err(StoreError::Backend("connection reset".to_string()))
    }

    async fn transition(
        &self,
        _id: Uuid,
        _expected_status: RequestStatus,
        _expected_version: u64,
        _update: StatusUpdate,
        _event: RequestEvent,
    ) -> Result<(DeliveryRequest, RequestEvent), StoreError> {
        Err(StoreError::Backend("connection reset".to_string()))
    }
}

#[tokio::test]
async fn store_failures_surface_as_persistence_errors() {
    let service = service(Arc::new(FailingStore), Arc::new(ManualClock::new(0)));

    let err = service.submit(new_request()).await.unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)));
    assert!(!err.is_retryable());

    let err = service
        .advance(Uuid::new_v4(), RequestStatus::PickedUp)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)));
}

/// Serves a rewritten audit log, as if rows were edited behind the
/// service's back.
struct TamperedLogStore {
    inner: InMemoryRequestStore,
    rewrite: std::sync::Mutex<Vec<RequestStatus>>,
}

impl TamperedLogStore {
    fn new() -> Self {
        Self {
            inner: InMemoryRequestStore::new(),
            rewrite: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn rewrite_log(&self, kinds: Vec<RequestStatus>) {
        *self.rewrite.lock().unwrap() = kinds;
    }
}

#[async_trait]
impl RequestStore for TamperedLogStore {
    async fn insert(
        &self,
        request: DeliveryRequest,
        event: RequestEvent,
    ) -> Result<(DeliveryRequest, RequestEvent), StoreError> {
        self.inner.insert(request, event).await
    }

    async fn fetch(&self, id: Uuid) -> Result<DeliveryRequest, StoreError> {
        self.inner.fetch(id).await
    }

    async fn list(&self) -> Result<Vec<DeliveryRequest>, StoreError> {
        self.inner.list().await
    }

    async fn events(&self, id: Uuid) -> Result<Vec<RequestEvent>, StoreError> {
        let mut events = self.inner.events(id).await?;
        let rewrite = self.rewrite.lock().unwrap().clone();
        for (event, kind) in events.iter_mut().zip(rewrite) {
            event.event_type = kind;
        }
        Ok(events)
    }

    async fn transition(
        &self,
        id: Uuid,
        expected_status: RequestStatus,
        expected_version: u64,
        update: StatusUpdate,
        event: RequestEvent,
    ) -> Result<(DeliveryRequest, RequestEvent), StoreError> {
        self.inner
            .transition(id, expected_status, expected_version, update, event)
            .await
    }
}

#[tokio::test]
async fn verify_flags_an_illegal_step_in_the_log() {
    let store = Arc::new(TamperedLogStore::new());
    let service = service(store.clone(), Arc::new(ManualClock::new(0)));

    let request = service.submit(new_request()).await.unwrap();
    service.assign(request.id, "driver-7").await.unwrap();
    store.rewrite_log(vec![RequestStatus::Submitted, RequestStatus::Delivered]);

    let report = service.verify(request.id).await.unwrap();
    assert!(!report.consistent);
    assert_eq!(report.stored_status, RequestStatus::Assigned);
    assert_eq!(report.replayed_status, None);
    assert_eq!(report.events, 2);
    assert_eq!(
        report.error.as_deref(),
        Some("event 1 moves SUBMITTED -> DELIVERED which is not allowed")
    );
}

#[tokio::test]
async fn verify_flags_a_log_that_ends_elsewhere() {
    let store = Arc::new(TamperedLogStore::new());
    let service = service(store.clone(), Arc::new(ManualClock::new(0)));

    let request = service.submit(new_request()).await.unwrap();
    service.assign(request.id, "driver-7").await.unwrap();
    store.rewrite_log(vec![RequestStatus::Submitted, RequestStatus::Cancelled]);

    let report = service.verify(request.id).await.unwrap();
    assert!(!report.consistent);
    assert_eq!(report.stored_status, RequestStatus::Assigned);
    assert_eq!(report.replayed_status, Some(RequestStatus::Cancelled));
    assert_eq!(report.error, None);
}
