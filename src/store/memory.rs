use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::models::request::{DeliveryRequest, RequestEvent, RequestStatus};
use crate::store::{RequestStore, StatusUpdate, StoreError};

struct Record {
    request: DeliveryRequest,
    events: Vec<RequestEvent>,
}

/// Process-local store. A request and its event log share one map entry,
/// so a transition and its event append happen under the same shard lock.
#[derive(Default)]
pub struct InMemoryRequestStore {
    records: DashMap<Uuid, Record>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn check_owner(request: Uuid, event: &RequestEvent) -> Result<(), StoreError> {
    if event.request_id != request {
        return Err(StoreError::ForeignEvent {
            request,
            event_request: event.request_id,
        });
    }
    Ok(())
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn insert(
        &self,
        request: DeliveryRequest,
        event: RequestEvent,
    ) -> Result<(DeliveryRequest, RequestEvent), StoreError> {
        check_owner(request.id, &event)?;

        match self.records.entry(request.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(request.id)),
            Entry::Vacant(slot) => {
                slot.insert(Record {
                    request: request.clone(),
                    events: vec![event.clone()],
                });
                Ok((request, event))
            }
        }
    }

    async fn fetch(&self, id: Uuid) -> Result<DeliveryRequest, StoreError> {
        self.records
            .get(&id)
            .map(|record| record.request.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<DeliveryRequest>, StoreError> {
        let mut requests: Vec<DeliveryRequest> = self
            .records
            .iter()
            .map(|record| record.request.clone())
            .collect();
        requests.sort_by_key(|request| request.created_at);
        Ok(requests)
    }

    async fn events(&self, id: Uuid) -> Result<Vec<RequestEvent>, StoreError> {
        self.records
            .get(&id)
            .map(|record| record.events.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn transition(
        &self,
        id: Uuid,
        expected_status: RequestStatus,
        expected_version: u64,
        update: StatusUpdate,
        mut event: RequestEvent,
    ) -> Result<(DeliveryRequest, RequestEvent), StoreError> {
        check_owner(id, &event)?;

        let mut record = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let current = &record.request;
        if current.status != expected_status || current.version != expected_version {
            return Err(StoreError::Conflict {
                id,
                expected_status,
                expected_version,
                actual_status: current.status,
                actual_version: current.version,
            });
        }

        if let Some(last) = record.events.last() {
            event.created_at = event.created_at.max(last.created_at);
        }

        record.request.status = update.status;
        record.request.assigned_driver = update.assigned_driver;
        record.request.version += 1;
        record.request.updated_at = event.created_at;
        record.events.push(event.clone());

        Ok((record.request.clone(), event))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::InMemoryRequestStore;
    use crate::models::money::Money;
    use crate::models::request::{
        DeliveryRequest, MembershipTier, RequestEvent, RequestStatus, ServiceType,
    };
    use crate::store::{RequestStore, StatusUpdate, StoreError};

    fn submitted() -> (DeliveryRequest, RequestEvent) {
        let now = Utc::now();
        let request = DeliveryRequest {
            id: Uuid::new_v4(),
            requester_id: "customer-1".to_string(),
            status: RequestStatus::Submitted,
            assigned_driver: None,
            pickup: "12 Harbor St".to_string(),
            dropoff: "90 Elm Ave".to_string(),
            service_type: ServiceType::Food,
            tier: MembershipTier::Basic,
            miles: 3.0,
            quoted_price: Money::from_cents(950),
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let event = RequestEvent::new(request.id, RequestStatus::Submitted, "submitted", now);
        (request, event)
    }

    fn assign_update() -> StatusUpdate {
        StatusUpdate {
            status: RequestStatus::Assigned,
            assigned_driver: Some("driver-7".to_string()),
        }
    }

    #[tokio::test]
    async fn insert_then_fetch_returns_record_and_event() {
        let store = InMemoryRequestStore::new();
        let (request, event) = submitted();
        store.insert(request.clone(), event.clone()).await.unwrap();

        let fetched = store.fetch(request.id).await.unwrap();
        assert_eq!(fetched.status, RequestStatus::Submitted);
        assert_eq!(store.events(request.id).await.unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryRequestStore::new();
        let (request, event) = submitted();
        store.insert(request.clone(), event.clone()).await.unwrap();

        let err = store.insert(request.clone(), event).await.unwrap_err();
        assert_eq!(err, StoreError::AlreadyExists(request.id));
    }

    #[tokio::test]
    async fn stale_version_conflicts_and_changes_nothing() {
        let store = InMemoryRequestStore::new();
        let (request, event) = submitted();
        store.insert(request.clone(), event).await.unwrap();

        let first = RequestEvent::new(request.id, RequestStatus::Assigned, "a", Utc::now());
        store
            .transition(request.id, RequestStatus::Submitted, 0, assign_update(), first)
            .await
            .unwrap();

        let second = RequestEvent::new(request.id, RequestStatus::Assigned, "b", Utc::now());
        let err = store
            .transition(request.id, RequestStatus::Submitted, 0, assign_update(), second)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::Conflict {
                actual_status: RequestStatus::Assigned,
                actual_version: 1,
                ..
            }
        ));
        assert_eq!(store.events(request.id).await.unwrap().len(), 2);
        assert_eq!(store.fetch(request.id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn event_timestamps_never_go_backwards() {
        let store = InMemoryRequestStore::new();
        let (request, event) = submitted();
        let first_at = event.created_at;
        store.insert(request.clone(), event).await.unwrap();

        let earlier = RequestEvent::new(
            request.id,
            RequestStatus::Assigned,
            "clock skew",
            first_at - Duration::seconds(30),
        );
        let (updated, stored) = store
            .transition(request.id, RequestStatus::Submitted, 0, assign_update(), earlier)
            .await
            .unwrap();

        assert_eq!(stored.created_at, first_at);
        assert_eq!(updated.updated_at, first_at);
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let store = InMemoryRequestStore::new();
        let id = Uuid::new_v4();
        let event = RequestEvent::new(id, RequestStatus::Assigned, "x", Utc::now());

        let err = store
            .transition(id, RequestStatus::Submitted, 0, assign_update(), event)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound(id));
        assert_eq!(store.fetch(id).await.unwrap_err(), StoreError::NotFound(id));
    }

    #[tokio::test]
    async fn event_for_another_request_is_rejected() {
        let store = InMemoryRequestStore::new();
        let (request, event) = submitted();
        store.insert(request.clone(), event).await.unwrap();

        let stray = RequestEvent::new(Uuid::new_v4(), RequestStatus::Assigned, "x", Utc::now());
        let err = store
            .transition(request.id, RequestStatus::Submitted, 0, assign_update(), stray)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignEvent { .. }));
    }
}
