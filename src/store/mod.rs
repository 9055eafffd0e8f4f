pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::request::{DeliveryRequest, RequestEvent, RequestStatus};

pub use memory::InMemoryRequestStore;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("request {0} not found")]
    NotFound(Uuid),

    #[error("request {0} already exists")]
    AlreadyExists(Uuid),

    #[error(
        "request {id} changed concurrently: expected {expected_status} v{expected_version}, found {actual_status} v{actual_version}"
    )]
    Conflict {
        id: Uuid,
        expected_status: RequestStatus,
        expected_version: u64,
        actual_status: RequestStatus,
        actual_version: u64,
    },

    #[error("event belongs to request {event_request}, not {request}")]
    ForeignEvent { request: Uuid, event_request: Uuid },

    #[error("store backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AppError::NotFound(format!("request {id} not found")),
            StoreError::Conflict { .. } => AppError::Conflict(err.to_string()),
            StoreError::AlreadyExists(_) | StoreError::ForeignEvent { .. } => {
                AppError::Persistence(err.to_string())
            }
            StoreError::Backend(msg) => AppError::Persistence(msg),
        }
    }
}

/// Fields a committed transition may change.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: RequestStatus,
    pub assigned_driver: Option<String>,
}

/// Durable home of requests and their audit logs.
///
/// `insert` and `transition` each commit the record change and the paired
/// event as one unit: readers see both or neither. `transition` only
/// commits when the stored status and version still match what the caller
/// observed; otherwise it fails with [`StoreError::Conflict`] and changes
/// nothing.
#[async_trait]
pub trait RequestStore: Send + Sync + 'static {
    async fn insert(
        &self,
        request: DeliveryRequest,
        event: RequestEvent,
    ) -> Result<(DeliveryRequest, RequestEvent), StoreError>;

    async fn fetch(&self, id: Uuid) -> Result<DeliveryRequest, StoreError>;

    async fn list(&self) -> Result<Vec<DeliveryRequest>, StoreError>;

    /// Events in append order.
    async fn events(&self, id: Uuid) -> Result<Vec<RequestEvent>, StoreError>;

    async fn transition(
        &self,
        id: Uuid,
        expected_status: RequestStatus,
        expected_version: u64,
        update: StatusUpdate,
        event: RequestEvent,
    ) -> Result<(DeliveryRequest, RequestEvent), StoreError>;
}
