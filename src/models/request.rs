use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::money::Money;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Draft,
    Submitted,
    Assigned,
    PickedUp,
    Delivered,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 7] = [
        RequestStatus::Draft,
        RequestStatus::Submitted,
        RequestStatus::Assigned,
        RequestStatus::PickedUp,
        RequestStatus::Delivered,
        RequestStatus::Completed,
        RequestStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Draft => "DRAFT",
            RequestStatus::Submitted => "SUBMITTED",
            RequestStatus::Assigned => "ASSIGNED",
            RequestStatus::PickedUp => "PICKED_UP",
            RequestStatus::Delivered => "DELIVERED",
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        RequestStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| format!("unknown status: {s}"))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    Food,
    Store,
    Fragile,
    Concierge,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Food => "FOOD",
            ServiceType::Store => "STORE",
            ServiceType::Fragile => "FRAGILE",
            ServiceType::Concierge => "CONCIERGE",
        }
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FOOD" => Ok(ServiceType::Food),
            "STORE" => Ok(ServiceType::Store),
            "FRAGILE" => Ok(ServiceType::Fragile),
            "CONCIERGE" => Ok(ServiceType::Concierge),
            other => Err(format!(
                "unknown service type: {other}, expected FOOD/STORE/FRAGILE/CONCIERGE"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipTier {
    #[default]
    Basic,
    Plus,
    Executive,
}

impl FromStr for MembershipTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BASIC" => Ok(MembershipTier::Basic),
            "PLUS" => Ok(MembershipTier::Plus),
            "EXECUTIVE" | "EXEC" => Ok(MembershipTier::Executive),
            other => Err(format!(
                "unknown tier: {other}, expected BASIC/PLUS/EXECUTIVE"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub id: Uuid,
    pub requester_id: String,
    pub status: RequestStatus,
    /// Set by `assign`; the driver record itself lives outside this service.
    pub assigned_driver: Option<String>,
    pub pickup: String,
    pub dropoff: String,
    pub service_type: ServiceType,
    pub tier: MembershipTier,
    pub miles: f64,
    pub quoted_price: Money,
    /// Bumped on every committed change; the optimistic-concurrency token.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestEvent {
    pub id: Uuid,
    pub request_id: Uuid,
    pub event_type: RequestStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl RequestEvent {
    pub fn new(
        request_id: Uuid,
        event_type: RequestStatus,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            event_type,
            message: message.into(),
            created_at,
        }
    }
}
