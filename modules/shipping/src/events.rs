//! Events published by the shipping service
//!
//! Both travel inside an [`event_bus::EventEnvelope`], so the wire form is
//! the envelope metadata plus these fields, camelCase.

use chrono::{DateTime, Utc};
use event_bus::DomainEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Creator recorded when the request carried no authenticated user
pub const ANONYMOUS_USER_ID: &str = "anonymous";
pub const ANONYMOUS_EMAIL: &str = "anonymous@system";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentCreated {
    pub shipment_id: Uuid,
    pub tracking_number: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub created_by_user_id: String,
    pub created_by_email: String,
}

impl DomainEvent for ShipmentCreated {
    const EVENT_TYPE: &'static str = "ShipmentCreated";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentStatusChanged {
    pub shipment_id: Uuid,
    pub tracking_number: String,
    pub old_status: String,
    pub new_status: String,
    pub changed_at: DateTime<Utc>,
}

impl DomainEvent for ShipmentStatusChanged {
    const EVENT_TYPE: &'static str = "ShipmentStatusChanged";
}
