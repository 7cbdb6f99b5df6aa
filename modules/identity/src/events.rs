//! Identity's view of the shipping events it consumes
//!
//! Only the fields this service reads are declared; anything else on the
//! wire is ignored.

use chrono::{DateTime, Utc};
use event_bus::DomainEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

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
