use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const INITIAL_STATUS: &str = "Created";

/// A tracked shipment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shipment {
    pub id: Uuid,
    pub tracking_number: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Shipment {
    pub fn new(tracking_number: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracking_number: tracking_number.into(),
            status: INITIAL_STATUS.to_string(),
            created_at: Utc::now(),
            updated_at: None,
            is_active: true,
        }
    }

    /// Set the new status and return the previous one
    pub fn update_status(&mut self, status: impl Into<String>) -> String {
        let previous = std::mem::replace(&mut self.status, status.into());
        self.mark_as_updated();
        previous
    }

    fn mark_as_updated(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShipmentRequest {
    pub tracking_number: String,
    /// Carried into the event envelope
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl CreateShipmentRequest {
    pub fn new(tracking_number: impl Into<String>) -> Self {
        Self {
            tracking_number: tracking_number.into(),
            correlation_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateShipmentStatusRequest {
    pub status: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
}
