//! Shipment use cases
//!
//! Every use case writes to the repository first and publishes afterwards.
//! There is no transaction spanning both: when publishing fails the write
//! stays and the error is returned to the caller.

use crate::domain::{CreateShipmentRequest, Shipment, UpdateShipmentStatusRequest};
use crate::events::{ShipmentCreated, ShipmentStatusChanged, ANONYMOUS_EMAIL, ANONYMOUS_USER_ID};
use crate::repository::ShipmentRepository;
use crate::SOURCE_SERVICE;
use chrono::Utc;
use event_bus::{BusError, EventEnvelope, EventProducer, Topic, TopicRegistry};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ShipmentError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("tracking number already in use: {0}")]
    DuplicateTrackingNumber(String),

    #[error("shipment not found: {0}")]
    NotFound(Uuid),

    #[error("failed to publish event: {0}")]
    Publish(#[from] BusError),
}

#[derive(Clone)]
pub struct ShipmentService {
    repository: Arc<dyn ShipmentRepository>,
    producer: EventProducer,
    topics: Arc<TopicRegistry>,
}

impl ShipmentService {
    pub fn new(
        repository: Arc<dyn ShipmentRepository>,
        producer: EventProducer,
        topics: Arc<TopicRegistry>,
    ) -> Self {
        Self {
            repository,
            producer,
            topics,
        }
    }

    /// Create a shipment and publish `ShipmentCreated` keyed by its id
    pub async fn create(
        &self,
        request: CreateShipmentRequest,
        created_by_user_id: Option<&str>,
        created_by_email: Option<&str>,
    ) -> Result<Shipment, ShipmentError> {
        let tracking_number = request.tracking_number.trim();
        if tracking_number.is_empty() {
            return Err(ShipmentError::Validation(
                "tracking number is required".to_string(),
            ));
        }

        if self.get_by_tracking_number(tracking_number).await?.is_some() {
            tracing::warn!(tracking_number = %tracking_number, "Tracking number already in use");
            return Err(ShipmentError::DuplicateTrackingNumber(tracking_number.to_string()));
        }

        let shipment = Shipment::new(tracking_number);
        self.repository.add(&shipment).await?;

        let event = ShipmentCreated {
            shipment_id: shipment.id,
            tracking_number: shipment.tracking_number.clone(),
            status: shipment.status.clone(),
            created_at: shipment.created_at,
            created_by_user_id: created_by_user_id.unwrap_or(ANONYMOUS_USER_ID).to_string(),
            created_by_email: created_by_email.unwrap_or(ANONYMOUS_EMAIL).to_string(),
        };
        let envelope = EventEnvelope::new(SOURCE_SERVICE, event).with_correlation_id(request.correlation_id);

        let receipt = self
            .producer
            .produce_event(
                self.topics.name(Topic::ShipmentCreated),
                &shipment.id.to_string(),
                &envelope,
                None,
            )
            .await?;

        tracing::info!(
            shipment_id = %shipment.id,
            tracking_number = %shipment.tracking_number,
            event_id = %envelope.event_id(),
            partition = receipt.partition,
            offset = receipt.offset,
            "Shipment created"
        );

        Ok(shipment)
    }

    /// Change a shipment's status and publish `ShipmentStatusChanged`
    ///
    /// Setting the current status again is a no-op and publishes nothing.
    pub async fn update_status(
        &self,
        id: Uuid,
        request: UpdateShipmentStatusRequest,
    ) -> Result<Shipment, ShipmentError> {
        let status = request.status.trim();
        if status.is_empty() {
            return Err(ShipmentError::Validation("status is required".to_string()));
        }

        let mut shipment = self
            .repository
            .get(id)
            .await?
            .ok_or(ShipmentError::NotFound(id))?;

        if shipment.status == status {
            return Ok(shipment);
        }

        let old_status = shipment.update_status(status);
        self.repository.update(&shipment).await?;

        let event = ShipmentStatusChanged {
            shipment_id: shipment.id,
            tracking_number: shipment.tracking_number.clone(),
            old_status,
            new_status: shipment.status.clone(),
            changed_at: shipment.updated_at.unwrap_or_else(Utc::now),
        };
        let envelope = EventEnvelope::new(SOURCE_SERVICE, event).with_correlation_id(request.correlation_id);

        self.producer
            .produce_event(
                self.topics.name(Topic::ShipmentStatusChanged),
                &shipment.id.to_string(),
                &envelope,
                None,
            )
            .await?;

        tracing::info!(
            shipment_id = %shipment.id,
            old_status = %envelope.payload.old_status,
            new_status = %envelope.payload.new_status,
            "Shipment status changed"
        );

        Ok(shipment)
    }

    pub async fn get(&self, id: Uuid) -> Result<Shipment, ShipmentError> {
        self.repository
            .get(id)
            .await?
            .ok_or(ShipmentError::NotFound(id))
    }

    pub async fn get_by_tracking_number(&self, tracking_number: &str) -> Result<Option<Shipment>, ShipmentError> {
        self.repository.get_by_tracking_number(tracking_number).await
    }
}
