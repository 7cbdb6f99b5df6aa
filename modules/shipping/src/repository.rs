//! Shipment persistence capability

use crate::domain::Shipment;
use crate::service::ShipmentError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait ShipmentRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Shipment>, ShipmentError>;

    async fn get_by_tracking_number(&self, tracking_number: &str) -> Result<Option<Shipment>, ShipmentError>;

    /// Insert a new shipment; the tracking number must be unused
    async fn add(&self, shipment: &Shipment) -> Result<(), ShipmentError>;

    /// Replace an existing shipment
    async fn update(&self, shipment: &Shipment) -> Result<(), ShipmentError>;
}

/// Process-local repository for tests and local runs
#[derive(Debug, Clone, Default)]
pub struct InMemoryShipmentRepository {
    shipments: Arc<RwLock<HashMap<Uuid, Shipment>>>,
}

impl InMemoryShipmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.shipments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.shipments.read().await.is_empty()
    }
}

#[async_trait]
impl ShipmentRepository for InMemoryShipmentRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Shipment>, ShipmentError> {
        Ok(self.shipments.read().await.get(&id).cloned())
    }

    async fn get_by_tracking_number(&self, tracking_number: &str) -> Result<Option<Shipment>, ShipmentError> {
        Ok(self
            .shipments
            .read()
            .await
            .values()
            .find(|shipment| shipment.tracking_number == tracking_number)
            .cloned())
    }

    async fn add(&self, shipment: &Shipment) -> Result<(), ShipmentError> {
        let mut shipments = self.shipments.write().await;
        if shipments
            .values()
            .any(|existing| existing.tracking_number == shipment.tracking_number)
        {
            return Err(ShipmentError::DuplicateTrackingNumber(
                shipment.tracking_number.clone(),
            ));
        }
        shipments.insert(shipment.id, shipment.clone());
        Ok(())
    }

    async fn update(&self, shipment: &Shipment) -> Result<(), ShipmentError> {
        let mut shipments = self.shipments.write().await;
        match shipments.get_mut(&shipment.id) {
            Some(existing) => {
                *existing = shipment.clone();
                Ok(())
            }
            None => Err(ShipmentError::NotFound(shipment.id)),
        }
    }
}
