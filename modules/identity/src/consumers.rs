//! Consumers of shipping events
//!
//! Each message gets its own handler and unit of work from
//! [`ShipmentActivityScope`]. A handler either commits its unit of work and
//! returns `Ok`, or returns an error and the records are discarded, so the
//! broker offset and the stored activity move together. Redelivered events
//! are recognised by `event_id` and acknowledged without a second write.

use crate::activity::{ActivityKind, ActivityStore, ActivityUnitOfWork, ShipmentActivity};
use crate::events::{ShipmentCreated, ShipmentStatusChanged};
use async_trait::async_trait;
use event_bus::{EventEnvelope, Topic, TopicRegistry};
use event_consumer::{ConsumerRegistry, EventHandler, HandlerError, HandlerScope, ShutdownSignal};
use tracing::{debug, info, warn};

pub struct ShipmentCreatedConsumer {
    uow: ActivityUnitOfWork,
}

#[async_trait]
impl EventHandler<EventEnvelope<ShipmentCreated>> for ShipmentCreatedConsumer {
    async fn handle(
        &self,
        envelope: EventEnvelope<ShipmentCreated>,
        _shutdown: &ShutdownSignal,
    ) -> Result<(), HandlerError> {
        let event_id = envelope.event_id();
        if self.uow.is_processed(event_id).await {
            debug!(event_id = %event_id, "ShipmentCreated already processed");
            return Ok(());
        }

        let correlation_id = envelope.correlation_id().map(str::to_string);
        let occurred_at = envelope.occurred_at();
        let event = envelope.into_payload();

        info!(
            event_id = %event_id,
            shipment_id = %event.shipment_id,
            tracking_number = %event.tracking_number,
            status = %event.status,
            created_by = %event.created_by_user_id,
            correlation_id = ?correlation_id,
            "Shipment created"
        );

        self.uow
            .record(ShipmentActivity {
                event_id,
                shipment_id: event.shipment_id,
                tracking_number: event.tracking_number,
                user_id: Some(event.created_by_user_id),
                email: Some(event.created_by_email),
                kind: ActivityKind::Created,
                occurred_at,
            })
            .await;
        self.uow.commit().await?;
        Ok(())
    }
}

pub struct ShipmentStatusChangedConsumer {
    uow: ActivityUnitOfWork,
}

#[async_trait]
impl EventHandler<EventEnvelope<ShipmentStatusChanged>> for ShipmentStatusChangedConsumer {
    async fn handle(
        &self,
        envelope: EventEnvelope<ShipmentStatusChanged>,
        _shutdown: &ShutdownSignal,
    ) -> Result<(), HandlerError> {
        let event_id = envelope.event_id();
        if self.uow.is_processed(event_id).await {
            debug!(event_id = %event_id, "ShipmentStatusChanged already processed");
            return Ok(());
        }

        let event = envelope.into_payload();
        let creator = self.uow.creator_of(event.shipment_id).await;
        if creator.is_none() {
            // Creation events travel on another topic and may arrive later
            warn!(
                shipment_id = %event.shipment_id,
                "Status change for a shipment with no known creator"
            );
        }

        info!(
            event_id = %event_id,
            shipment_id = %event.shipment_id,
            old_status = %event.old_status,
            new_status = %event.new_status,
            "Shipment status changed"
        );

        let (user_id, email) = creator.unzip();
        self.uow
            .record(ShipmentActivity {
                event_id,
                shipment_id: event.shipment_id,
                tracking_number: event.tracking_number,
                user_id,
                email,
                kind: ActivityKind::StatusChanged {
                    from: event.old_status,
                    to: event.new_status,
                },
                occurred_at: event.changed_at,
            })
            .await;
        self.uow.commit().await?;
        Ok(())
    }
}

/// Opens one unit of work per message on the shared store
#[derive(Debug, Clone)]
pub struct ShipmentActivityScope {
    store: ActivityStore,
}

impl ShipmentActivityScope {
    pub fn new(store: ActivityStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HandlerScope<EventEnvelope<ShipmentCreated>> for ShipmentActivityScope {
    type Handler = ShipmentCreatedConsumer;

    async fn begin(&self) -> Result<Self::Handler, HandlerError> {
        Ok(ShipmentCreatedConsumer {
            uow: self.store.begin()?,
        })
    }
}

#[async_trait]
impl HandlerScope<EventEnvelope<ShipmentStatusChanged>> for ShipmentActivityScope {
    type Handler = ShipmentStatusChangedConsumer;

    async fn begin(&self) -> Result<Self::Handler, HandlerError> {
        Ok(ShipmentStatusChangedConsumer {
            uow: self.store.begin()?,
        })
    }
}

/// Register every identity consumer on `registry`
pub fn register_consumers(registry: &mut ConsumerRegistry, store: &ActivityStore, topics: &TopicRegistry) {
    let scope = ShipmentActivityScope::new(store.clone());
    registry
        .register::<EventEnvelope<ShipmentCreated>, _>(topics.name(Topic::ShipmentCreated), scope.clone())
        .register::<EventEnvelope<ShipmentStatusChanged>, _>(
            topics.name(Topic::ShipmentStatusChanged),
            scope,
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn created_envelope(shipment_id: Uuid) -> EventEnvelope<ShipmentCreated> {
        EventEnvelope::new(
            "shipping",
            ShipmentCreated {
                shipment_id,
                tracking_number: "ABC123".to_string(),
                status: "Created".to_string(),
                created_at: Utc::now(),
                created_by_user_id: "user-7".to_string(),
                created_by_email: "user7@example.com".to_string(),
            },
        )
    }

    fn status_envelope(shipment_id: Uuid, from: &str, to: &str) -> EventEnvelope<ShipmentStatusChanged> {
        EventEnvelope::new(
            "shipping",
            ShipmentStatusChanged {
                shipment_id,
                tracking_number: "ABC123".to_string(),
                old_status: from.to_string(),
                new_status: to.to_string(),
                changed_at: Utc::now(),
            },
        )
    }

    async fn handle_created(scope: &ShipmentActivityScope, envelope: EventEnvelope<ShipmentCreated>) -> Result<(), HandlerError> {
        let handler = HandlerScope::<EventEnvelope<ShipmentCreated>>::begin(scope).await?;
        handler.handle(envelope, &ShutdownSignal::never()).await
    }

    #[tokio::test]
    async fn test_created_event_is_recorded_for_creator() {
        let store = ActivityStore::new();
        let scope = ShipmentActivityScope::new(store.clone());
        let shipment_id = Uuid::new_v4();

        handle_created(&scope, created_envelope(shipment_id)).await.unwrap();

        let activities = store.activities_for_user("user-7").await;
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].shipment_id, shipment_id);
        assert_eq!(activities[0].kind, ActivityKind::Created);
    }

    #[tokio::test]
    async fn test_redelivered_event_is_not_recorded_twice() {
        let store = ActivityStore::new();
        let scope = ShipmentActivityScope::new(store.clone());
        let envelope = created_envelope(Uuid::new_v4());

        handle_created(&scope, envelope.clone()).await.unwrap();
        handle_created(&scope, envelope).await.unwrap();

        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_the_message() {
        let store = ActivityStore::new();
        let scope = ShipmentActivityScope::new(store.clone());
        store.set_unavailable(true);

        let err = handle_created(&scope, created_envelope(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Failed(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_status_change_is_attributed_to_creator() {
        let store = ActivityStore::new();
        let scope = ShipmentActivityScope::new(store.clone());
        let shipment_id = Uuid::new_v4();

        handle_created(&scope, created_envelope(shipment_id)).await.unwrap();
        let handler = HandlerScope::<EventEnvelope<ShipmentStatusChanged>>::begin(&scope)
            .await
            .unwrap();
        handler
            .handle(status_envelope(shipment_id, "Created", "InTransit"), &ShutdownSignal::never())
            .await
            .unwrap();

        let activities = store.activities_for_user("user-7").await;
        assert_eq!(activities.len(), 2);
        assert_eq!(
            activities[1].kind,
            ActivityKind::StatusChanged {
                from: "Created".to_string(),
                to: "InTransit".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_status_change_without_creator_is_kept_unattributed() {
        let store = ActivityStore::new();
        let scope = ShipmentActivityScope::new(store.clone());
        let shipment_id = Uuid::new_v4();

        let handler = HandlerScope::<EventEnvelope<ShipmentStatusChanged>>::begin(&scope)
            .await
            .unwrap();
        handler
            .handle(status_envelope(shipment_id, "Created", "Delivered"), &ShutdownSignal::never())
            .await
            .unwrap();

        let activities = store.activities_for_shipment(shipment_id).await;
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].user_id, None);
    }
}
