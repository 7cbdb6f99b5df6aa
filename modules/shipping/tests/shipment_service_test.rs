//! ShipmentService against the in-memory broker

use event_bus::{
    decode_payload, EventEnvelope, EventProducer, InMemoryBus, Topic, TopicRegistry,
    HEADER_CORRELATION_ID, HEADER_EVENT_TYPE, HEADER_SOURCE_SERVICE,
};
use shipping_rs::{
    CreateShipmentRequest, InMemoryShipmentRepository, ShipmentCreated, ShipmentError,
    ShipmentRepository, ShipmentService, ShipmentStatusChanged, UpdateShipmentStatusRequest,
};
use std::sync::Arc;
use uuid::Uuid;

const CREATED: &str = "shipping.shipment.created";
const STATUS_CHANGED: &str = "shipping.shipment.status-changed";

struct Fixture {
    bus: InMemoryBus,
    repository: InMemoryShipmentRepository,
    service: ShipmentService,
}

fn fixture_with_topics(topics: TopicRegistry) -> Fixture {
    let bus = InMemoryBus::new();
    let repository = InMemoryShipmentRepository::new();
    let service = ShipmentService::new(
        Arc::new(repository.clone()),
        EventProducer::new(Arc::new(bus.clone())),
        Arc::new(topics),
    );
    Fixture {
        bus,
        repository,
        service,
    }
}

fn fixture() -> Fixture {
    fixture_with_topics(TopicRegistry::default())
}

fn status(status: &str) -> UpdateShipmentStatusRequest {
    UpdateShipmentStatusRequest {
        status: status.to_string(),
        correlation_id: None,
    }
}

#[tokio::test]
async fn test_create_publishes_shipment_created_keyed_by_id() {
    let f = fixture();
    let shipment = f
        .service
        .create(CreateShipmentRequest::new("ABC123"), Some("auth0|42"), Some("ops@example.com"))
        .await
        .unwrap();

    assert_eq!(shipment.status, "Created");
    assert_eq!(f.repository.len().await, 1);

    let records = f.bus.records(CREATED);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.key.as_deref(), Some(shipment.id.to_string().as_str()));
    assert_eq!(record.partition, f.bus.partition_for(&shipment.id.to_string()));
    assert_eq!(record.header(HEADER_EVENT_TYPE), Some("ShipmentCreated"));
    assert_eq!(record.header(HEADER_SOURCE_SERVICE), Some("shipping"));
    assert_eq!(record.header(HEADER_CORRELATION_ID), None);

    let body: serde_json::Value = serde_json::from_slice(&record.payload).unwrap();
    assert_eq!(body["trackingNumber"], "ABC123");
    assert_eq!(body["shipmentId"], shipment.id.to_string());
    assert_eq!(body["createdByUserId"], "auth0|42");
    assert_eq!(body["version"], 1);

    let envelope: EventEnvelope<ShipmentCreated> = decode_payload(&record.payload).unwrap();
    assert_eq!(envelope.source_service(), "shipping");
    assert_eq!(envelope.payload.created_by_email, "ops@example.com");
    assert_eq!(envelope.payload.created_at, shipment.created_at);
}

#[tokio::test]
async fn test_create_without_user_records_anonymous_creator() {
    let f = fixture();
    let mut request = CreateShipmentRequest::new("XYZ789");
    request.correlation_id = Some("req-7".to_string());
    f.service.create(request, None, None).await.unwrap();

    let record = &f.bus.records(CREATED)[0];
    assert_eq!(record.header(HEADER_CORRELATION_ID), Some("req-7"));

    let envelope: EventEnvelope<ShipmentCreated> = decode_payload(&record.payload).unwrap();
    assert_eq!(envelope.payload.created_by_user_id, "anonymous");
    assert_eq!(envelope.payload.created_by_email, "anonymous@system");
    assert_eq!(envelope.correlation_id(), Some("req-7"));
}

#[tokio::test]
async fn test_rejected_create_publishes_nothing() {
    let f = fixture();
    f.service
        .create(CreateShipmentRequest::new("ABC123"), None, None)
        .await
        .unwrap();

    let err = f
        .service
        .create(CreateShipmentRequest::new("ABC123"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ShipmentError::DuplicateTrackingNumber(_)));

    let err = f
        .service
        .create(CreateShipmentRequest::new("   "), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ShipmentError::Validation(_)));

    assert_eq!(f.bus.records(CREATED).len(), 1);
}

#[tokio::test]
async fn test_duplicate_tracking_number_is_caught_before_write() {
    let f = fixture();
    let first = f
        .service
        .create(CreateShipmentRequest::new("ABC123"), None, None)
        .await
        .unwrap();

    let found = f.service.get_by_tracking_number("ABC123").await.unwrap();
    assert_eq!(found.map(|shipment| shipment.id), Some(first.id));
    assert!(f.service.get_by_tracking_number("NOPE").await.unwrap().is_none());

    // Surrounding whitespace is trimmed before the lookup
    f.bus.set_unavailable(true);
    let err = f
        .service
        .create(CreateShipmentRequest::new(" ABC123 "), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ShipmentError::DuplicateTrackingNumber(ref n) if n == "ABC123"));
    assert_eq!(f.repository.len().await, 1);
}

#[tokio::test]
async fn test_publish_failure_is_returned_after_write() {
    let f = fixture();
    f.bus.set_unavailable(true);

    let err = f
        .service
        .create(CreateShipmentRequest::new("ABC123"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ShipmentError::Publish(_)));

    // No distributed transaction: the shipment exists, the event does not
    f.bus.set_unavailable(false);
    assert!(f
        .repository
        .get_by_tracking_number("ABC123")
        .await
        .unwrap()
        .is_some());
    assert!(f.bus.records(CREATED).is_empty());
}

#[tokio::test]
async fn test_update_status_publishes_status_changed() {
    let f = fixture();
    let shipment = f
        .service
        .create(CreateShipmentRequest::new("ABC123"), None, None)
        .await
        .unwrap();

    let updated = f
        .service
        .update_status(shipment.id, status("InTransit"))
        .await
        .unwrap();
    assert_eq!(updated.status, "InTransit");
    assert!(updated.updated_at.is_some());

    let records = f.bus.records(STATUS_CHANGED);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].header(HEADER_EVENT_TYPE), Some("ShipmentStatusChanged"));

    let envelope: EventEnvelope<ShipmentStatusChanged> = decode_payload(&records[0].payload).unwrap();
    assert_eq!(envelope.payload.old_status, "Created");
    assert_eq!(envelope.payload.new_status, "InTransit");
    assert_eq!(envelope.payload.tracking_number, "ABC123");

    // Same key as the creation event, so both land in one partition in order
    assert_eq!(records[0].partition, f.bus.records(CREATED)[0].partition);
}

#[tokio::test]
async fn test_update_to_same_status_is_noop() {
    let f = fixture();
    let shipment = f
        .service
        .create(CreateShipmentRequest::new("ABC123"), None, None)
        .await
        .unwrap();

    f.service
        .update_status(shipment.id, status("Created"))
        .await
        .unwrap();
    assert!(f.bus.records(STATUS_CHANGED).is_empty());
}

#[tokio::test]
async fn test_update_unknown_shipment() {
    let f = fixture();
    let id = Uuid::new_v4();
    let err = f.service.update_status(id, status("Lost")).await.unwrap_err();
    assert!(matches!(err, ShipmentError::NotFound(missing) if missing == id));
}

#[tokio::test]
async fn test_topic_override_is_used() {
    let topics = TopicRegistry::default()
        .with_override(Topic::ShipmentCreated, "ops.shipments.created")
        .unwrap();
    let f = fixture_with_topics(topics);

    f.service
        .create(CreateShipmentRequest::new("ABC123"), None, None)
        .await
        .unwrap();

    assert_eq!(f.bus.records("ops.shipments.created").len(), 1);
    assert!(f.bus.records(CREATED).is_empty());
}
