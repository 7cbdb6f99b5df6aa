//! # Event Envelope
//!
//! Standard metadata carried by every domain event published between services.
//!
//! ## Envelope Fields
//!
//! - `eventId`: Unique identifier, usable by consumers for idempotency
//! - `occurredAt`: UTC time of the domain occurrence (not transport time)
//! - `eventType`: Concrete event shape (e.g. `ShipmentCreated`)
//! - `sourceService`: Service that published the event
//! - `correlationId`: Optional id threading a causal chain across services
//! - `version`: Schema version of the event, default 1
//!
//! The event's own fields are flattened next to the metadata, so the wire
//! form of `EventEnvelope<ShipmentCreated>` is a single camelCase JSON object.
//! Decoding matches metadata and event field names case-insensitively.

use crate::codec::{self, take_field};
use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A concrete domain event shape that travels inside an [`EventEnvelope`]
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Tag written to `eventType` and the `x-event-type` header
    const EVENT_TYPE: &'static str;
}

/// A type that a consumer can be registered for
///
/// `MESSAGE_TYPE` feeds the consumer-group id, so two unrelated message types
/// must never share a name.
pub trait EventMessage: DeserializeOwned + Send + Sync + 'static {
    const MESSAGE_TYPE: &'static str;
}

impl<T: DomainEvent> EventMessage for EventEnvelope<T> {
    const MESSAGE_TYPE: &'static str = T::EVENT_TYPE;
}

fn default_version() -> u32 {
    1
}

/// Standard event envelope
///
/// `event_id` and `occurred_at` are assigned once by the constructor and have
/// no setters.
///
/// # Examples
///
/// ```rust
/// use event_bus::{DomainEvent, EventEnvelope};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// #[serde(rename_all = "camelCase")]
/// struct ShipmentCreated {
///     shipment_id: String,
///     tracking_number: String,
/// }
///
/// impl DomainEvent for ShipmentCreated {
///     const EVENT_TYPE: &'static str = "ShipmentCreated";
/// }
///
/// let envelope = EventEnvelope::new(
///     "shipping",
///     ShipmentCreated {
///         shipment_id: "S1".to_string(),
///         tracking_number: "ABC123".to_string(),
///     },
/// )
/// .with_correlation_id(Some("req-42".to_string()));
///
/// assert_eq!(envelope.event_type(), "ShipmentCreated");
/// assert_eq!(envelope.version(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope<T> {
    event_id: Uuid,

    occurred_at: DateTime<Utc>,

    event_type: String,

    source_service: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,

    version: u32,

    /// Event-specific fields
    #[serde(flatten)]
    pub payload: T,
}

impl<T: DomainEvent> EventEnvelope<T> {
    /// Create a new envelope with a fresh `event_id` and `occurred_at = now`
    pub fn new(source_service: impl Into<String>, payload: T) -> Self {
        Self::with_event_id(Uuid::new_v4(), source_service, payload)
    }

    /// Create an envelope with an explicit event_id (useful for testing)
    pub fn with_event_id(event_id: Uuid, source_service: impl Into<String>, payload: T) -> Self {
        Self {
            event_id,
            occurred_at: Utc::now(),
            event_type: T::EVENT_TYPE.to_string(),
            source_service: source_service.into(),
            correlation_id: None,
            version: default_version(),
            payload,
        }
    }
}

impl<T> EventEnvelope<T> {
    /// Set the correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Set the schema version
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn source_service(&self) -> &str {
        &self.source_service
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Check that every metadata field is populated
    ///
    /// # Validation Rules
    ///
    /// - `event_id`: Must not be the nil UUID
    /// - `event_type`: Must be non-empty
    /// - `source_service`: Must be non-empty
    /// - `version`: Must be at least 1
    pub fn validate(&self) -> Result<(), String> {
        if self.event_id.is_nil() {
            return Err("event_id cannot be nil".to_string());
        }
        if self.event_type.trim().is_empty() {
            return Err("event_type cannot be empty".to_string());
        }
        if self.source_service.trim().is_empty() {
            return Err("source_service cannot be empty".to_string());
        }
        if self.version == 0 {
            return Err("version must be at least 1".to_string());
        }
        Ok(())
    }

    /// Transport headers derived from the envelope metadata
    pub(crate) fn derived_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (crate::HEADER_EVENT_TYPE, self.event_type.clone()),
            (crate::HEADER_SOURCE_SERVICE, self.source_service.clone()),
        ];
        if let Some(correlation_id) = &self.correlation_id {
            headers.push((crate::HEADER_CORRELATION_ID, correlation_id.clone()));
        }
        headers
    }
}

fn required<F: DeserializeOwned, E: de::Error>(fields: &mut Map<String, Value>, name: &'static str) -> Result<F, E> {
    let value = take_field(fields, name).ok_or_else(|| E::missing_field(name))?;
    codec::from_value(value).map_err(E::custom)
}

fn optional<F: DeserializeOwned, E: de::Error>(fields: &mut Map<String, Value>, name: &str) -> Result<Option<F>, E> {
    match take_field(fields, name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => codec::from_value(value).map(Some).map_err(E::custom),
    }
}

// `#[serde(flatten)]` hides the payload's field names from a derived impl
impl<'de, T: DeserializeOwned> Deserialize<'de> for EventEnvelope<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;

        let event_id = required::<_, D::Error>(&mut fields, "eventId")?;
        let occurred_at = required::<_, D::Error>(&mut fields, "occurredAt")?;
        let event_type = required::<_, D::Error>(&mut fields, "eventType")?;
        let source_service = required::<_, D::Error>(&mut fields, "sourceService")?;
        let correlation_id = optional::<_, D::Error>(&mut fields, "correlationId")?;
        let version = optional::<_, D::Error>(&mut fields, "version")?.unwrap_or_else(default_version);
        let payload =
            codec::from_value(Value::Object(fields)).map_err(<D::Error as de::Error>::custom)?;

        Ok(Self {
            event_id,
            occurred_at,
            event_type,
            source_service,
            correlation_id,
            version,
            payload,
        })
    }
}
