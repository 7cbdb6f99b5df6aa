//! Shipping service core
//!
//! Owns the shipment aggregate and publishes `ShipmentCreated` and
//! `ShipmentStatusChanged` events after every successful repository write.

pub mod domain;
pub mod events;
pub mod repository;
pub mod service;

pub use domain::{CreateShipmentRequest, Shipment, UpdateShipmentStatusRequest};
pub use events::{ShipmentCreated, ShipmentStatusChanged};
pub use repository::{InMemoryShipmentRepository, ShipmentRepository};
pub use service::{ShipmentError, ShipmentService};

/// Value of `sourceService` on every event this crate publishes
pub const SOURCE_SERVICE: &str = "shipping";
