//! Identity service worker
//!
//! Consumes shipping events and keeps a per-user record of shipment
//! activity. Each message is handled inside its own [`ActivityUnitOfWork`],
//! committed only when the handler succeeds.

pub mod activity;
pub mod config;
pub mod consumers;
pub mod events;

pub use activity::{ActivityError, ActivityKind, ActivityStore, ActivityUnitOfWork, ShipmentActivity};
pub use config::Config;
pub use consumers::{register_consumers, ShipmentActivityScope, ShipmentCreatedConsumer, ShipmentStatusChangedConsumer};
pub use events::{ShipmentCreated, ShipmentStatusChanged};
