//! # Event Consumer
//!
//! Consumer side of the event bus: turns registrations of
//! (message type, topic, handler scope) into long-lived consumer runtimes.
//!
//! ## Pieces
//!
//! - [`EventHandler`]: `handle(message, shutdown) -> Result`
//! - [`HandlerScope`]: builds a fresh handler per message, released on drop
//! - [`TypedDispatcher`]: decodes the payload and drives one scope
//! - [`ConsumerRuntime`]: poll → dispatch → commit loop for one topic
//! - [`ConsumerRegistry`] / [`ConsumerHost`]: startup wiring and shutdown
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{EventBus, EventMessage, InMemoryBus};
//! use event_consumer::{
//!     ConsumerRegistry, ConsumerSettings, EventHandler, HandlerError, SharedHandler, ShutdownSignal,
//! };
//! use serde::Deserialize;
//! use std::sync::Arc;
//!
//! #[derive(Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! struct LabelPrinted {
//!     label_id: String,
//! }
//!
//! impl EventMessage for LabelPrinted {
//!     const MESSAGE_TYPE: &'static str = "LabelPrinted";
//! }
//!
//! struct LogLabel;
//!
//! #[async_trait::async_trait]
//! impl EventHandler<LabelPrinted> for LogLabel {
//!     async fn handle(&self, message: LabelPrinted, _shutdown: &ShutdownSignal) -> Result<(), HandlerError> {
//!         println!("label {}", message.label_id);
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() {
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//! let mut registry = ConsumerRegistry::new(bus, ConsumerSettings::default());
//! registry.register::<LabelPrinted, _>("printing.label.printed", SharedHandler::new(LogLabel));
//!
//! let host = registry.start();
//! // ... run until asked to stop
//! host.shutdown().await;
//! # }
//! ```

mod dispatch;
mod handler;
mod registry;
mod runtime;
mod shutdown;

pub use dispatch::{DispatchError, MessageDispatcher, TypedDispatcher};
pub use handler::{BoxError, EventHandler, HandlerError, HandlerScope, ScopeFn, SharedHandler};
pub use registry::{ConsumerHost, ConsumerRegistry, ConsumerStatus};
pub use runtime::{
    consumer_group_id, ConsumerRuntime, ConsumerSettings, DeadLetterPolicy, RuntimeState,
    HEADER_ATTEMPTS, HEADER_FAILURE_REASON, HEADER_ORIGINAL_OFFSET, HEADER_ORIGINAL_PARTITION,
    HEADER_ORIGINAL_TOPIC,
};
pub use shutdown::{Shutdown, ShutdownSignal};

use event_bus::BusError;

/// Errors that end a consumer runtime
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("failed to connect consumer group {group_id}: {source}")]
    Connect {
        group_id: String,
        #[source]
        source: BusError,
    },

    #[error("failed to subscribe to {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: BusError,
    },

    #[error("consumer task {group_id} aborted: {reason}")]
    Task { group_id: String, reason: String },
}
