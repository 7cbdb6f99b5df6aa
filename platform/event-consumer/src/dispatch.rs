//! Message dispatch: decode bytes, open a scope, invoke the handler
//!
//! The consumer runtime only sees the type-erased [`MessageDispatcher`]; the
//! concrete message type lives in [`TypedDispatcher`].

use crate::handler::{EventHandler, HandlerError, HandlerScope};
use crate::ShutdownSignal;
use async_trait::async_trait;
use event_bus::{decode_payload, BusError, EventMessage};
use std::marker::PhantomData;

/// Why a message could not be handled
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("cannot decode {message_type}: {source}")]
    Decode {
        message_type: &'static str,
        #[source]
        source: BusError,
    },

    #[error("cannot open handler scope: {0}")]
    Scope(#[source] HandlerError),

    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),
}

impl DispatchError {
    /// Decode failures repeat on every redelivery
    pub fn is_decode(&self) -> bool {
        matches!(self, DispatchError::Decode { .. })
    }
}

/// Type-erased dispatch capability used by the runtime
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    /// Name used to derive the consumer-group id
    fn message_type(&self) -> &'static str;

    async fn dispatch(&self, payload: &[u8], shutdown: &ShutdownSignal) -> Result<(), DispatchError>;
}

/// Dispatcher for message type `M` handled through scope `S`
pub struct TypedDispatcher<M, S> {
    scope: S,
    _message: PhantomData<fn() -> M>,
}

impl<M, S> TypedDispatcher<M, S>
where
    M: EventMessage,
    S: HandlerScope<M>,
{
    pub fn new(scope: S) -> Self {
        Self {
            scope,
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl<M, S> MessageDispatcher for TypedDispatcher<M, S>
where
    M: EventMessage,
    S: HandlerScope<M>,
{
    fn message_type(&self) -> &'static str {
        M::MESSAGE_TYPE
    }

    async fn dispatch(&self, payload: &[u8], shutdown: &ShutdownSignal) -> Result<(), DispatchError> {
        let message: M = decode_payload(payload).map_err(|source| DispatchError::Decode {
            message_type: M::MESSAGE_TYPE,
            source,
        })?;

        // Dropped at the end of this call whatever the outcome
        let handler = self.scope.begin().await.map_err(DispatchError::Scope)?;
        handler
            .handle(message, shutdown)
            .await
            .map_err(DispatchError::Handler)
    }
}
