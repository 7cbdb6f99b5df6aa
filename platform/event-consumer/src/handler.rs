//! Handler capability and per-message handler scopes

use crate::ShutdownSignal;
use async_trait::async_trait;
use std::sync::Arc;

/// Boxed error type carried by [`HandlerError::Failed`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned by a handler or by a scope that fails to build one
///
/// The runtime never inspects the cause; any error means "do not commit".
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Failed(BoxError),
}

impl HandlerError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(Box::new(error))
    }
}

/// Handles one decoded message of type `M`
///
/// Implementations should watch `shutdown` during long work; the runtime
/// itself never interrupts a running handler.
#[async_trait]
pub trait EventHandler<M>: Send + Sync
where
    M: Send + 'static,
{
    async fn handle(&self, message: M, shutdown: &ShutdownSignal) -> Result<(), HandlerError>;
}

#[async_trait]
impl<M, H> EventHandler<M> for Arc<H>
where
    M: Send + 'static,
    H: EventHandler<M> + ?Sized,
{
    async fn handle(&self, message: M, shutdown: &ShutdownSignal) -> Result<(), HandlerError> {
        (**self).handle(message, shutdown).await
    }
}

/// Builds a fresh handler for every message
///
/// The handler returned by [`HandlerScope::begin`] owns whatever per-message
/// state it needs (a unit of work, a transaction, a request context). It is
/// dropped as soon as the message has been handled, on success and failure
/// alike, which releases that state.
#[async_trait]
pub trait HandlerScope<M>: Send + Sync + 'static
where
    M: Send + 'static,
{
    type Handler: EventHandler<M>;

    async fn begin(&self) -> Result<Self::Handler, HandlerError>;
}

/// Scope for stateless handlers: every message reuses the same instance
#[derive(Debug)]
pub struct SharedHandler<H> {
    handler: Arc<H>,
}

impl<H> SharedHandler<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Share an instance the caller keeps a handle to
    pub fn from_arc(handler: Arc<H>) -> Self {
        Self { handler }
    }
}

impl<H> Clone for SharedHandler<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

#[async_trait]
impl<M, H> HandlerScope<M> for SharedHandler<H>
where
    M: Send + 'static,
    H: EventHandler<M> + 'static,
{
    type Handler = Arc<H>;

    async fn begin(&self) -> Result<Self::Handler, HandlerError> {
        Ok(self.handler.clone())
    }
}

/// Scope built from a factory closure
///
/// ```rust
/// use event_consumer::{EventHandler, HandlerError, HandlerScope, ScopeFn, ShutdownSignal};
///
/// struct Audit;
///
/// #[async_trait::async_trait]
/// impl EventHandler<String> for Audit {
///     async fn handle(&self, _message: String, _shutdown: &ShutdownSignal) -> Result<(), HandlerError> {
///         Ok(())
///     }
/// }
///
/// let scope = ScopeFn::new(|| Ok::<_, HandlerError>(Audit));
/// # let _ = &scope;
/// ```
pub struct ScopeFn<F> {
    factory: F,
}

impl<F> ScopeFn<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl<M, F, H> HandlerScope<M> for ScopeFn<F>
where
    M: Send + 'static,
    F: Fn() -> Result<H, HandlerError> + Send + Sync + 'static,
    H: EventHandler<M> + 'static,
{
    type Handler = H;

    async fn begin(&self) -> Result<Self::Handler, HandlerError> {
        (self.factory)()
    }
}
