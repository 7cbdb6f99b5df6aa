//! Consumer registration and the host that runs registered consumers

use crate::dispatch::{MessageDispatcher, TypedDispatcher};
use crate::handler::HandlerScope;
use crate::runtime::{consumer_group_id, ConsumerRuntime, ConsumerSettings, RuntimeState};
use crate::shutdown::{Shutdown, ShutdownSignal};
use crate::ConsumerError;
use event_bus::{EventBus, EventMessage};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

struct Registration {
    topic: String,
    dispatcher: Arc<dyn MessageDispatcher>,
}

/// Startup wiring of (message type, topic, handler scope) triples
///
/// Every call to [`ConsumerRegistry::register`] yields exactly one runtime
/// when the registry is started. Registering the same pair twice gives two
/// runtimes in the same consumer group, which then compete for partitions.
pub struct ConsumerRegistry {
    bus: Arc<dyn EventBus>,
    settings: ConsumerSettings,
    registrations: Vec<Registration>,
}

impl ConsumerRegistry {
    pub fn new(bus: Arc<dyn EventBus>, settings: ConsumerSettings) -> Self {
        Self {
            bus,
            settings,
            registrations: Vec::new(),
        }
    }

    /// Consume `M` from `topic`, handling each message in a fresh scope of `S`
    pub fn register<M, S>(&mut self, topic: impl Into<String>, scope: S) -> &mut Self
    where
        M: EventMessage,
        S: HandlerScope<M>,
    {
        let topic = topic.into();
        info!(
            topic = %topic,
            group_id = %consumer_group_id(&self.settings.client_id, M::MESSAGE_TYPE),
            "Consumer registered"
        );
        self.registrations.push(Registration {
            topic,
            dispatcher: Arc::new(TypedDispatcher::<M, S>::new(scope)),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Spawn one runtime per registration
    pub fn start(self) -> ConsumerHost {
        let shutdown = Shutdown::new();

        let consumers = self
            .registrations
            .into_iter()
            .map(|registration| {
                let runtime = ConsumerRuntime::new(
                    self.bus.clone(),
                    registration.topic,
                    registration.dispatcher,
                    self.settings.clone(),
                );
                spawn_runtime(runtime, shutdown.signal())
            })
            .collect();

        ConsumerHost {
            shutdown,
            consumers,
        }
    }
}

fn spawn_runtime(runtime: ConsumerRuntime, signal: ShutdownSignal) -> RunningConsumer {
    let group_id = runtime.group_id();
    let topic = runtime.topic().to_string();
    let state = runtime.state();

    let handle = tokio::spawn({
        let group_id = group_id.clone();
        async move {
            let result = runtime.run(signal).await;
            if let Err(e) = &result {
                error!(group_id = %group_id, error = %e, "Consumer failed to start");
            }
            result
        }
    });

    RunningConsumer {
        group_id,
        topic,
        state,
        handle,
    }
}

struct RunningConsumer {
    group_id: String,
    topic: String,
    state: watch::Receiver<RuntimeState>,
    handle: JoinHandle<Result<(), ConsumerError>>,
}

/// Snapshot of one running consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerStatus {
    pub group_id: String,
    pub topic: String,
    pub state: RuntimeState,
}

/// Owns the runtimes started from a [`ConsumerRegistry`]
///
/// Dropping the host signals every runtime to stop without waiting for it;
/// call [`ConsumerHost::shutdown`] to wait.
pub struct ConsumerHost {
    shutdown: Shutdown,
    consumers: Vec<RunningConsumer>,
}

impl ConsumerHost {
    pub fn statuses(&self) -> Vec<ConsumerStatus> {
        self.consumers
            .iter()
            .map(|consumer| ConsumerStatus {
                group_id: consumer.group_id.clone(),
                topic: consumer.topic.clone(),
                state: *consumer.state.borrow(),
            })
            .collect()
    }

    /// Signal handed to the runtimes, for work that should stop with them
    pub fn signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Wait until every runtime has left `Starting`
    ///
    /// After this returns each runtime is either subscribed (and possibly
    /// already handling messages) or stopped after a startup failure.
    pub async fn ready(&self) {
        for consumer in &self.consumers {
            let mut rx = consumer.state.clone();
            let _ = rx.wait_for(|state| *state != RuntimeState::Starting).await;
        }
    }

    /// Stop polling everywhere and wait for every runtime to finish
    ///
    /// A handler that is running when this is called completes first.
    pub async fn shutdown(self) -> Vec<Result<(), ConsumerError>> {
        info!(consumers = self.consumers.len(), "Shutting down consumers");
        self.shutdown.trigger();

        let results = join_all(self.consumers.into_iter().map(|consumer| async move {
            match consumer.handle.await {
                Ok(result) => result,
                Err(e) => Err(ConsumerError::Task {
                    group_id: consumer.group_id,
                    reason: e.to_string(),
                }),
            }
        }))
        .await;

        info!("Consumers stopped");
        results
    }
}
