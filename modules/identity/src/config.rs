use event_bus::{BusConfig, ConfigError, TopicRegistry};
use event_consumer::{ConsumerSettings, DeadLetterPolicy};
use std::env;
use std::time::Duration;

/// Worker configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub bus: BusConfig,
    pub topics: TopicRegistry,
    pub consumer: ConsumerSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bus = BusConfig::from_lookup(&lookup)?;
        let topics = TopicRegistry::from_lookup(&lookup)?;
        let defaults = ConsumerSettings::default();

        let poll_timeout = match lookup("CONSUMER_POLL_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(raw.parse().map_err(|_| ConfigError::Invalid {
                name: "CONSUMER_POLL_TIMEOUT_MS",
                value: raw.clone(),
            })?),
            None => defaults.poll_timeout,
        };

        let dead_letter = match lookup("CONSUMER_DEAD_LETTER_AFTER") {
            Some(raw) => {
                let attempts: u32 = raw.parse().map_err(|_| ConfigError::Invalid {
                    name: "CONSUMER_DEAD_LETTER_AFTER",
                    value: raw.clone(),
                })?;
                Some(DeadLetterPolicy::after(attempts).with_topic(topics.dead_letter()))
            }
            None => None,
        };

        let consumer = ConsumerSettings {
            client_id: bus.client_id.clone(),
            poll_timeout,
            dead_letter,
            ..defaults
        };

        Ok(Config {
            bus,
            topics,
            consumer,
        })
    }
}
