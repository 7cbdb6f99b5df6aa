use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Errors raised while reading bus configuration
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Which transport the process talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    InMemory,
    Kafka,
}

impl FromStr for BusType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inmemory" => Ok(BusType::InMemory),
            "kafka" => Ok(BusType::Kafka),
            _ => Err(ConfigError::Invalid {
                name: "BUS_TYPE",
                value: s.to_string(),
            }),
        }
    }
}

/// Broker connection settings parsed from environment variables
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub bus_type: BusType,
    pub bootstrap_servers: String,
    /// Prefix of every consumer-group id and the producer's client id
    pub client_id: String,
    pub security_protocol: Option<String>,
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    /// How long a publish may wait for the broker acknowledgement
    pub publish_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus_type: BusType::InMemory,
            bootstrap_servers: "localhost:9092".to_string(),
            client_id: "pegasus-client".to_string(),
            security_protocol: None,
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            publish_timeout: Duration::from_secs(5),
        }
    }
}

impl BusConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bus_type = match lookup("BUS_TYPE") {
            Some(value) => value.parse()?,
            None => defaults.bus_type,
        };

        let bootstrap_servers = match (bus_type, lookup("KAFKA_BOOTSTRAP_SERVERS")) {
            (_, Some(servers)) if !servers.trim().is_empty() => servers,
            (BusType::Kafka, _) => return Err(ConfigError::Missing("KAFKA_BOOTSTRAP_SERVERS")),
            (BusType::InMemory, _) => defaults.bootstrap_servers,
        };

        let client_id = lookup("KAFKA_CLIENT_ID")
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(defaults.client_id);

        let publish_timeout = match lookup("KAFKA_PUBLISH_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(raw.parse().map_err(|_| ConfigError::Invalid {
                name: "KAFKA_PUBLISH_TIMEOUT_MS",
                value: raw.clone(),
            })?),
            None => defaults.publish_timeout,
        };

        Ok(BusConfig {
            bus_type,
            bootstrap_servers,
            client_id,
            security_protocol: lookup("KAFKA_SECURITY_PROTOCOL"),
            sasl_mechanism: lookup("KAFKA_SASL_MECHANISM"),
            sasl_username: lookup("KAFKA_SASL_USERNAME"),
            sasl_password: lookup("KAFKA_SASL_PASSWORD"),
            publish_timeout,
        })
    }
}
