//! Topic registry
//!
//! Maps logical domain concepts to physical topic names. The registry is
//! built once at startup (defaults, optionally overridden from the
//! environment) and is read-only afterwards.

use crate::config::ConfigError;
use std::collections::HashMap;
use std::env;
use std::fmt;

/// Logical topics, grouped by owning service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    IdentityEvents,
    UserCreated,
    UserUpdated,
    UserDeactivated,
    ShippingEvents,
    ShipmentCreated,
    ShipmentUpdated,
    ShipmentStatusChanged,
    NotificationEvents,
    DeadLetter,
}

impl Topic {
    pub const ALL: [Topic; 10] = [
        Topic::IdentityEvents,
        Topic::UserCreated,
        Topic::UserUpdated,
        Topic::UserDeactivated,
        Topic::ShippingEvents,
        Topic::ShipmentCreated,
        Topic::ShipmentUpdated,
        Topic::ShipmentStatusChanged,
        Topic::NotificationEvents,
        Topic::DeadLetter,
    ];

    /// Physical name used when no override is configured
    pub fn default_name(self) -> &'static str {
        match self {
            Topic::IdentityEvents => "identity-events",
            Topic::UserCreated => "identity.user.created",
            Topic::UserUpdated => "identity.user.updated",
            Topic::UserDeactivated => "identity.user.deactivated",
            Topic::ShippingEvents => "shipping-events",
            Topic::ShipmentCreated => "shipping.shipment.created",
            Topic::ShipmentUpdated => "shipping.shipment.updated",
            Topic::ShipmentStatusChanged => "shipping.shipment.status-changed",
            Topic::NotificationEvents => "notification-events",
            Topic::DeadLetter => "dlq-events",
        }
    }

    /// Environment variable that overrides this topic's name
    pub fn env_var(self) -> &'static str {
        match self {
            Topic::IdentityEvents => "TOPIC_IDENTITY_EVENTS",
            Topic::UserCreated => "TOPIC_USER_CREATED",
            Topic::UserUpdated => "TOPIC_USER_UPDATED",
            Topic::UserDeactivated => "TOPIC_USER_DEACTIVATED",
            Topic::ShippingEvents => "TOPIC_SHIPPING_EVENTS",
            Topic::ShipmentCreated => "TOPIC_SHIPMENT_CREATED",
            Topic::ShipmentUpdated => "TOPIC_SHIPMENT_UPDATED",
            Topic::ShipmentStatusChanged => "TOPIC_SHIPMENT_STATUS_CHANGED",
            Topic::NotificationEvents => "TOPIC_NOTIFICATION_EVENTS",
            Topic::DeadLetter => "TOPIC_DEAD_LETTER",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

/// Immutable logical → physical topic table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRegistry {
    names: HashMap<Topic, String>,
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self {
            names: Topic::ALL
                .iter()
                .map(|topic| (*topic, topic.default_name().to_string()))
                .collect(),
        }
    }
}

impl TopicRegistry {
    /// Defaults overridden by `TOPIC_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut registry = Self::default();
        for topic in Topic::ALL {
            if let Some(name) = lookup(topic.env_var()) {
                registry = registry.with_override(topic, name)?;
            }
        }
        Ok(registry)
    }

    /// Replace one topic's physical name
    ///
    /// Only usable while building the registry; it consumes and returns it.
    pub fn with_override(mut self, topic: Topic, name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if !is_valid_topic_name(&name) {
            return Err(ConfigError::Invalid {
                name: topic.env_var(),
                value: name,
            });
        }
        self.names.insert(topic, name);
        Ok(self)
    }

    /// Physical name of a logical topic
    pub fn name(&self, topic: Topic) -> &str {
        self.names
            .get(&topic)
            .map(String::as_str)
            .unwrap_or_else(|| topic.default_name())
    }

    pub fn dead_letter(&self) -> &str {
        self.name(Topic::DeadLetter)
    }
}

/// Dot-separated tokens of `[A-Za-z0-9_-]`, no empty token
///
/// Also within Kafka's 249 character limit.
pub fn is_valid_topic_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 249
        && name.split('.').all(|token| {
            !token.is_empty()
                && token
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let registry = TopicRegistry::default();
        assert_eq!(registry.name(Topic::ShipmentCreated), "shipping.shipment.created");
        assert_eq!(
            registry.name(Topic::ShipmentStatusChanged),
            "shipping.shipment.status-changed"
        );
        assert_eq!(registry.dead_letter(), "dlq-events");
    }

    #[test]
    fn test_every_default_is_valid() {
        for topic in Topic::ALL {
            assert!(is_valid_topic_name(topic.default_name()), "{topic:?}");
        }
    }

    #[test]
    fn test_env_override() {
        let registry = TopicRegistry::from_lookup(|name| match name {
            "TOPIC_SHIPMENT_CREATED" => Some("staging.shipping.shipment.created".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(
            registry.name(Topic::ShipmentCreated),
            "staging.shipping.shipment.created"
        );
        assert_eq!(registry.name(Topic::UserCreated), "identity.user.created");
    }

    #[test]
    fn test_rejects_invalid_override() {
        let result = TopicRegistry::default().with_override(Topic::DeadLetter, "bad..name");
        assert!(result.is_err());

        let result = TopicRegistry::default().with_override(Topic::DeadLetter, "has space");
        assert!(result.is_err());

        let result = TopicRegistry::default().with_override(Topic::DeadLetter, "");
        assert!(result.is_err());
    }
}
