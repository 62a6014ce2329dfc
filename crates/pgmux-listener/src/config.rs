//! Listener configuration.

use std::time::Duration;

use crate::error::ListenerError;

/// Default capacity of the listener event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// How notification payloads are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    /// Payloads are JSON documents. Undecodable payloads are reported and
    /// not delivered.
    #[default]
    Json,
    /// Payloads are delivered as raw text.
    Text,
}

/// Configuration for a [`Listener`](crate::Listener).
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future releases without breaking semver.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ListenerConfig {
    /// Interval of the keep-alive poll started by `init`.
    ///
    /// Some servers only flush pending notifications when the session sees
    /// traffic; polling bounds delivery latency. `Duration::ZERO` disables
    /// automatic polling.
    pub poll_interval: Duration,

    /// Payload decoding mode.
    pub payload: PayloadFormat,

    /// Capacity of the listener event channel.
    pub event_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            payload: PayloadFormat::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ListenerConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the keep-alive poll interval (`Duration::ZERO` disables it).
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the payload decoding mode.
    #[must_use]
    pub fn payload(mut self, payload: PayloadFormat) -> Self {
        self.payload = payload;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ListenerError> {
        if self.event_capacity == 0 {
            return Err(ListenerError::State(
                "event_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ListenerConfig::default();
        assert_eq!(config.poll_interval, Duration::ZERO);
        assert_eq!(config.payload, PayloadFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ListenerConfig::new()
            .poll_interval(Duration::from_millis(10))
            .payload(PayloadFormat::Text)
            .event_capacity(8);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.payload, PayloadFormat::Text);
        assert_eq!(config.event_capacity, 8);
        assert!(ListenerConfig::new().event_capacity(0).validate().is_err());
    }
}
