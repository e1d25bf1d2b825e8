use std::env;

use tracing::warn;

const DEFAULT_INBOUND_CAPACITY: usize = 256;
const DEFAULT_NAME: &str = "tourbus";

/// Bus settings. `Default` is what `Bus::new()` uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Riders the inbound queue holds before posters start waiting.
    pub inbound_capacity: usize,
    /// Attached to the dispatch loop's tracing span.
    pub name: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            name: DEFAULT_NAME.to_string(),
        }
    }
}

impl BusConfig {
    /// Load configuration from environment variables (and `.env` if present).
    /// Missing or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let inbound_capacity = match env::var("TOURBUS_INBOUND_CAPACITY") {
            Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(value = raw.as_str(), "TOURBUS_INBOUND_CAPACITY is not a number, using default");
                DEFAULT_INBOUND_CAPACITY
            }),
            Err(_) => DEFAULT_INBOUND_CAPACITY,
        };

        Self {
            inbound_capacity,
            name: env::var("TOURBUS_NAME").unwrap_or_else(|_| DEFAULT_NAME.to_string()),
        }
    }

    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// `tokio::sync::mpsc` rejects a zero-sized buffer.
    pub(crate) fn effective_capacity(&self) -> usize {
        self.inbound_capacity.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BusConfig::default();
        assert_eq!(config.inbound_capacity, 256);
        assert_eq!(config.name, "tourbus");
    }

    #[test]
    fn builder_overrides() {
        let config = BusConfig::default()
            .with_inbound_capacity(8)
            .with_name("orders");
        assert_eq!(config.inbound_capacity, 8);
        assert_eq!(config.name, "orders");
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let config = BusConfig::default().with_inbound_capacity(0);
        assert_eq!(config.effective_capacity(), 1);
    }
}
