use std::time::Duration;

use crate::error::ClientError;
use crate::ledger::DEFAULT_GAS_BUDGET;

/// Default node URL; overridable at compile-time via GUESTBOOK_NODE_URL.
pub const DEFAULT_NODE_URL: &str =
    "ws://localhost:3001/v1/contract/command?encodingProtocol=native";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime configuration for a guestbook client.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// WebSocket URL of the Freenet node hosting the guestbook contract.
    pub node_url: String,
    /// How often the confirmed view is re-read from the ledger.
    pub poll_interval: Duration,
    /// Gas budget attached to every write.
    pub gas_budget: u64,
    /// How long a single ledger request may take before it counts as failed.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            node_url: option_env!("GUESTBOOK_NODE_URL")
                .unwrap_or(DEFAULT_NODE_URL)
                .to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            gas_budget: DEFAULT_GAS_BUDGET,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `GUESTBOOK_NODE_URL`, `GUESTBOOK_POLL_MS` and
    /// `GUESTBOOK_GAS_BUDGET` from the process environment.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let mut config = Self::default();
        if let Some(url) = lookup("GUESTBOOK_NODE_URL") {
            config.node_url = url;
        }
        if let Some(ms) = lookup("GUESTBOOK_POLL_MS") {
            config.poll_interval = Duration::from_millis(parse_number("GUESTBOOK_POLL_MS", &ms)?);
        }
        if let Some(gas) = lookup("GUESTBOOK_GAS_BUDGET") {
            config.gas_budget = parse_number("GUESTBOOK_GAS_BUDGET", &gas)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.poll_interval.is_zero() {
            return Err(ClientError::Config("poll interval must be non-zero".into()));
        }
        if self.node_url.is_empty() {
            return Err(ClientError::Config("node URL must not be empty".into()));
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, ClientError> {
    value
        .trim()
        .parse()
        .map_err(|e| ClientError::Config(format!("{key}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.gas_budget, DEFAULT_GAS_BUDGET);
    }

    #[test]
    fn environment_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("GUESTBOOK_NODE_URL", "ws://node:4000/v1"),
            ("GUESTBOOK_POLL_MS", "250"),
            ("GUESTBOOK_GAS_BUDGET", "42"),
        ]))
        .unwrap();
        assert_eq!(config.node_url, "ws://node:4000/v1");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.gas_budget, 42);
    }

    #[test]
    fn rejects_bad_numbers_and_zero_interval() {
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[("GUESTBOOK_POLL_MS", "soon")])),
            Err(ClientError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[("GUESTBOOK_POLL_MS", "0")])),
            Err(ClientError::Config(_))
        ));
    }
}
