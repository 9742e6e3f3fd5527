//! # Gateway Configuration
//!
//! Explicit configuration handed to every component. Endorsement, ordering
//! submission and the awaited commit event have independent budgets.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::domain::GatewayError;

/// Built-in commit confirmation scopes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommitScope {
    /// Return as soon as the ordering service accepts.
    NoWait,
    /// Any event peer of the caller's organization.
    OrgAnyForTx,
    /// Every event peer of the caller's organization.
    OrgAllForTx,
    /// Any event peer on the channel.
    NetworkAnyForTx,
    /// Every event peer on the channel.
    NetworkAllForTx,
}

/// Built-in query peer selection.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum QueryScope {
    /// Sticky cursor over the organization's query peers.
    SinglePeer,
    /// Rotate the first peer tried on every call.
    RoundRobin,
}

/// Endorsement fan-out settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndorsementConfig {
    /// Per-peer proposal timeout.
    pub timeout_ms: u64,
    /// Fail unless every valid response carries identical payload bytes.
    pub require_payload_agreement: bool,
}

/// Ordering submission and confirmation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Ordering service call timeout.
    pub timeout_ms: u64,
    /// Window for the awaited commit event.
    pub event_timeout_ms: u64,
    /// Default confirmation scope.
    pub strategy: CommitScope,
}

/// Query dispatch settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Per-peer query timeout.
    pub timeout_ms: u64,
    /// Default peer selection.
    pub strategy: QueryScope,
}

/// Event stream reconnect budget.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Reconnect attempts before FATAL_FAILURE.
    pub max_attempts: u32,
    /// First backoff delay.
    pub initial_backoff_ms: u64,
    /// Backoff ceiling.
    pub max_backoff_ms: u64,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Random spread applied to each delay, as a fraction (0.0 to 1.0).
    pub jitter: f64,
}

impl ReconnectPolicy {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Event subscription settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventConfig {
    /// Reconnect budget per stream.
    pub reconnect: ReconnectPolicy,
    /// Timeout for opening a stream.
    pub connect_timeout_ms: u64,
}

/// Discovery settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Use the discovery plan for endorsement and commit targets.
    pub enabled: bool,
}

/// Top-level gateway configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub endorsement: EndorsementConfig,
    pub commit: CommitConfig,
    pub query: QueryConfig,
    pub events: EventConfig,
    pub discovery: DiscoveryConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endorsement: EndorsementConfig {
                timeout_ms: 30_000,
                require_payload_agreement: false,
            },
            commit: CommitConfig {
                timeout_ms: 30_000,
                event_timeout_ms: 300_000,
                strategy: CommitScope::OrgAllForTx,
            },
            query: QueryConfig {
                timeout_ms: 30_000,
                strategy: QueryScope::SinglePeer,
            },
            events: EventConfig {
                reconnect: ReconnectPolicy {
                    max_attempts: 5,
                    initial_backoff_ms: 100,
                    max_backoff_ms: 10_000,
                    multiplier: 2.0,
                    jitter: 0.1,
                },
                connect_timeout_ms: 10_000,
            },
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Create a config for testing (short timeouts, fast reconnects).
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.endorsement.timeout_ms = 500;
        config.commit.timeout_ms = 500;
        config.commit.event_timeout_ms = 1_000;
        config.query.timeout_ms = 500;
        config.events.reconnect = ReconnectPolicy {
            max_attempts: 3,
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
            multiplier: 2.0,
            jitter: 0.0,
        };
        config.events.connect_timeout_ms = 500;
        config
    }

    /// Defaults overridden by environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LEDGER_ENDORSE_TIMEOUT_MS`: endorsement per-peer timeout
    /// - `LEDGER_COMMIT_TIMEOUT_MS`: ordering submission timeout
    /// - `LEDGER_EVENT_TIMEOUT_MS`: commit event wait
    /// - `LEDGER_QUERY_TIMEOUT_MS`: query per-peer timeout
    /// - `LEDGER_RECONNECT_ATTEMPTS`: event stream reconnect budget
    /// - `LEDGER_DISCOVERY`: `true` to use discovery plans
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.endorsement.timeout_ms =
            env_or("LEDGER_ENDORSE_TIMEOUT_MS", config.endorsement.timeout_ms);
        config.commit.timeout_ms = env_or("LEDGER_COMMIT_TIMEOUT_MS", config.commit.timeout_ms);
        config.commit.event_timeout_ms =
            env_or("LEDGER_EVENT_TIMEOUT_MS", config.commit.event_timeout_ms);
        config.query.timeout_ms = env_or("LEDGER_QUERY_TIMEOUT_MS", config.query.timeout_ms);
        config.events.reconnect.max_attempts = env_or(
            "LEDGER_RECONNECT_ATTEMPTS",
            config.events.reconnect.max_attempts,
        );
        config.discovery.enabled = env_or("LEDGER_DISCOVERY", config.discovery.enabled);
        config
    }

    /// Reject settings the pipelines cannot run with.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let timeouts = [
            ("endorsement.timeout_ms", self.endorsement.timeout_ms),
            ("commit.timeout_ms", self.commit.timeout_ms),
            ("commit.event_timeout_ms", self.commit.event_timeout_ms),
            ("query.timeout_ms", self.query.timeout_ms),
            ("events.connect_timeout_ms", self.events.connect_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(GatewayError::Config(format!("{name} must be positive")));
        }
        if self.events.reconnect.multiplier < 1.0 {
            return Err(GatewayError::Config(
                "events.reconnect.multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.events.reconnect.max_backoff_ms < self.events.reconnect.initial_backoff_ms {
            return Err(GatewayError::Config(
                "events.reconnect.max_backoff_ms is below initial_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn endorse_timeout(&self) -> Duration {
        Duration::from_millis(self.endorsement.timeout_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit.timeout_ms)
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_millis(self.commit.event_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.events.connect_timeout_ms)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
