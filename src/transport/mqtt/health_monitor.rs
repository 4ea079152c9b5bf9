//! Pure reconnection decisions and state transitions for the MQTT client
//!
//! This module contains pure functions deciding what the connection
//! supervisor does next; the supervisor in [`super::client`] performs the I/O.

use super::connection::{ConnectionState, ReconnectConfig};
use tracing::{error, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine if reconnection should be attempted (pure function)
    /// Supports unlimited retries when max_attempts is None
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        ReconnectionDecision::Proceed {
            attempt: current_attempts + 1,
            delay_ms: config.interval_ms,
        }
    }

    /// Determine next state after connection event (pure function)
    pub fn determine_next_state(event: ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::DisconnectedByBroker => {
                ConnectionState::Disconnected("Broker disconnected".to_string())
            }
            ConnectionEvent::NetworkError(error) => ConnectionState::Disconnected(error),
            ConnectionEvent::ReconnectionStarted(attempt) => ConnectionState::Reconnecting(attempt),
            ConnectionEvent::PermanentFailure(reason) => ConnectionState::Disconnected(reason),
            ConnectionEvent::ClosedByClient => {
                ConnectionState::Disconnected("Client disconnected".to_string())
            }
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(state: &ConnectionState) -> bool {
        state.is_ready()
    }

    /// Check if connection state allows subscribing (pure function)
    pub fn can_subscribe(state: &ConnectionState) -> bool {
        state.is_ready()
    }

    /// Log connection state transition
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT proxy connected to broker");
            }
            (ConnectionState::Reconnecting(_), ConnectionState::Connected) => {
                info!("MQTT proxy reconnected to broker");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected(reason)) => {
                warn!("MQTT connection lost: {}", reason);
            }
            (_, ConnectionState::Reconnecting(attempt)) => {
                info!("Starting reconnection attempt {}", attempt);
            }
            (_, ConnectionState::Disconnected(reason)) => {
                error!("MQTT connection down: {}", reason);
            }
            _ => {
                info!("MQTT connection state: {:?} -> {:?}", from, to);
            }
        }
    }

    /// Validate reconnection configuration (pure function)
    pub fn validate_connection_config(config: &ReconnectConfig) -> Result<(), String> {
        if let Some(max_attempts) = config.max_attempts {
            if max_attempts == 0 {
                return Err("max_attempts must be greater than 0 or None for unlimited".to_string());
            }
        }

        if config.interval_ms == 0 {
            return Err("interval_ms must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt
    Proceed { attempt: u32, delay_ms: u64 },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - max attempts exceeded
    AbortMaxAttemptsExceeded,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// ConnAck received from broker
    ConnAckReceived,
    /// Broker initiated disconnect
    DisconnectedByBroker,
    /// Network or protocol error
    NetworkError(String),
    /// Reconnection attempt started
    ReconnectionStarted(u32),
    /// Permanent failure - no more retries
    PermanentFailure(String),
    /// Local shutdown
    ClosedByClient,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnection_uses_fixed_interval() {
        let config = ReconnectConfig::default();

        for attempts in [0, 1, 5, 100] {
            assert_eq!(
                HealthMonitor::should_attempt_reconnection(attempts, &config, false),
                ReconnectionDecision::Proceed {
                    attempt: attempts + 1,
                    delay_ms: 1000,
                }
            );
        }
    }

    #[test]
    fn test_reconnection_aborts_on_shutdown() {
        let config = ReconnectConfig::default();
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(0, &config, true),
            ReconnectionDecision::AbortShutdownRequested
        );
    }

    #[test]
    fn test_reconnection_respects_max_attempts() {
        let config = ReconnectConfig {
            max_attempts: Some(3),
            interval_ms: 10,
        };
        assert!(matches!(
            HealthMonitor::should_attempt_reconnection(2, &config, false),
            ReconnectionDecision::Proceed { attempt: 3, .. }
        ));
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(3, &config, false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
    }

    #[test]
    fn test_state_transitions() {
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::ConnAckReceived),
            ConnectionState::Connected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::ReconnectionStarted(2)),
            ConnectionState::Reconnecting(2)
        );
        assert!(matches!(
            HealthMonitor::determine_next_state(ConnectionEvent::NetworkError("reset".into())),
            ConnectionState::Disconnected(reason) if reason == "reset"
        ));
        assert!(matches!(
            HealthMonitor::determine_next_state(ConnectionEvent::DisconnectedByBroker),
            ConnectionState::Disconnected(_)
        ));
        assert!(matches!(
            HealthMonitor::determine_next_state(ConnectionEvent::ClosedByClient),
            ConnectionState::Disconnected(_)
        ));
    }

    #[test]
    fn test_gating_follows_readiness() {
        assert!(HealthMonitor::can_publish(&ConnectionState::Connected));
        assert!(HealthMonitor::can_subscribe(&ConnectionState::Connected));
        assert!(!HealthMonitor::can_publish(&ConnectionState::Reconnecting(1)));
        assert!(!HealthMonitor::can_subscribe(&ConnectionState::Connecting));
    }

    #[test]
    fn test_validate_connection_config() {
        assert!(HealthMonitor::validate_connection_config(&ReconnectConfig::default()).is_ok());
        assert!(HealthMonitor::validate_connection_config(&ReconnectConfig {
            max_attempts: Some(0),
            interval_ms: 1000,
        })
        .is_err());
        assert!(HealthMonitor::validate_connection_config(&ReconnectConfig {
            max_attempts: None,
            interval_ms: 0,
        })
        .is_err());
    }
}
