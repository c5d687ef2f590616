//! Exponential-backoff reconnection for the realtime channel.
//!
//! Attempt `n` waits `base * 2^(n-1)` before dialing. After
//! [`ReconnectConfig::max_attempts`] failures the loop gives up and the
//! caller surfaces a terminal connection error; there is no further
//! automatic retry.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{RealtimeClient, RealtimeConnection};

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

/// How a reconnect loop ended.
pub enum ReconnectOutcome {
    Connected(RealtimeConnection),
    /// Every attempt failed.
    Exhausted { attempts: u32 },
    Cancelled,
}

/// Delay before attempt number `attempt` (1-based).
pub fn backoff_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    config.base_delay.saturating_mul(1u32 << exponent)
}

/// Retry the connection with exponential backoff.
///
/// `on_attempt` is called with the attempt number and the delay before
/// that attempt sleeps, so the caller can publish a `Reconnecting`
/// status.
pub async fn reconnect_loop<F>(
    client: &RealtimeClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
    mut on_attempt: F,
) -> ReconnectOutcome
where
    F: FnMut(u32, Duration),
{
    for attempt in 1..=config.max_attempts {
        let delay = backoff_delay(attempt, config);
        on_attempt(attempt, delay);
        tracing::info!(
            url = client.ws_url(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to realtime channel",
        );

        // Wait before dialing, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reconnect cancelled");
                return ReconnectOutcome::Cancelled;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reconnect cancelled");
                return ReconnectOutcome::Cancelled;
            }
            result = client.connect() => match result {
                Ok(conn) => {
                    tracing::info!(attempt, "Reconnected to realtime channel");
                    return ReconnectOutcome::Connected(conn);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Reconnect attempt {attempt} failed");
                }
            }
        }
    }

    tracing::error!(
        attempts = config.max_attempts,
        "Giving up on realtime channel",
    );
    ReconnectOutcome::Exhausted {
        attempts: config.max_attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_waits_base() {
        let config = ReconnectConfig::default();
        assert_eq!(backoff_delay(1, &config), Duration::from_secs(1));
    }

    #[test]
    fn full_backoff_sequence() {
        let config = ReconnectConfig {
            base_delay: Duration::from_millis(250),
            max_attempts: 5,
        };
        let delays: Vec<u64> = (1..=5)
            .map(|n| backoff_delay(n, &config).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000, 4000]);
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let config = ReconnectConfig::default();
        assert!(backoff_delay(u32::MAX, &config) >= Duration::from_secs(1 << 30));
    }

    #[tokio::test]
    async fn cancellation_token_stops_reconnect() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let client = RealtimeClient::new("ws://127.0.0.1:9");
        let mut attempts = Vec::new();
        let outcome = reconnect_loop(&client, &ReconnectConfig::default(), &cancel, |n, _| {
            attempts.push(n)
        })
        .await;

        assert!(matches!(outcome, ReconnectOutcome::Cancelled));
        assert_eq!(attempts, vec![1]);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let config = ReconnectConfig {
            base_delay: Duration::from_millis(1),
            max_attempts: 3,
        };
        // Nothing listens on the discard port.
        let client = RealtimeClient::new("ws://127.0.0.1:9");
        let mut delays = Vec::new();
        let outcome = reconnect_loop(&client, &config, &CancellationToken::new(), |_, d| {
            delays.push(d.as_millis() as u64)
        })
        .await;

        assert!(matches!(outcome, ReconnectOutcome::Exhausted { attempts: 3 }));
        assert_eq!(delays, vec![1, 2, 4]);
    }
}
