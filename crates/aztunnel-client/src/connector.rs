//! Channel establishment with bounded retry.
//!
//! The bastion tunnel process binds its local port some time after it is
//! spawned, so the first few attempts are expected to fail. The connector
//! retries a fixed number of times at a constant interval.

use std::time::Duration;

use async_trait::async_trait;
use aztunnel_core::{TunnelError, TunnelResult};
use tracing::{info, warn};

use crate::channel::ChannelOpener;

/// Total attempts and the pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

/// Sleep capability, swapped out in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Opens a channel, retrying on failure.
pub struct Connector<O, S = TokioSleeper> {
    opener: O,
    sleeper: S,
    policy: RetryPolicy,
}

impl<O: ChannelOpener> Connector<O, TokioSleeper> {
    /// Create a connector with the default policy (10 attempts, 1s apart).
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            sleeper: TokioSleeper,
            policy: RetryPolicy::default(),
        }
    }
}

impl<O: ChannelOpener, S: Sleeper> Connector<O, S> {
    /// Replace the sleep implementation.
    pub fn with_sleeper<S2: Sleeper>(self, sleeper: S2) -> Connector<O, S2> {
        Connector {
            opener: self.opener,
            sleeper,
            policy: self.policy,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Open the channel, blocking until success or until the attempt budget
    /// is spent.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Connect`] wrapping the cause of the last
    /// failed attempt.
    pub async fn establish(&self) -> TunnelResult<O::Channel> {
        let max = self.policy.max_attempts.max(1);
        let endpoint = self.opener.endpoint();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.opener.open().await {
                Ok(channel) => {
                    info!(endpoint = %endpoint, attempt, "channel established");
                    return Ok(channel);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "channel dial error: attempt {attempt}/{max}");
                    if attempt >= max {
                        return Err(TunnelError::Connect {
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }
                    self.sleeper.sleep(self.policy.interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlakyOpener, RecordingSleeper};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        for failures in 0..=9 {
            let opener = FlakyOpener::failing_first(failures);
            let sleeper = RecordingSleeper::default();
            let connector = Connector::new(opener.clone()).with_sleeper(sleeper.clone());

            let result = connector.establish().await;
            assert!(result.is_ok(), "{failures} failures should still connect");
            assert_eq!(opener.attempts(), failures + 1);
            assert_eq!(sleeper.total(), Duration::from_secs(failures as u64));
        }
    }

    #[tokio::test]
    async fn gives_up_after_ten_attempts() {
        let opener = FlakyOpener::failing_first(u32::MAX);
        let sleeper = RecordingSleeper::default();
        let connector = Connector::new(opener.clone()).with_sleeper(sleeper.clone());

        let err = connector.establish().await.err().expect("must fail");
        match err {
            TunnelError::Connect { attempts, source } => {
                assert_eq!(attempts, 10);
                assert!(source.to_string().contains("attempt 10"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(opener.attempts(), 10);
        assert_eq!(sleeper.calls(), 9);
    }

    #[tokio::test]
    async fn custom_policy_is_respected() {
        let opener = FlakyOpener::failing_first(u32::MAX);
        let sleeper = RecordingSleeper::default();
        let connector = Connector::new(opener.clone())
            .with_sleeper(sleeper.clone())
            .with_policy(RetryPolicy {
                max_attempts: 3,
                interval: Duration::from_millis(250),
            });

        assert!(connector.establish().await.is_err());
        assert_eq!(opener.attempts(), 3);
        assert_eq!(sleeper.total(), Duration::from_millis(500));
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.interval, Duration::from_secs(1));
    }
}
