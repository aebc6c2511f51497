use std::time::Duration;

use crate::error::SessionError;

/// Reconnection policy, fixed at construction
///
/// Retries are bounded by attempt count and wait the same interval every time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub should_reconnect: bool,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    /// Path appended to the base URL
    pub namespace: String,
    /// Handed to the transport; the session itself never times out
    pub connect_timeout: Duration,
    /// Sent as `X-Client-Type`
    pub client_type: String,
}

/// Outcome of the Retry Decision for one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule retry number `attempt` after `delay`
    Schedule { attempt: u32, delay: Duration },
    /// The attempt budget is used up
    Exhausted,
    /// Reconnection is switched off
    Disabled,
}

impl ReconnectPolicy {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(3000);
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);

    pub fn new() -> Self {
        Self {
            should_reconnect: true,
            reconnect_interval: Self::DEFAULT_INTERVAL,
            max_reconnect_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            namespace: "/".to_owned(),
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            client_type: "tether".to_owned(),
        }
    }

    pub fn should_reconnect(mut self, enabled: bool) -> Self {
        self.should_reconnect = enabled;
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn client_type(mut self, client_type: impl Into<String>) -> Self {
        self.client_type = client_type.into();
        self
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.reconnect_interval.is_zero() {
            return Err(SessionError::InvalidConfig(
                "reconnect interval must be > 0".to_owned(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(SessionError::InvalidConfig(
                "connect timeout must be > 0".to_owned(),
            ));
        }
        Ok(())
    }

    /// Decide what follows a failure, given the retries already scheduled
    pub fn decide(&self, attempts: u32) -> RetryDecision {
        if self.should_reconnect && attempts < self.max_reconnect_attempts {
            RetryDecision::Schedule {
                attempt: attempts + 1,
                delay: self.reconnect_interval,
            }
        } else if attempts >= self.max_reconnect_attempts {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Disabled
        }
    }

    /// Target URL for `base_url` under this policy's namespace
    pub fn endpoint(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        if self.namespace.starts_with('/') {
            format!("{base}{}", self.namespace)
        } else {
            format!("{base}/{}", self.namespace)
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_reconnect);
        assert_eq!(policy.reconnect_interval, Duration::from_millis(3000));
        assert_eq!(policy.max_reconnect_attempts, 5);
        assert_eq!(policy.namespace, "/");
        assert_eq!(policy.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_policy_builder() {
        let policy = ReconnectPolicy::new()
            .should_reconnect(false)
            .reconnect_interval(Duration::from_millis(100))
            .max_reconnect_attempts(2)
            .namespace("/chat");

        assert!(!policy.should_reconnect);
        assert_eq!(policy.reconnect_interval, Duration::from_millis(100));
        assert_eq!(policy.max_reconnect_attempts, 2);
        assert_eq!(policy.namespace, "/chat");
    }

    #[test]
    fn test_decide_is_bounded_by_attempt_count() {
        let policy = ReconnectPolicy::new()
            .reconnect_interval(Duration::from_millis(100))
            .max_reconnect_attempts(2);

        assert_eq!(
            policy.decide(0),
            RetryDecision::Schedule {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            policy.decide(1),
            RetryDecision::Schedule {
                attempt: 2,
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(policy.decide(2), RetryDecision::Exhausted);
        assert_eq!(policy.decide(3), RetryDecision::Exhausted);
    }

    #[test]
    fn test_decide_when_disabled() {
        let policy = ReconnectPolicy::new().should_reconnect(false);
        assert_eq!(policy.decide(0), RetryDecision::Disabled);

        let zero_budget = ReconnectPolicy::new().max_reconnect_attempts(0);
        assert_eq!(zero_budget.decide(0), RetryDecision::Exhausted);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let policy = ReconnectPolicy::new().reconnect_interval(Duration::ZERO);
        assert!(matches!(
            policy.validate(),
            Err(SessionError::InvalidConfig(_))
        ));
        assert!(ReconnectPolicy::new().validate().is_ok());
    }

    #[test]
    fn test_endpoint_join() {
        let root = ReconnectPolicy::new();
        assert_eq!(root.endpoint("http://localhost:8080"), "http://localhost:8080/");
        assert_eq!(root.endpoint("http://localhost:8080/"), "http://localhost:8080/");

        let chat = ReconnectPolicy::new().namespace("chat");
        assert_eq!(chat.endpoint("https://example.com/"), "https://example.com/chat");
    }
}
