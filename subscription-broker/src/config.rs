//! Configuration types for the subscription-broker crate
//!
//! `BrokerConfig` controls the renewal cadence, the lifetime requested for new
//! subscriptions, the public endpoint announced to the remote platform and the
//! retention of the call-record store.

use std::time::Duration;

use chrono::Utc;
use url::Url;

use crate::error::ConfigError;

/// Route on this service that receives push notifications.
pub const NOTIFICATION_ROUTE: &str = "subscription";

/// Configuration for the WebhookBroker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Public base URL of this service, as reachable by the remote platform
    /// Default: http://localhost:5000/
    pub public_endpoint: String,

    /// How often the renewal scheduler wakes up
    /// Default: 10 minutes
    pub renewal_interval: Duration,

    /// Lifetime requested when creating or renewing a subscription
    /// Default: 4230 minutes (the platform maximum for call records)
    pub subscription_lifetime: Duration,

    /// Maximum number of call records kept by the store
    /// Default: 1000
    pub call_record_capacity: usize,

    /// How long shutdown waits for the renewal task to stop
    /// Default: 5 seconds
    pub shutdown_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            public_endpoint: "http://localhost:5000/".to_string(),
            renewal_interval: Duration::from_secs(10 * 60),
            subscription_lifetime: Duration::from_secs(4230 * 60),
            call_record_capacity: 1000,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl BrokerConfig {
    /// Create a new BrokerConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.notification_url()?;

        if self.renewal_interval.is_zero() {
            return Err(ConfigError::MustBePositive("renewal_interval"));
        }

        if self.subscription_lifetime.is_zero() {
            return Err(ConfigError::MustBePositive("subscription_lifetime"));
        }

        // A record is renewed once it falls inside now + 2 * interval, so the
        // lifetime has to outlast that window or every tick renews everything.
        if self.renewal_interval * 2 >= self.subscription_lifetime {
            return Err(ConfigError::RenewalWindowTooLong {
                interval_secs: self.renewal_interval.as_secs(),
                lifetime_secs: self.subscription_lifetime.as_secs(),
            });
        }

        // Expirations are computed as now + lifetime and must stay representable.
        if Utc::now().checked_add_signed(self.lifetime_delta()?).is_none() {
            return Err(ConfigError::OutOfRange("subscription_lifetime"));
        }

        if self.call_record_capacity == 0 {
            return Err(ConfigError::MustBePositive("call_record_capacity"));
        }

        Ok(())
    }

    /// The URL the remote platform should deliver notifications to.
    ///
    /// Any path on the public endpoint is kept; the notification route is
    /// appended to it.
    pub fn notification_url(&self) -> Result<Url, ConfigError> {
        let invalid =
            |reason: String| ConfigError::InvalidPublicEndpoint(self.public_endpoint.clone(), reason);

        let mut base = Url::parse(&self.public_endpoint).map_err(|e| invalid(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(invalid("not a base URL".to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        base.join(NOTIFICATION_ROUTE)
            .map_err(|e| invalid(e.to_string()))
    }

    /// The renewal lookahead: records expiring within this window get renewed.
    pub fn renewal_window(&self) -> Duration {
        self.renewal_interval * 2
    }

    /// The subscription lifetime as a calendar duration.
    pub fn lifetime_delta(&self) -> Result<chrono::Duration, ConfigError> {
        chrono::Duration::from_std(self.subscription_lifetime)
            .map_err(|_| ConfigError::OutOfRange("subscription_lifetime"))
    }

    pub fn with_public_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.public_endpoint = endpoint.into();
        self
    }

    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = interval;
        self
    }

    pub fn with_subscription_lifetime(mut self, lifetime: Duration) -> Self {
        self.subscription_lifetime = lifetime;
        self
    }

    pub fn with_call_record_capacity(mut self, capacity: usize) -> Self {
        self.call_record_capacity = capacity;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.renewal_interval, Duration::from_secs(600));
        assert_eq!(config.subscription_lifetime, Duration::from_secs(253_800));
        assert_eq!(config.renewal_window(), Duration::from_secs(1200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_notification_url() {
        let config = BrokerConfig::new().with_public_endpoint("https://hooks.example.com");
        assert_eq!(
            config.notification_url().unwrap().as_str(),
            "https://hooks.example.com/subscription"
        );

        let config = BrokerConfig::new().with_public_endpoint("https://example.com/webhook");
        assert_eq!(
            config.notification_url().unwrap().as_str(),
            "https://example.com/webhook/subscription"
        );

        let config = BrokerConfig::new().with_public_endpoint("https://example.com/webhook/");
        assert_eq!(
            config.notification_url().unwrap().as_str(),
            "https://example.com/webhook/subscription"
        );
    }

    #[test]
    fn test_config_validation() {
        let invalid = BrokerConfig::new().with_public_endpoint("not a url");
        assert!(matches!(
            invalid.validate(),
            Err(ConfigError::InvalidPublicEndpoint(..))
        ));

        let invalid = BrokerConfig::new().with_renewal_interval(Duration::ZERO);
        assert_eq!(
            invalid.validate(),
            Err(ConfigError::MustBePositive("renewal_interval"))
        );

        let invalid = BrokerConfig::new()
            .with_renewal_interval(Duration::from_secs(600))
            .with_subscription_lifetime(Duration::from_secs(1000));
        assert!(matches!(
            invalid.validate(),
            Err(ConfigError::RenewalWindowTooLong { .. })
        ));

        let invalid = BrokerConfig::new().with_subscription_lifetime(Duration::MAX);
        assert_eq!(
            invalid.validate(),
            Err(ConfigError::OutOfRange("subscription_lifetime"))
        );

        // Fits a calendar duration but not a timestamp once added to now.
        let invalid = BrokerConfig::new()
            .with_subscription_lifetime(Duration::from_secs(10_000_000_000_000));
        assert_eq!(
            invalid.validate(),
            Err(ConfigError::OutOfRange("subscription_lifetime"))
        );

        let invalid = BrokerConfig::new().with_call_record_capacity(0);
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_builder_pattern() {
        let config = BrokerConfig::new()
            .with_public_endpoint("https://example.org/")
            .with_renewal_interval(Duration::from_secs(60))
            .with_subscription_lifetime(Duration::from_secs(3600))
            .with_call_record_capacity(10)
            .with_shutdown_timeout(Duration::from_secs(1));

        assert_eq!(config.public_endpoint, "https://example.org/");
        assert_eq!(config.renewal_interval, Duration::from_secs(60));
        assert_eq!(config.call_record_capacity, 10);
        assert!(config.validate().is_ok());
    }
}
