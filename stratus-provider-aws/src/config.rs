//! Provider configuration
//!
//! Settings come from an attribute map (the provider block) with the
//! environment as fallback.

use std::collections::HashMap;
use std::time::Duration;

use stratus_core::resource::Value;
use thiserror::Error;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const MAX_RETRIES_LIMIT: u32 = 25;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Provider configuration error: {0}")]
    Invalid(String),

    #[error("Provider configuration error: attribute '{name}' must be a {expected}")]
    WrongType { name: String, expected: &'static str },
}

/// Per-service endpoint overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Endpoints {
    pub organizations: Option<String>,
    pub oam: Option<String>,
}

/// Timeouts for long-running operations
#[derive(Debug, Clone, PartialEq)]
pub struct Timeouts {
    /// Waiting for CreateAccount to finish
    pub account_create: Duration,
    /// Waiting for a closed account to become SUSPENDED
    pub account_close: Duration,
    /// Waiting for a policy type to become enabled (or disappear) on the root
    pub policy_type: Duration,
    /// Retrying while the organization is still being finalized
    pub organization_finalization: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            account_create: Duration::from_secs(20 * 60),
            account_close: Duration::from_secs(10 * 60),
            policy_type: Duration::from_secs(5 * 60),
            organization_finalization: Duration::from_secs(4 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub region: String,
    pub profile: Option<String>,
    pub max_retries: u32,
    pub endpoints: Endpoints,
    /// Fixed interval between status polls; `None` backs off exponentially
    pub poll_interval: Option<Duration>,
    /// Interval between retries of calls rejected while finalizing
    pub retry_interval: Duration,
    pub timeouts: Timeouts,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            profile: None,
            max_retries: DEFAULT_MAX_RETRIES,
            endpoints: Endpoints::default(),
            poll_interval: None,
            retry_interval: Duration::from_secs(5),
            timeouts: Timeouts::default(),
        }
    }
}

impl ProviderConfig {
    /// Configuration from the environment only
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let region = lookup("AWS_REGION")
            .filter(|s| !s.is_empty())
            .or_else(|| lookup("AWS_DEFAULT_REGION").filter(|s| !s.is_empty()))
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        Self {
            region,
            profile: lookup("AWS_PROFILE").filter(|s| !s.is_empty()),
            ..Self::default()
        }
    }

    /// Configuration from provider block attributes, falling back to the environment
    pub fn from_attributes(attributes: &HashMap<String, Value>) -> Result<Self, ConfigError> {
        let mut config = Self::from_env();
        config.apply_attributes(attributes)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_attributes(&mut self, attributes: &HashMap<String, Value>) -> Result<(), ConfigError> {
        if let Some(region) = get_string(attributes, "region")? {
            self.region = region;
        }
        if let Some(profile) = get_string(attributes, "profile")? {
            self.profile = Some(profile);
        }
        if let Some(retries) = get_int(attributes, "max_retries")? {
            self.max_retries = u32::try_from(retries).map_err(|_| {
                ConfigError::Invalid(format!("max_retries must not be negative, got {}", retries))
            })?;
        }
        match attributes.get("endpoints") {
            None => {}
            Some(Value::Map(map)) => {
                self.endpoints.organizations = get_string(map, "organizations")?;
                self.endpoints.oam = get_string(map, "oam")?;
            }
            Some(_) => {
                return Err(ConfigError::WrongType {
                    name: "endpoints".to_string(),
                    expected: "map",
                });
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::Invalid("region must not be empty".to_string()));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_retries must be at most {}, got {}",
                MAX_RETRIES_LIMIT, self.max_retries
            )));
        }
        Ok(())
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Short intervals and timeouts for the in-memory backend
    pub fn for_testing() -> Self {
        Self::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_retry_interval(Duration::from_millis(5))
            .with_timeouts(Timeouts {
                account_create: Duration::from_secs(5),
                account_close: Duration::from_secs(5),
                policy_type: Duration::from_secs(5),
                organization_finalization: Duration::from_secs(5),
            })
    }

    /// Load the shared AWS SDK configuration
    pub async fn load_sdk_config(&self) -> aws_config::SdkConfig {
        let retry = aws_config::retry::RetryConfig::standard()
            .with_max_attempts(self.max_retries.max(1));
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(self.region.clone()))
            .retry_config(retry);
        if let Some(profile) = &self.profile {
            loader = loader.profile_name(profile);
        }
        loader.load().await
    }
}

fn get_string(attributes: &HashMap<String, Value>, key: &str) -> Result<Option<String>, ConfigError> {
    match attributes.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ConfigError::WrongType {
            name: key.to_string(),
            expected: "string",
        }),
    }
}

fn get_int(attributes: &HashMap<String, Value>, key: &str) -> Result<Option<i64>, ConfigError> {
    match attributes.get(key) {
        None => Ok(None),
        Some(Value::Int(i)) => Ok(Some(*i)),
        Some(_) => Err(ConfigError::WrongType {
            name: key.to_string(),
            expected: "number",
        }),
    }
}
