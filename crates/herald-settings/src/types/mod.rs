//! Settings types.
//!
//! All structs use `#[serde(default)]` so a partial settings file only
//! needs the keys it overrides. JSON keys are camelCase.

mod environment;

pub use environment::{Environment, EnvironmentProfile};

use std::collections::BTreeMap;
use std::time::Duration;

use herald_core::RetryConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeraldSettings {
    /// Active deployment environment.
    pub environment: Environment,
    /// Endpoint profile per environment.
    pub profiles: BTreeMap<Environment, EnvironmentProfile>,
    /// Broker connection behavior.
    pub transport: TransportSettings,
    /// REST client behavior.
    pub api: ApiSettings,
    /// Store reconciliation policy.
    pub reconcile: ReconcileSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

impl Default for HeraldSettings {
    fn default() -> Self {
        let profiles = [Environment::Development, Environment::Production]
            .into_iter()
            .map(|env| (env, EnvironmentProfile::default_for(env)))
            .collect();
        Self {
            environment: Environment::default(),
            profiles,
            transport: TransportSettings::default(),
            api: ApiSettings::default(),
            reconcile: ReconcileSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl HeraldSettings {
    /// Endpoint profile of the active environment.
    pub fn profile(&self) -> Result<&EnvironmentProfile> {
        self.profiles
            .get(&self.environment)
            .ok_or(SettingsError::MissingProfile(self.environment))
    }

    /// Mutable profile of the active environment, created from compiled
    /// defaults if absent.
    pub fn profile_mut(&mut self) -> &mut EnvironmentProfile {
        let env = self.environment;
        self.profiles
            .entry(env)
            .or_insert_with(|| EnvironmentProfile::default_for(env))
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let profile = self.profile()?;
        if !(profile.broker_url.starts_with("ws://") || profile.broker_url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "brokerUrl must be a ws:// or wss:// URL, got `{}`",
                profile.broker_url
            )));
        }
        if !(profile.api_base_url.starts_with("http://") || profile.api_base_url.starts_with("https://")) {
            return Err(SettingsError::InvalidValue(format!(
                "apiBaseUrl must be an http(s) URL, got `{}`",
                profile.api_base_url
            )));
        }
        if self.transport.reconnect_delay_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "transport.reconnectDelayMs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Broker connection behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Interval at which the client promises heart-beats (0 = none).
    pub heartbeat_outgoing_ms: u64,
    /// Interval at which the client wants heart-beats from the broker (0 = none).
    pub heartbeat_incoming_ms: u64,
    /// Upper bound on socket open plus STOMP handshake.
    pub connect_timeout_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5000,
            heartbeat_outgoing_ms: 4000,
            heartbeat_incoming_ms: 4000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl TransportSettings {
    /// Reconnect delay as a `Duration`.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// REST client behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Per-request timeout.
    pub request_timeout_ms: u64,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Backoff for the startup bulk fetch.
    pub fetch_retry: RetryConfig,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            user_agent: concat!("herald/", env!("CARGO_PKG_VERSION")).to_string(),
            fetch_retry: RetryConfig::default(),
        }
    }
}

impl ApiSettings {
    /// Request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// How a bulk-fetch result is applied to a store that may already hold
/// pushed records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMergePolicy {
    /// Union by id; pushes that raced ahead of the fetch survive.
    #[default]
    Merge,
    /// Full replace; earlier pushes are discarded.
    Replace,
}

/// Store reconciliation policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileSettings {
    /// Policy for applying bulk-fetch results.
    pub fetch_merge_policy: FetchMergePolicy,
    /// Periodic re-fetch interval (0 = disabled).
    pub resync_interval_ms: u64,
}

impl ReconcileSettings {
    /// Resync interval, `None` when disabled.
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_ms > 0).then(|| Duration::from_millis(self.resync_interval_ms))
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_match_reference_behavior() {
        let s = HeraldSettings::default();
        assert_eq!(s.environment, Environment::Development);
        assert_eq!(s.transport.reconnect_delay(), Duration::from_millis(5000));
        assert_eq!(s.transport.heartbeat_outgoing_ms, 4000);
        assert_eq!(s.transport.heartbeat_incoming_ms, 4000);
        assert_eq!(s.reconcile.fetch_merge_policy, FetchMergePolicy::Merge);
        assert!(s.reconcile.resync_interval().is_none());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn profile_lookup_follows_environment() {
        let mut s = HeraldSettings::default();
        assert_eq!(s.profile().unwrap().broker_url, "ws://localhost:8080/ws");
        s.environment = Environment::Production;
        assert_eq!(s.profile().unwrap().broker_url, "ws://backend:8080/ws");
    }

    #[test]
    fn missing_profile_is_an_error() {
        let mut s = HeraldSettings::default();
        let _ = s.profiles.remove(&Environment::Production);
        s.environment = Environment::Production;
        assert_matches!(
            s.profile(),
            Err(SettingsError::MissingProfile(Environment::Production))
        );
    }

    #[test]
    fn profile_mut_recreates_missing_profile() {
        let mut s = HeraldSettings::default();
        s.profiles.clear();
        s.profile_mut().broker_url = "ws://other:1/ws".into();
        assert_eq!(s.profile().unwrap().broker_url, "ws://other:1/ws");
        assert_eq!(s.profile().unwrap().api_base_url, "http://localhost:8080");
    }

    #[test]
    fn validate_rejects_bad_urls() {
        let mut s = HeraldSettings::default();
        s.profile_mut().broker_url = "http://localhost:8080/ws".into();
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(_)));

        let mut s = HeraldSettings::default();
        s.profile_mut().api_base_url = "localhost".into();
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_zero_reconnect_delay() {
        let mut s = HeraldSettings::default();
        s.transport.reconnect_delay_ms = 0;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn merge_policy_serde() {
        let p: FetchMergePolicy = serde_json::from_str("\"replace\"").unwrap();
        assert_eq!(p, FetchMergePolicy::Replace);
        assert_eq!(serde_json::to_string(&FetchMergePolicy::Merge).unwrap(), "\"merge\"");
    }

    #[test]
    fn settings_json_uses_environment_keys() {
        let value = serde_json::to_value(HeraldSettings::default()).unwrap();
        assert!(value["profiles"]["development"]["brokerUrl"].is_string());
        assert!(value["profiles"]["production"]["apiBaseUrl"].is_string());
        assert_eq!(value["transport"]["reconnectDelayMs"], 5000);
    }

    #[test]
    fn roundtrip_through_json() {
        let s = HeraldSettings::default();
        let json = serde_json::to_string(&s).unwrap();
        let back: HeraldSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
