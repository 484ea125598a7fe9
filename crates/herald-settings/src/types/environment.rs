//! Deployment environments and their endpoint profiles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Deployment environment. Selects an [`EnvironmentProfile`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development.
    #[default]
    Development,
    /// Production deployment.
    Production,
}

impl Environment {
    /// Lowercase name as used in settings and env vars.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment `{other}`")),
        }
    }
}

/// Endpoints used in one deployment environment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentProfile {
    /// WebSocket URL of the STOMP broker endpoint.
    pub broker_url: String,
    /// Base URL of the notification REST API (no trailing `/api`).
    pub api_base_url: String,
}

impl EnvironmentProfile {
    /// Compiled default profile for an environment.
    pub fn default_for(env: Environment) -> Self {
        match env {
            Environment::Development => Self {
                broker_url: "ws://localhost:8080/ws".to_string(),
                api_base_url: "http://localhost:8080".to_string(),
            },
            Environment::Production => Self {
                broker_url: "ws://backend:8080/ws".to_string(),
                api_base_url: "http://backend:8080".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names_and_aliases() {
        assert_eq!("production".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!(" dev ".parse::<Environment>(), Ok(Environment::Development));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&Environment::Production).unwrap(),
            "\"production\""
        );
        let env: Environment = serde_json::from_str("\"development\"").unwrap();
        assert_eq!(env, Environment::Development);
    }

    #[test]
    fn default_profiles_differ_per_environment() {
        let dev = EnvironmentProfile::default_for(Environment::Development);
        let prod = EnvironmentProfile::default_for(Environment::Production);
        assert_eq!(dev.broker_url, "ws://localhost:8080/ws");
        assert_eq!(prod.broker_url, "ws://backend:8080/ws");
        assert_ne!(dev.api_base_url, prod.api_base_url);
    }

    #[test]
    fn profile_camel_case() {
        let value = serde_json::to_value(EnvironmentProfile::default_for(Environment::Development))
            .unwrap();
        assert!(value.get("brokerUrl").is_some());
        assert!(value.get("apiBaseUrl").is_some());
    }
}
