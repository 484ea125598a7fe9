//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HeraldSettings::default()`]
//! 2. If `~/.herald/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `HERALD_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{Environment, FetchMergePolicy, HeraldSettings};

/// Resolve the path to the settings file (`~/.herald/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".herald").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HeraldSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus overrides). Invalid
/// JSON or a settings combination that fails validation is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HeraldSettings> {
    load_with_lookup(path, |name| std::env::var(name).ok())
}

/// Same as [`load_settings_from_path`] but reads overrides through `lookup`.
pub fn load_with_lookup(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<HeraldSettings> {
    let defaults = serde_json::to_value(HeraldSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: HeraldSettings = serde_json::from_value(merged)?;
    apply_overrides_from(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut HeraldSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are logged and ignored. `HERALD_ENV` is applied first so
/// URL overrides land on the newly selected profile.
pub fn apply_overrides_from(settings: &mut HeraldSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.parsed::<Environment>("HERALD_ENV") {
        settings.environment = v;
    }

    // ── Endpoints ───────────────────────────────────────────────────
    if let Some(v) = env.string("HERALD_BROKER_URL") {
        settings.profile_mut().broker_url = v;
    }
    if let Some(v) = env.string("HERALD_API_URL") {
        settings.profile_mut().api_base_url = v;
    }

    // ── Transport ───────────────────────────────────────────────────
    if let Some(v) = env.u64_in("HERALD_RECONNECT_DELAY_MS", 100, 600_000) {
        settings.transport.reconnect_delay_ms = v;
    }
    if let Some(v) = env.u64_in("HERALD_HEARTBEAT_MS", 0, 600_000) {
        settings.transport.heartbeat_outgoing_ms = v;
        settings.transport.heartbeat_incoming_ms = v;
    }

    // ── Reconcile ───────────────────────────────────────────────────
    if let Some(v) = env.string("HERALD_FETCH_MERGE") {
        match parse_merge_policy(&v) {
            Some(policy) => settings.reconcile.fetch_merge_policy = policy,
            None => warn!(key = "HERALD_FETCH_MERGE", value = %v, "invalid merge policy, ignoring"),
        }
    }
    if let Some(v) = env.u64_in("HERALD_RESYNC_INTERVAL_MS", 0, 86_400_000) {
        settings.reconcile.resync_interval_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("HERALD_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a fetch merge policy name (case-insensitive).
pub fn parse_merge_policy(val: &str) -> Option<FetchMergePolicy> {
    match val.trim().to_ascii_lowercase().as_str() {
        "merge" => Some(FetchMergePolicy::Merge),
        "replace" => Some(FetchMergePolicy::Replace),
        _ => None,
    }
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn parsed<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        let val = self.string(name)?;
        let result = val.parse().ok();
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"transport": {"reconnectDelayMs": 5000, "connectTimeoutMs": 10000}});
        let source = serde_json::json!({"transport": {"reconnectDelayMs": 250}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["transport"]["reconnectDelayMs"], 250);
        assert_eq!(merged["transport"]["connectTimeoutMs"], 10000);
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    // ── load_with_lookup ────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_with_lookup(Path::new("/nonexistent/settings.json"), no_env).unwrap();
        assert_eq!(settings, HeraldSettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"environment": "production", "transport": {"heartbeatIncomingMs": 0}}"#,
        )
        .unwrap();

        let settings = load_with_lookup(&path, no_env).unwrap();
        assert_eq!(settings.environment, Environment::Production);
        assert_eq!(settings.profile().unwrap().broker_url, "ws://backend:8080/ws");
        assert_eq!(settings.transport.heartbeat_incoming_ms, 0);
        assert_eq!(settings.transport.heartbeat_outgoing_ms, 4000);
    }

    #[test]
    fn load_profile_override_keeps_other_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"profiles": {"development": {"brokerUrl": "ws://127.0.0.1:9000/ws"}}}"#,
        )
        .unwrap();

        let settings = load_with_lookup(&path, no_env).unwrap();
        assert_eq!(settings.profile().unwrap().broker_url, "ws://127.0.0.1:9000/ws");
        assert_eq!(settings.profile().unwrap().api_base_url, "http://localhost:8080");
        assert_eq!(
            settings.profiles[&Environment::Production].broker_url,
            "ws://backend:8080/ws"
        );
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert_matches!(load_with_lookup(&path, no_env), Err(SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_combination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"transport": {"reconnectDelayMs": 0}}"#).unwrap();
        assert_matches!(
            load_with_lookup(&path, no_env),
            Err(SettingsError::InvalidValue(_))
        );
    }

    #[test]
    fn env_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"transport": {"reconnectDelayMs": 1000}}"#).unwrap();

        let lookup = lookup_from(&[("HERALD_RECONNECT_DELAY_MS", "250")]);
        let settings = load_with_lookup(&path, lookup).unwrap();
        assert_eq!(settings.transport.reconnect_delay_ms, 250);
    }

    // ── apply_overrides_from ────────────────────────────────────────

    #[test]
    fn env_switch_then_url_override_targets_new_profile() {
        let mut settings = HeraldSettings::default();
        apply_overrides_from(
            &mut settings,
            lookup_from(&[
                ("HERALD_ENV", "prod"),
                ("HERALD_BROKER_URL", "ws://broker.internal/ws"),
            ]),
        );
        assert_eq!(settings.environment, Environment::Production);
        assert_eq!(settings.profile().unwrap().broker_url, "ws://broker.internal/ws");
        assert_eq!(
            settings.profiles[&Environment::Development].broker_url,
            "ws://localhost:8080/ws"
        );
    }

    #[test]
    fn heartbeat_override_sets_both_directions() {
        let mut settings = HeraldSettings::default();
        apply_overrides_from(&mut settings, lookup_from(&[("HERALD_HEARTBEAT_MS", "0")]));
        assert_eq!(settings.transport.heartbeat_outgoing_ms, 0);
        assert_eq!(settings.transport.heartbeat_incoming_ms, 0);
    }

    #[test]
    fn invalid_values_are_ignored() {
        let mut settings = HeraldSettings::default();
        apply_overrides_from(
            &mut settings,
            lookup_from(&[
                ("HERALD_ENV", "staging"),
                ("HERALD_RECONNECT_DELAY_MS", "5"),
                ("HERALD_FETCH_MERGE", "union"),
                ("HERALD_RESYNC_INTERVAL_MS", "abc"),
            ]),
        );
        assert_eq!(settings, HeraldSettings::default());
    }

    #[test]
    fn reconcile_and_logging_overrides() {
        let mut settings = HeraldSettings::default();
        apply_overrides_from(
            &mut settings,
            lookup_from(&[
                ("HERALD_FETCH_MERGE", "Replace"),
                ("HERALD_RESYNC_INTERVAL_MS", "60000"),
                ("HERALD_LOG_LEVEL", "herald=debug"),
                ("HERALD_API_URL", "http://api.internal"),
            ]),
        );
        assert_eq!(settings.reconcile.fetch_merge_policy, FetchMergePolicy::Replace);
        assert_eq!(settings.reconcile.resync_interval_ms, 60_000);
        assert_eq!(settings.logging.level, "herald=debug");
        assert_eq!(settings.profile().unwrap().api_base_url, "http://api.internal");
    }

    #[test]
    fn empty_values_are_unset() {
        let mut settings = HeraldSettings::default();
        apply_overrides_from(&mut settings, lookup_from(&[("HERALD_BROKER_URL", "")]));
        assert_eq!(settings.profile().unwrap().broker_url, "ws://localhost:8080/ws");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("5000", 100, 600_000), Some(5000));
        assert_eq!(parse_u64_range("100", 100, 600_000), Some(100));
        assert_eq!(parse_u64_range("99", 100, 600_000), None);
        assert_eq!(parse_u64_range("700000", 100, 600_000), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
        assert_eq!(parse_u64_range("abc", 0, 10), None);
    }

    #[test]
    fn parse_merge_policy_names() {
        assert_eq!(parse_merge_policy("merge"), Some(FetchMergePolicy::Merge));
        assert_eq!(parse_merge_policy(" REPLACE "), Some(FetchMergePolicy::Replace));
        assert_eq!(parse_merge_policy("both"), None);
    }
}
