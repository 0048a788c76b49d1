//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`LarderSettings::default()`]
//! 2. If `~/.larder/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `LARDER_*` environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::LarderSettings;

/// `~/.larder`
pub fn larder_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".larder")
}

pub fn settings_path() -> PathBuf {
    larder_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<LarderSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<LarderSettings> {
    let defaults = serde_json::to_value(LarderSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: LarderSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and primitives are replaced by `source`,
/// and nulls in `source` are skipped.
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

pub fn apply_env_overrides(settings: &mut LarderSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Empty or unparseable values are
/// ignored.
pub fn apply_overrides_from<F>(settings: &mut LarderSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("LARDER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("LARDER_PERSIST_DIAGNOSTICS")
        .and_then(|v| checked("LARDER_PERSIST_DIAGNOSTICS", &v, parse_bool(&v)))
    {
        settings.logging.persist_diagnostics = v;
    }

    // ── Telemetry buffer ────────────────────────────────────────────
    if let Some(v) = read("LARDER_DEV_MODE")
        .and_then(|v| checked("LARDER_DEV_MODE", &v, parse_bool(&v)))
    {
        settings.telemetry.dev_mode = v;
    }
    if let Some(v) = read("LARDER_FLUSH_INTERVAL_SECS")
        .and_then(|v| checked("LARDER_FLUSH_INTERVAL_SECS", &v, parse_u64_range(&v, 1, 86_400)))
    {
        settings.telemetry.flush_interval_secs = v;
    }
    if let Some(v) = read("LARDER_MAX_QUEUE_LEN")
        .and_then(|v| checked("LARDER_MAX_QUEUE_LEN", &v, parse_u64_range(&v, 0, 10_000_000)))
    {
        settings.telemetry.max_queue_len = v as usize;
    }
    if let Some(v) = read("LARDER_USER_ID_POLICY") {
        match serde_json::from_value(Value::String(v.clone())) {
            Ok(policy) => settings.telemetry.user_id_policy = policy,
            Err(_) => {
                tracing::warn!(
                    key = "LARDER_USER_ID_POLICY",
                    value = %v,
                    "invalid env var, ignoring"
                );
            }
        }
    }

    // ── Collector ───────────────────────────────────────────────────
    if let Some(v) = read("LARDER_COLLECTOR_ERRORS_URL") {
        settings.collector.errors_url = v;
    }
    if let Some(v) = read("LARDER_COLLECTOR_METRICS_URL") {
        settings.collector.metrics_url = v;
    }
    if let Some(v) = read("LARDER_COLLECTOR_TIMEOUT_MS")
        .and_then(|v| checked("LARDER_COLLECTOR_TIMEOUT_MS", &v, parse_u64_range(&v, 100, 600_000)))
    {
        settings.collector.timeout_ms = v;
    }

    // ── Proxy ───────────────────────────────────────────────────────
    if let Some(v) = read("LARDER_PROXY_HOST") {
        settings.proxy.host = v;
    }
    if let Some(v) = read("LARDER_PROXY_PORT")
        .and_then(|v| checked("LARDER_PROXY_PORT", &v, parse_u64_range(&v, 1, 65_535)))
    {
        settings.proxy.port = v as u16;
    }
    if let Some(v) = read("FATSECRET_TOKEN_URL") {
        settings.proxy.token_url = v;
    }
    if let Some(v) = read("FATSECRET_API_URL") {
        settings.proxy.api_url = v;
    }
}

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn checked<T>(key: &str, raw: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        tracing::warn!(key = key, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use larder_core::UserIdPolicy;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"proxy": {"port": 9092, "host": "0.0.0.0"}});
        let source = serde_json::json!({"proxy": {"port": 8000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["proxy"]["port"], 8000);
        assert_eq!(merged["proxy"]["host"], "0.0.0.0");
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
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.telemetry.flush_interval_secs, 30);
        assert_eq!(settings.telemetry.max_queue_len, 1000);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let json = serde_json::json!({
            "telemetry": {"flushIntervalSecs": 5, "userIdPolicy": "clear_on_logout"},
            "proxy": {"port": 8123}
        });
        std::fs::write(&path, json.to_string()).unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.telemetry.flush_interval_secs, 5);
        assert_eq!(settings.telemetry.user_id_policy, UserIdPolicy::ClearOnLogout);
        assert_eq!(settings.proxy.port, 8123);
        assert_eq!(settings.telemetry.max_queue_len, 1000);
        assert_eq!(settings.proxy.default_max_results, 20);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = LarderSettings::default();
        apply_overrides_from(
            &mut settings,
            lookup_from(&[
                ("LARDER_DEV_MODE", "yes"),
                ("LARDER_FLUSH_INTERVAL_SECS", "10"),
                ("LARDER_MAX_QUEUE_LEN", "0"),
                ("LARDER_USER_ID_POLICY", "clear_on_logout"),
                ("LARDER_COLLECTOR_ERRORS_URL", "http://collector/errors"),
                ("LARDER_PROXY_PORT", "8080"),
            ]),
        );
        assert!(settings.telemetry.dev_mode);
        assert_eq!(settings.telemetry.flush_interval_secs, 10);
        assert_eq!(settings.telemetry.max_queue_len, 0);
        assert_eq!(settings.telemetry.user_id_policy, UserIdPolicy::ClearOnLogout);
        assert_eq!(settings.collector.errors_url, "http://collector/errors");
        assert_eq!(settings.proxy.port, 8080);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = LarderSettings::default();
        apply_overrides_from(
            &mut settings,
            lookup_from(&[
                ("LARDER_DEV_MODE", "maybe"),
                ("LARDER_FLUSH_INTERVAL_SECS", "0"),
                ("LARDER_PROXY_PORT", "99999"),
                ("LARDER_USER_ID_POLICY", "forget"),
                ("LARDER_LOG_LEVEL", ""),
            ]),
        );
        let defaults = LarderSettings::default();
        assert_eq!(settings.telemetry.dev_mode, defaults.telemetry.dev_mode);
        assert_eq!(settings.telemetry.flush_interval_secs, 30);
        assert_eq!(settings.proxy.port, 9092);
        assert_eq!(settings.telemetry.user_id_policy, UserIdPolicy::RetainOnLogout);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("5", 1, 10), Some(5));
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("x", 1, 10), None);
    }
}
