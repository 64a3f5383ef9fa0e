//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority, see
//!    [`apply_overrides`])
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::RelaySettings;

/// Resolve the path to the settings file (`~/.sigrelay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".sigrelay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus overrides). If the
/// file contains invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    load_with_lookup(path, |name| std::env::var(name).ok())
}

fn load_with_lookup(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, lookup);
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

/// Apply overrides from an arbitrary variable source.
///
/// Invalid values are logged and ignored (the file/default value stays).
pub fn apply_overrides(settings: &mut RelaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SIGRELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("SIGRELAY_PORT", |s| parse_u16_range(s, 1, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = env.parsed("SIGRELAY_MAX_SEND_QUEUE", |s| parse_usize_range(s, 1, 65_536)) {
        settings.server.max_send_queue = v;
    }

    // ── CORS ────────────────────────────────────────────────────────
    if let Some(v) = env.parsed("SIGRELAY_DEV", parse_bool) {
        settings.cors.dev_mode = v;
    }
    if let Some(v) = env.parsed("SIGRELAY_OFFICIAL_ORIGIN", parse_origin_list) {
        settings.cors.allowed_origins = v;
    }

    // ── Bots ────────────────────────────────────────────────────────
    if let Some(v) = env.parsed("SIGRELAY_BOTS_ENABLED", parse_bool) {
        settings.bots.enabled = v;
    }
    if let Some(v) = env.parsed("SIGRELAY_BOT_LIFETIME_MS", |s| {
        parse_u64_range(s, 100, 86_400_000)
    }) {
        settings.bots.lifetime_ms = v;
    }
    if let Some(v) = env.parsed("SIGRELAY_BOT_SWEEP_INTERVAL_MS", |s| {
        parse_u64_range(s, 100, 3_600_000)
    }) {
        settings.bots.sweep_interval_ms = v;
    }

    // ── Notifications ───────────────────────────────────────────────
    if let Some(v) = env.parsed("SIGRELAY_NOTIFY_ENABLED", parse_bool) {
        settings.notifications.enabled = v;
    }
    if let Some(v) = env.string("TELEGRAM_BOT_TOKEN") {
        settings.notifications.telegram_bot_token = v;
    }
    if let Some(v) = env.string("TELEGRAM_CHAT_ID") {
        settings.notifications.telegram_chat_id = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a comma-separated origin list. Empty entries are dropped; an
/// all-empty list is rejected.
pub fn parse_origin_list(val: &str) -> Option<Vec<String>> {
    let origins: Vec<String> = val
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (!origins.is_empty()).then_some(origins)
}

// ── Variable readers ────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 3001, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"origins": ["a", "b"]});
        let source = serde_json::json!({"origins": ["c"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["origins"], serde_json::json!(["c"]));
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
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 42);
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/settings.json");
        let settings = load_with_lookup(path, vars(&[])).unwrap();
        assert_eq!(settings, RelaySettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 4000}, "bots": {"lifetimeMs": 5000}}"#,
        )
        .unwrap();

        let settings = load_with_lookup(&path, vars(&[])).unwrap();
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.bots.lifetime_ms, 5000);
        assert_eq!(settings.bots.sweep_interval_ms, 2_500);
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_with_lookup(&path, vars(&[]));
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"maxSendQueue": 0}}"#).unwrap();

        let result = load_with_lookup(&path, vars(&[]));
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    #[test]
    fn env_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 4000}}"#).unwrap();

        let settings = load_with_lookup(&path, vars(&[("SIGRELAY_PORT", "5000")])).unwrap();
        assert_eq!(settings.server.port, 5000);
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_applied() {
        let mut s = RelaySettings::default();
        apply_overrides(
            &mut s,
            vars(&[
                ("SIGRELAY_HOST", "127.0.0.1"),
                ("SIGRELAY_DEV", "yes"),
                ("SIGRELAY_OFFICIAL_ORIGIN", "https://a.example, https://b.example"),
                ("SIGRELAY_BOTS_ENABLED", "off"),
                ("SIGRELAY_BOT_LIFETIME_MS", "1500"),
                ("SIGRELAY_NOTIFY_ENABLED", "1"),
                ("TELEGRAM_BOT_TOKEN", "tok"),
                ("TELEGRAM_CHAT_ID", "42"),
            ]),
        );
        assert_eq!(s.server.host, "127.0.0.1");
        assert!(s.cors.dev_mode);
        assert_eq!(
            s.cors.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert!(!s.bots.enabled);
        assert_eq!(s.bots.lifetime_ms, 1500);
        assert!(s.notifications.enabled);
        assert_eq!(s.notifications.telegram_bot_token, "tok");
        assert_eq!(s.notifications.telegram_chat_id, "42");
    }

    #[test]
    fn invalid_overrides_ignored() {
        let mut s = RelaySettings::default();
        apply_overrides(
            &mut s,
            vars(&[
                ("SIGRELAY_PORT", "0"),
                ("SIGRELAY_DEV", "maybe"),
                ("SIGRELAY_BOT_LIFETIME_MS", "10"),
                ("SIGRELAY_HOST", ""),
            ]),
        );
        assert_eq!(s, RelaySettings::default());
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("enabled"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("3001", 1, 65535), Some(3001));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("20000", 100, 86_400_000), Some(20_000));
        assert_eq!(parse_u64_range("-5", 100, 86_400_000), None);
        assert_eq!(parse_usize_range("8", 1, 16), Some(8));
        assert_eq!(parse_usize_range("abc", 1, 16), None);
    }

    #[test]
    fn parse_origin_list_trims_and_rejects_empty() {
        assert_eq!(
            parse_origin_list(" https://x.test ,,https://y.test"),
            Some(vec!["https://x.test".to_string(), "https://y.test".to_string()])
        );
        assert_eq!(parse_origin_list(" , "), None);
    }
}
