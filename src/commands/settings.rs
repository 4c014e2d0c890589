use crate::commands::source::is_valid_dataset_name;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_SCHEMA_VERSION: i64 = 1;
const DEFAULT_DATASET: &str = "members";

#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSettings {
    pub dataset: String,
    pub batch_size: usize,
    pub cooldown: Duration,
    pub session_max_age: Duration,
    pub fetch_timeout: Duration,
    pub log_level: String,
}

pub fn load_effective_settings(data_dir: &str) -> Result<EffectiveSettings, String> {
    let settings = load_settings_from_disk(data_dir)?;
    Ok(effective_from_value(&settings))
}

fn effective_from_value(settings: &Value) -> EffectiveSettings {
    let number = |key: &str, default: u64| settings.get(key).and_then(Value::as_u64).unwrap_or(default);

    EffectiveSettings {
        dataset: settings
            .get("dataset")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_DATASET)
            .to_string(),
        batch_size: number("batchSize", 1000) as usize,
        cooldown: Duration::from_secs(number("cooldownSecs", 3600)),
        session_max_age: Duration::from_secs(number("sessionMaxAgeDays", 30) * 86_400),
        fetch_timeout: Duration::from_secs(number("fetchTimeoutSecs", 30)),
        log_level: settings
            .get("logLevel")
            .and_then(Value::as_str)
            .unwrap_or("info")
            .to_string(),
    }
}

pub fn load_settings_from_disk(data_dir: &str) -> Result<Value, String> {
    let path = settings_path(data_dir);
    ensure_state_dir(data_dir)?;

    let original = if path.exists() {
        let raw = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read settings.json: {e}"))?;
        serde_json::from_str::<Value>(&raw).unwrap_or_else(|_| json!({}))
    } else {
        json!({})
    };

    let migrated = migrate_settings(original.clone());
    if migrated != original || !path.exists() {
        write_settings_file(&path, &migrated)?;
    }

    Ok(migrated)
}

pub fn save_settings_to_disk(data_dir: &str, settings: Value) -> Result<Value, String> {
    let path = settings_path(data_dir);
    ensure_state_dir(data_dir)?;

    let mut merged = load_settings_from_disk(data_dir).unwrap_or_else(|_| default_settings());
    merge_settings(&mut merged, &settings);

    let migrated = migrate_settings(merged);
    write_settings_file(&path, &migrated)?;
    Ok(migrated)
}

fn settings_path(data_dir: &str) -> PathBuf {
    Path::new(data_dir)
        .join(".communitylens")
        .join("settings.json")
}

fn ensure_state_dir(data_dir: &str) -> Result<(), String> {
    let dir = Path::new(data_dir).join(".communitylens");
    fs::create_dir_all(&dir)
        .map_err(|e| format!("Failed to create .communitylens directory: {e}"))
}

fn write_settings_file(path: &Path, settings: &Value) -> Result<(), String> {
    let raw = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {e}"))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write settings.json: {e}"))
}

fn migrate_settings(input: Value) -> Value {
    let defaults = default_settings();
    let mut out = match input {
        Value::Object(map) => Value::Object(map),
        _ => Value::Object(Map::new()),
    };

    deep_merge_defaults(&mut out, &defaults);
    sanitize_settings(&mut out);
    if let Some(obj) = out.as_object_mut() {
        obj.insert("schema_version".to_string(), json!(SETTINGS_SCHEMA_VERSION));
    }

    out
}

fn default_settings() -> Value {
    json!({
        "schema_version": SETTINGS_SCHEMA_VERSION,
        "dataset": DEFAULT_DATASET,
        "batchSize": 1000,
        "cooldownSecs": 3600,
        "sessionMaxAgeDays": 30,
        "fetchTimeoutSecs": 30,
        "logLevel": "info"
    })
}

fn deep_merge_defaults(target: &mut Value, defaults: &Value) {
    let (Some(target_obj), Some(default_obj)) = (target.as_object_mut(), defaults.as_object()) else {
        return;
    };

    for (key, default_value) in default_obj {
        match target_obj.get_mut(key) {
            Some(existing) => {
                if existing.is_object() && default_value.is_object() {
                    deep_merge_defaults(existing, default_value);
                }
            }
            None => {
                target_obj.insert(key.clone(), default_value.clone());
            }
        }
    }
}

fn merge_settings(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(target_obj), Value::Object(incoming_obj)) => {
            for (key, value) in incoming_obj {
                if let Some(existing) = target_obj.get_mut(key) {
                    merge_settings(existing, value);
                } else {
                    target_obj.insert(key.clone(), value.clone());
                }
            }
        }
        (target_slot, incoming_value) => {
            *target_slot = incoming_value.clone();
        }
    }
}

fn sanitize_settings(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };

    clamp_u64(obj, "batchSize", 100, 10_000, 1000);
    clamp_u64(obj, "cooldownSecs", 60, 86_400, 3600);
    clamp_u64(obj, "sessionMaxAgeDays", 1, 365, 30);
    clamp_u64(obj, "fetchTimeoutSecs", 1, 300, 30);

    sanitize_enum(obj, "logLevel", &["error", "warn", "info", "debug", "trace"], "info");

    let dataset_ok = obj
        .get("dataset")
        .and_then(Value::as_str)
        .is_some_and(is_valid_dataset_name);
    if !dataset_ok {
        obj.insert("dataset".to_string(), json!(DEFAULT_DATASET));
    }
}

fn clamp_u64(map: &mut Map<String, Value>, key: &str, min: u64, max: u64, default: u64) {
    let raw = map.get(key).and_then(Value::as_u64).unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn sanitize_enum(map: &mut Map<String, Value>, key: &str, allowed: &[&str], default: &str) {
    let valid = map
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| allowed.contains(value))
        .unwrap_or(default);
    map.insert(key.to_string(), json!(valid));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_defaults_and_clamps_out_of_range_values() {
        let migrated = migrate_settings(json!({
            "batchSize": 5,
            "cooldownSecs": 999_999,
            "logLevel": "verbose",
            "dataset": "members; drop table sessions"
        }));

        assert_eq!(migrated["batchSize"], json!(100));
        assert_eq!(migrated["cooldownSecs"], json!(86_400));
        assert_eq!(migrated["logLevel"], json!("info"));
        assert_eq!(migrated["dataset"], json!("members"));
        assert_eq!(migrated["sessionMaxAgeDays"], json!(30));
        assert_eq!(migrated["schema_version"], json!(SETTINGS_SCHEMA_VERSION));
    }

    #[test]
    fn non_object_input_falls_back_to_defaults() {
        let migrated = migrate_settings(json!([1, 2, 3]));
        assert_eq!(migrated, migrate_settings(default_settings()));
    }

    #[test]
    fn merges_partial_settings_without_losing_existing_values() {
        let mut existing = default_settings();
        merge_settings(&mut existing, &json!({ "cooldownSecs": 120 }));
        let migrated = migrate_settings(existing);

        assert_eq!(migrated["cooldownSecs"], json!(120));
        assert_eq!(migrated["batchSize"], json!(1000));
    }

    #[test]
    fn effective_settings_convert_units() {
        let effective = effective_from_value(&migrate_settings(json!({
            "sessionMaxAgeDays": 2,
            "fetchTimeoutSecs": 5
        })));

        assert_eq!(effective.dataset, "members");
        assert_eq!(effective.batch_size, 1000);
        assert_eq!(effective.cooldown, Duration::from_secs(3600));
        assert_eq!(effective.session_max_age, Duration::from_secs(2 * 86_400));
        assert_eq!(effective.fetch_timeout, Duration::from_secs(5));
    }
}
