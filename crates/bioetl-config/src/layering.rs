//! Layered configuration loading with source attribution.
//!
//! Merge order, lowest to highest: built-in defaults → YAML profile →
//! environment overrides (`BIOETL_A__B__C=value`) → CLI overrides
//! (`--set a.b.c=value`). The merged tree deserializes with
//! `deny_unknown_fields`, so an unknown key at any layer is a hard error,
//! and `AppConfig::validate` rejects out-of-range values afterwards.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::Value as Json;
use tracing::debug;

use bioetl_util::canonical::{sha256_hex_str, to_canonical_json};
use bioetl_util::error::ConfigError;

use crate::model::AppConfig;

/// Where a configuration key's effective value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    Profile,
    Env,
    Cli,
}

/// Loading inputs.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Optional YAML profile path.
    pub profile: Option<String>,
    /// Repeatable `--set key.path=value` overrides, highest precedence.
    pub overrides: Vec<String>,
    /// Environment prefix; `BIOETL` unless a test injects its own map.
    pub env: Option<Vec<(String, String)>>,
}

/// The resolved configuration plus provenance and fingerprint.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: AppConfig,
    /// Per-key provenance for keys that were overridden.
    pub attribution: BTreeMap<String, ConfigSource>,
    /// SHA-256 of the canonical JSON of the resolved configuration.
    pub fingerprint: String,
}

/// Load and validate configuration from all layers.
///
/// # Errors
///
/// `ConfigError` on unreadable profile, unknown key, unparseable value, or
/// out-of-range value.
pub fn load(opts: &LoadOptions) -> Result<ResolvedConfig, ConfigError> {
    let mut tree = serde_json::to_value(AppConfig::default()).map_err(|e| ConfigError::Parse {
        reason: format!("defaults did not serialize: {e}"),
    })?;
    let mut attribution: BTreeMap<String, ConfigSource> = BTreeMap::new();

    if let Some(path) = &opts.profile {
        let profile = load_profile(Path::new(path))?;
        record_leaf_paths(&profile, String::new(), ConfigSource::Profile, &mut attribution);
        deep_merge(&mut tree, profile);
    }

    let env_pairs = match &opts.env {
        Some(pairs) => pairs.clone(),
        None => std::env::vars()
            .filter(|(k, _)| k.starts_with("BIOETL_") && k != "BIOETL_LOG" && k != "BIOETL_COMMIT")
            .collect(),
    };
    for (key, raw) in env_pairs {
        let path = env_key_to_path(&key);
        if path.is_empty() {
            continue;
        }
        debug!(key = %key, "applying environment override");
        set_path(&mut tree, &path, coerce_scalar(&raw))?;
        attribution.insert(path.join("."), ConfigSource::Env);
    }

    for entry in &opts.overrides {
        let (path, raw) = split_override(entry)?;
        set_path(&mut tree, &path, coerce_scalar(&raw))?;
        attribution.insert(path.join("."), ConfigSource::Cli);
    }

    let config: AppConfig = serde_json::from_value(tree).map_err(map_deser_error)?;
    config.validate()?;

    let fingerprint = fingerprint(&config)?;

    Ok(ResolvedConfig {
        config,
        attribution,
        fingerprint,
    })
}

/// SHA-256 fingerprint of a configuration's canonical JSON.
pub fn fingerprint(config: &AppConfig) -> Result<String, ConfigError> {
    let canonical = to_canonical_json(config).map_err(|e| ConfigError::Parse {
        reason: format!("failed to canonicalize configuration: {e}"),
    })?;
    Ok(sha256_hex_str(&canonical))
}

fn load_profile(path: &Path) -> Result<Json, ConfigError> {
    let text = fs::read_to_string(path).map_err(|_| ConfigError::ProfileNotFound {
        path: path.display().to_string(),
    })?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
        reason: format!("profile {}: {e}", path.display()),
    })?;
    serde_json::to_value(yaml).map_err(|e| ConfigError::Parse {
        reason: format!("profile {}: {e}", path.display()),
    })
}

/// Merge `overlay` into `base`. Objects merge recursively; scalars and
/// arrays replace wholesale.
fn deep_merge(base: &mut Json, overlay: Json) {
    match (base, overlay) {
        (Json::Object(base_map), Json::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        // Unknown key: keep it so deserialization rejects it
                        // with the precise path.
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn record_leaf_paths(
    value: &Json,
    prefix: String,
    source: ConfigSource,
    attribution: &mut BTreeMap<String, ConfigSource>,
) {
    match value {
        Json::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                record_leaf_paths(child, path, source, attribution);
            }
        }
        _ => {
            attribution.insert(prefix, source);
        }
    }
}

/// `BIOETL_SOURCES__CHEMBL__API_KEY` → `["sources", "chembl", "api_key"]`.
fn env_key_to_path(key: &str) -> Vec<String> {
    key.trim_start_matches("BIOETL_")
        .split("__")
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase())
        .collect()
}

fn split_override(entry: &str) -> Result<(Vec<String>, String), ConfigError> {
    let Some((path, value)) = entry.split_once('=') else {
        return Err(ConfigError::InvalidValue {
            key: entry.to_string(),
            reason: "override must be key.path=value".into(),
        });
    };
    let segments: Vec<String> = path.split('.').map(|s| s.trim().to_string()).collect();
    if segments.iter().any(String::is_empty) {
        return Err(ConfigError::InvalidValue {
            key: entry.to_string(),
            reason: "empty path segment".into(),
        });
    }
    Ok((segments, value.to_string()))
}

fn set_path(tree: &mut Json, path: &[String], value: Json) -> Result<(), ConfigError> {
    let mut cursor = tree;
    for segment in &path[..path.len() - 1] {
        cursor = cursor
            .as_object_mut()
            .ok_or_else(|| ConfigError::UnknownKey {
                key: path.join("."),
            })?
            .entry(segment.clone())
            .or_insert_with(|| Json::Object(serde_json::Map::new()));
    }
    let map = cursor
        .as_object_mut()
        .ok_or_else(|| ConfigError::UnknownKey {
            key: path.join("."),
        })?;
    map.insert(path[path.len() - 1].clone(), value);
    Ok(())
}

/// Coerce a raw override string: JSON literal when it parses (covers bool,
/// number, array, null, quoted string), bare string otherwise.
fn coerce_scalar(raw: &str) -> Json {
    serde_json::from_str::<Json>(raw).unwrap_or_else(|_| Json::String(raw.to_string()))
}

fn map_deser_error(err: serde_json::Error) -> ConfigError {
    let message = err.to_string();
    if let Some(rest) = message.strip_prefix("unknown field `") {
        if let Some(field) = rest.split('`').next() {
            return ConfigError::UnknownKey {
                key: field.to_string(),
            };
        }
    }
    ConfigError::Parse { reason: message }
}
