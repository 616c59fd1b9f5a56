//! lp-config
//!
//! Layered configuration. Layers merge in order, later wins:
//!
//! 1. built-in defaults ([`AppConfig::default`])
//! 2. YAML documents (usually one file passed with `--config`)
//! 3. environment: `RUN_ADDRESS`, `ACCRUAL_SYSTEM_ADDRESS`, `DATABASE_URI`, `LOG_LEVEL`
//! 4. command-line flags ([`Overrides`])
//!
//! The merged tree is checked for secret-looking literals, canonicalised,
//! hashed (sha256) and only then deserialised into [`AppConfig`].

mod secrets;
mod settings;

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub use secrets::{resolve_secrets, ResolvedSecrets};
pub use settings::{
    AccrualSettings, AppConfig, AuthSettings, DatabaseSettings, LogSettings, ReconcileSettings,
    ServerSettings,
};

pub const ENV_RUN_ADDRESS: &str = "RUN_ADDRESS";
pub const ENV_ACCRUAL_ADDRESS: &str = "ACCRUAL_SYSTEM_ADDRESS";
pub const ENV_DATABASE_URI: &str = "DATABASE_URI";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

/// Known secret-like prefixes. A leaf string starting with one of these
/// aborts loading with CONFIG_SECRET_DETECTED.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "gho_",
    "glpat-",
    "xoxb-",
    "xoxp-",
];

/// Values supplied on the command line. `None` leaves the lower layer alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub run_address: Option<String>,
    pub accrual_address: Option<String>,
    pub database_uri: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub settings: AppConfig,
}

/// Read `path` (if any) and run [`load_layered`].
pub fn load_from_path(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
    overrides: &Overrides,
) -> Result<LoadedConfig> {
    let raw = match path {
        Some(p) => Some(
            fs::read_to_string(p)
                .with_context(|| format!("failed to read yaml path: {}", p.display()))?,
        ),
        None => None,
    };
    let docs: Vec<&str> = raw.iter().map(|s| s.as_str()).collect();
    load_layered(&docs, env, overrides)
}

/// Merge defaults, `yaml_docs`, the environment and `overrides`.
pub fn load_layered(
    yaml_docs: &[&str],
    env: impl Fn(&str) -> Option<String>,
    overrides: &Overrides,
) -> Result<LoadedConfig> {
    let mut merged =
        serde_json::to_value(AppConfig::default()).context("defaults->json conversion failed")?;

    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        // An empty file parses as null; treat it as "no overrides".
        if v_yaml.is_null() {
            continue;
        }
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        if !v_json.is_object() {
            bail!("CONFIG_INVALID top-level yaml must be a mapping");
        }
        merged = deep_merge(merged, v_json);
    }

    merged = deep_merge(merged, env_layer(&env));
    merged = deep_merge(merged, overrides_layer(overrides));

    enforce_no_secret_literals(&merged)?;

    let canonical_json = serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = sha256_hex(canonical_json.as_bytes());

    let settings: AppConfig = serde_json::from_value(merged)
        .context("CONFIG_INVALID merged config does not match schema")?;
    settings.validate()?;

    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        settings,
    })
}

fn env_layer(env: &impl Fn(&str) -> Option<String>) -> Value {
    let mut root = Value::Object(Map::new());
    let pairs = [
        (ENV_RUN_ADDRESS, "server", "address"),
        (ENV_ACCRUAL_ADDRESS, "accrual", "address"),
        (ENV_DATABASE_URI, "database", "uri"),
        (ENV_LOG_LEVEL, "log", "level"),
    ];
    for (var, section, key) in pairs {
        if let Some(v) = env(var).filter(|v| !v.is_empty()) {
            set_leaf(&mut root, section, key, v);
        }
    }
    root
}

fn overrides_layer(o: &Overrides) -> Value {
    let mut root = Value::Object(Map::new());
    let pairs = [
        (&o.run_address, "server", "address"),
        (&o.accrual_address, "accrual", "address"),
        (&o.database_uri, "database", "uri"),
        (&o.log_level, "log", "level"),
    ];
    for (v, section, key) in pairs {
        if let Some(v) = v.as_ref().filter(|v| !v.is_empty()) {
            set_leaf(&mut root, section, key, v.clone());
        }
    }
    root
}

fn set_leaf(root: &mut Value, section: &str, key: &str, value: String) {
    if let Value::Object(map) = root {
        let entry = map
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(inner) = entry {
            inner.insert(key.to_string(), Value::String(value));
        }
    }
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_string_leaves(v, "", &mut leaves);
    for (ptr, s) in leaves {
        if looks_like_secret(s) {
            bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
        }
    }
    Ok(())
}

fn collect_string_leaves<'a>(v: &'a Value, prefix: &str, out: &mut Vec<(String, &'a str)>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map {
                let next = format!("{}/{}", prefix, k.replace('~', "~0").replace('/', "~1"));
                collect_string_leaves(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                collect_string_leaves(vv, &format!("{prefix}/{i}"), out);
            }
        }
        Value::String(s) => out.push((prefix.to_string(), s.as_str())),
        _ => {}
    }
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}
