//! Scenario: config hash stability.
//!
//! # Invariant under test
//! The hash logged at boot identifies the effective configuration: same
//! effective values give the same hash regardless of key order or which layer
//! supplied them; any changed value changes it.

use lp_config::{load_layered, Overrides};

const A: &str = r#"
accrual:
  address: "http://accrual:9000"
  retry_count: 4
reconcile:
  page_size: 20
"#;

const A_REORDERED: &str = r#"
reconcile:
  page_size: 20
accrual:
  retry_count: 4
  address: "http://accrual:9000"
"#;

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn same_input_same_hash() {
    let a = load_layered(&[A], no_env, &Overrides::default()).unwrap();
    let b = load_layered(&[A], no_env, &Overrides::default()).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
    assert_eq!(a.config_hash.len(), 64, "sha256 hex");
}

#[test]
fn key_order_does_not_matter() {
    let a = load_layered(&[A], no_env, &Overrides::default()).unwrap();
    let b = load_layered(&[A_REORDERED], no_env, &Overrides::default()).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn value_source_does_not_matter() {
    let from_yaml = load_layered(
        &["accrual:\n  address: \"http://x:1\"\n"],
        no_env,
        &Overrides::default(),
    )
    .unwrap();
    let from_flag = load_layered(
        &[],
        no_env,
        &Overrides {
            accrual_address: Some("http://x:1".into()),
            ..Overrides::default()
        },
    )
    .unwrap();
    assert_eq!(from_yaml.config_hash, from_flag.config_hash);
}

#[test]
fn different_values_different_hash() {
    let a = load_layered(&[A], no_env, &Overrides::default()).unwrap();
    let b = load_layered(
        &[A, "reconcile:\n  page_size: 21\n"],
        no_env,
        &Overrides::default(),
    )
    .unwrap();
    assert_ne!(a.config_hash, b.config_hash);
}
