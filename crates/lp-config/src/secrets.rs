//! Runtime secret resolution.
//!
//! # Contract
//! - Config stores only env var NAMES (`auth.jwt_secret_env`).
//! - The daemon calls [`resolve_secrets`] once at startup and passes the
//!   result into constructors.
//! - `Debug` redacts values; errors name the variable, never its value.

use anyhow::{bail, Result};

use crate::AppConfig;

/// Secrets resolved from the environment. **Values are redacted in `Debug`.**
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// HS256 signing key for access tokens.
    pub jwt_secret: String,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("jwt_secret", &"<REDACTED>")
            .finish()
    }
}

/// Resolve every secret named by `cfg`.
///
/// `lookup` is `std::env::var(..).ok()` in production and a map in tests.
/// A missing or blank JWT secret is fatal: the daemon must not mint tokens
/// with a guessable key.
pub fn resolve_secrets(
    cfg: &AppConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedSecrets> {
    let name = cfg.auth.jwt_secret_env.trim();
    if name.is_empty() {
        bail!("CONFIG_INVALID auth.jwt_secret_env must name an env var");
    }
    let jwt_secret = match lookup(name) {
        Some(v) if !v.trim().is_empty() => v,
        _ => bail!("SECRET_MISSING env var {name} is not set or empty"),
    };
    Ok(ResolvedSecrets { jwt_secret })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_the_value() {
        let s = ResolvedSecrets {
            jwt_secret: "super-secret-value".into(),
        };
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("super-secret-value"));
        assert!(dbg.contains("REDACTED"));
    }

    #[test]
    fn missing_secret_names_the_variable() {
        let cfg = AppConfig::default();
        let err = resolve_secrets(&cfg, |_| None).unwrap_err().to_string();
        assert!(err.contains("JWT_SECRET"), "{err}");

        let err = resolve_secrets(&cfg, |_| Some("   ".into()))
            .unwrap_err()
            .to_string();
        assert!(err.contains("SECRET_MISSING"), "{err}");
    }

    #[test]
    fn resolves_from_the_configured_name() {
        let mut cfg = AppConfig::default();
        cfg.auth.jwt_secret_env = "LP_JWT".into();
        let s = resolve_secrets(&cfg, |k| (k == "LP_JWT").then(|| "k3y".to_string())).unwrap();
        assert_eq!(s.jwt_secret, "k3y");
    }
}
