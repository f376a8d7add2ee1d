use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use ion_gateway::typing::MAX_TYPING_EXPIRY;
use tracing::warn;

const DEFAULT_JWT_SECRET: &str = "dev-secret-change-me";

/// Server settings, read from `ION_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub token_ttl: chrono::Duration,
    pub typing_expiry: Duration,
    pub cookie_secure: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unset keys take their
    /// defaults; set but unparsable values are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = match lookup("ION_JWT_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("ION_JWT_SECRET is not set, using the development secret");
                DEFAULT_JWT_SECRET.to_string()
            }
        };

        let ttl_days: i64 = parse_or(&lookup, "ION_TOKEN_TTL_DAYS", 7)?;
        if ttl_days <= 0 {
            anyhow::bail!("ION_TOKEN_TTL_DAYS must be positive, got {}", ttl_days);
        }
        let typing_secs: u64 = parse_or(&lookup, "ION_TYPING_EXPIRY_SECS", 5)?;
        let max_typing_secs = MAX_TYPING_EXPIRY.as_secs();
        if !(1..=max_typing_secs).contains(&typing_secs) {
            anyhow::bail!(
                "ION_TYPING_EXPIRY_SECS must be between 1 and {}, got {}",
                max_typing_secs,
                typing_secs
            );
        }

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(lookup("ION_DB_PATH").unwrap_or_else(|| "ion.db".into())),
            host: lookup("ION_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "ION_PORT", 3000)?,
            token_ttl: chrono::Duration::days(ttl_days),
            typing_expiry: Duration::from_secs(typing_secs),
            cookie_secure: parse_or(&lookup, "ION_COOKIE_SECURE", false)?,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let c = config(&[]).unwrap();
        assert_eq!(c.jwt_secret, DEFAULT_JWT_SECRET);
        assert_eq!(c.db_path, PathBuf::from("ion.db"));
        assert_eq!(c.addr().unwrap(), "0.0.0.0:3000".parse().unwrap());
        assert_eq!(c.token_ttl, chrono::Duration::days(7));
        assert_eq!(c.typing_expiry, Duration::from_secs(5));
        assert!(!c.cookie_secure);
    }

    #[test]
    fn values_are_read_from_the_environment() {
        let c = config(&[
            ("ION_JWT_SECRET", "s3cret"),
            ("ION_PORT", "8080"),
            ("ION_HOST", "127.0.0.1"),
            ("ION_TOKEN_TTL_DAYS", "1"),
            ("ION_COOKIE_SECURE", "true"),
        ])
        .unwrap();
        assert_eq!(c.jwt_secret, "s3cret");
        assert_eq!(c.addr().unwrap(), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(c.token_ttl, chrono::Duration::days(1));
        assert!(c.cookie_secure);
    }

    #[test]
    fn invalid_numbers_are_startup_errors() {
        assert!(config(&[("ION_PORT", "eighty")]).is_err());
        assert!(config(&[("ION_TOKEN_TTL_DAYS", "0")]).is_err());
        assert!(config(&[("ION_TYPING_EXPIRY_SECS", "-1")]).is_err());
    }

    #[test]
    fn typing_window_must_stay_in_range() {
        assert!(config(&[("ION_TYPING_EXPIRY_SECS", "0")]).is_err());
        assert!(config(&[("ION_TYPING_EXPIRY_SECS", "301")]).is_err());
        assert!(config(&[("ION_TYPING_EXPIRY_SECS", &u64::MAX.to_string())]).is_err());

        let c = config(&[("ION_TYPING_EXPIRY_SECS", "300")]).unwrap();
        assert_eq!(c.typing_expiry, MAX_TYPING_EXPIRY);
        let c = config(&[("ION_TYPING_EXPIRY_SECS", "1")]).unwrap();
        assert_eq!(c.typing_expiry, Duration::from_secs(1));
    }
}
