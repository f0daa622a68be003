use anyhow::{bail, Context, Result};
use std::env;

use crate::crypto::Crypto;

pub const DEFAULT_DATABASE_URL: &str = "./market.db";
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub server_addr: String,
    pub token_secret: Vec<u8>,
    pub token_ttl_secs: i64,
}

impl Config {
    /// Reads the process environment. Call `dotenv()` first to pick up a
    /// `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let server_addr = lookup("SERVER_PORT").unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string());

        let token_secret = match lookup("TOKEN_SECRET") {
            Some(secret) if !secret.is_empty() => secret.into_bytes(),
            _ => {
                log::warn!("TOKEN_SECRET is not set; sessions will not survive a restart");
                Crypto::new().random_secret(32)?
            }
        };

        let token_ttl_secs = match lookup("TOKEN_TTL_SECS") {
            Some(raw) => {
                let ttl = raw
                    .trim()
                    .parse::<i64>()
                    .with_context(|| format!("TOKEN_TTL_SECS is not an integer: {:?}", raw))?;
                if ttl <= 0 {
                    bail!("TOKEN_TTL_SECS must be positive, got {}", ttl);
                }
                ttl
            }
            None => DEFAULT_TOKEN_TTL_SECS,
        };

        Ok(Config {
            database_url,
            server_addr,
            token_secret,
            token_ttl_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.server_addr, DEFAULT_SERVER_ADDR);
        assert_eq!(config.token_ttl_secs, DEFAULT_TOKEN_TTL_SECS);
        assert_eq!(config.token_secret.len(), 32);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "/tmp/market-test.db"),
            ("SERVER_PORT", "0.0.0.0:9000"),
            ("TOKEN_SECRET", "s3cret"),
            ("TOKEN_TTL_SECS", "60"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "/tmp/market-test.db");
        assert_eq!(config.server_addr, "0.0.0.0:9000");
        assert_eq!(config.token_secret, b"s3cret".to_vec());
        assert_eq!(config.token_ttl_secs, 60);
    }

    #[test]
    fn test_invalid_ttl() {
        assert!(Config::from_lookup(lookup_from(&[("TOKEN_TTL_SECS", "soon")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("TOKEN_TTL_SECS", "-5")])).is_err());
    }
}
