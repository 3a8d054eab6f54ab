use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Runtime configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    /// Token signing secret. Required; there is no production default.
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub jwt_expires_secs: i64,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;

        let jwt_expires_secs = match env::var("JWT_EXPIRES_SECS") {
            Ok(s) => s
                .parse()
                .context("JWT_EXPIRES_SECS must be an integer number of seconds")?,
            Err(_) => 3600,
        };

        Ok(Self {
            database_path: env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("hour_bank.db")),
            jwt_secret,
            jwt_expires_secs,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env vars are process-global, so the from_env cases run as one test.
    #[test]
    fn test_from_env() {
        env::remove_var("JWT_SECRET");
        env::remove_var("JWT_EXPIRES_SECS");
        env::remove_var("DATABASE_PATH");
        env::remove_var("BIND_ADDR");

        assert!(Config::from_env().is_err(), "secret must be required");

        env::set_var("JWT_SECRET", "test-secret");
        let config = Config::from_env().unwrap();
        assert_eq!(config.jwt_expires_secs, 3600);
        assert_eq!(config.database_path, PathBuf::from("hour_bank.db"));
        assert_eq!(config.bind_addr, "0.0.0.0:3000");

        env::set_var("JWT_EXPIRES_SECS", "120");
        env::set_var("DATABASE_PATH", "/tmp/hb.db");
        let config = Config::from_env().unwrap();
        assert_eq!(config.jwt_expires_secs, 120);
        assert_eq!(config.database_path, PathBuf::from("/tmp/hb.db"));

        env::set_var("JWT_EXPIRES_SECS", "not-a-number");
        assert!(Config::from_env().is_err());

        env::remove_var("JWT_SECRET");
        env::remove_var("JWT_EXPIRES_SECS");
        env::remove_var("DATABASE_PATH");
    }
}
