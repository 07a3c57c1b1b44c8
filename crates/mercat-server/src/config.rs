use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::warn;

use mercat_safety::guard::DEFAULT_SEND_TIMEOUT;

const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];
const DEV_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub send_timeout: Duration,
    /// Replaces the built-in Spanish mobile pattern for the send-time scan.
    pub phone_pattern: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("MERCAT_JWT_SECRET").unwrap_or_default();
        let jwt_secret = if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            if cfg!(debug_assertions) {
                warn!("MERCAT_JWT_SECRET is unset or a placeholder; using the development secret");
                DEV_SECRET.to_string()
            } else {
                bail!("MERCAT_JWT_SECRET is unset or still a placeholder. Set it in your .env file and restart.");
            }
        } else {
            jwt_secret
        };

        let port = match get("MERCAT_PORT") {
            Some(raw) => raw.parse().with_context(|| format!("MERCAT_PORT '{}' is not a port", raw))?,
            None => 3000,
        };

        let send_timeout = match get("MERCAT_SEND_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .parse()
                    .with_context(|| format!("MERCAT_SEND_TIMEOUT_SECS '{}' is not a number", raw))?;
                if secs == 0 {
                    bail!("MERCAT_SEND_TIMEOUT_SECS must be at least 1");
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_SEND_TIMEOUT,
        };

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(get("MERCAT_DB_PATH").unwrap_or_else(|| "mercat.db".into())),
            host: get("MERCAT_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            send_timeout,
            phone_pattern: get("MERCAT_PHONE_PATTERN").filter(|p| !p.trim().is_empty()),
        })
    }
}
