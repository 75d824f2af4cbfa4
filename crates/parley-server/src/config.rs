use std::path::PathBuf;

use anyhow::{Context, bail};

use parley_sync::SyncConfig;
use parley_sync::store::MAX_PAGE_SIZE;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub sync: SyncConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = var("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port: u16 = var("PARLEY_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("PARLEY_PORT is not a port number")?;

        let mut sync = SyncConfig::default();
        if let Some(size) = var("PARLEY_PAGE_SIZE") {
            sync.page_size = size.parse().context("PARLEY_PAGE_SIZE is not a number")?;
            if !(1..=MAX_PAGE_SIZE).contains(&sync.page_size) {
                bail!("PARLEY_PAGE_SIZE must be between 1 and {}", MAX_PAGE_SIZE);
            }
        }
        if let Some(slug) = var("PARLEY_DEFAULT_CHANNEL").filter(|s| !s.trim().is_empty()) {
            sync.default_channel_slug = slug.trim().to_string();
        }

        Ok(Self {
            jwt_secret,
            db_path: var("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()).into(),
            host: var("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            sync,
        })
    }
}
