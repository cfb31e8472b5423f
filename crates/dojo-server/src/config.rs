use std::path::PathBuf;

use anyhow::{Context, Result};

/// Process configuration, read from the environment exactly once at
/// startup and passed by reference from then on.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub media_dir: PathBuf,
    pub bot_token: String,
    /// Replay budget for the init-data `auth_date` field.
    pub auth_max_age_secs: i64,
    /// Chat that receives mastery applications, plus an optional forum
    /// topic within it.
    pub moderation_chat_id: String,
    pub moderation_topic_id: Option<String>,
    /// Browser origins allowed by CORS; empty means allow any (dev).
    pub allowed_origins: Vec<String>,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port: u16 = env_or("DOJO_PORT", "3000")
            .parse()
            .context("DOJO_PORT must be a port number")?;
        let auth_max_age_secs: i64 = env_or("DOJO_AUTH_MAX_AGE_SECS", "86400")
            .parse()
            .context("DOJO_AUTH_MAX_AGE_SECS must be an integer")?;

        let allowed_origins = env_or("DOJO_ALLOWED_ORIGINS", "")
            .split(',')
            .map(|o| o.trim().trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .collect();

        Ok(Self {
            host: env_or("DOJO_HOST", "0.0.0.0"),
            port,
            db_path: env_or("DOJO_DB_PATH", "dojo.db").into(),
            media_dir: env_or("DOJO_MEDIA_DIR", "./media").into(),
            bot_token: std::env::var("DOJO_BOT_TOKEN").unwrap_or_default(),
            auth_max_age_secs,
            moderation_chat_id: env_or("DOJO_MODERATION_CHAT_ID", ""),
            moderation_topic_id: std::env::var("DOJO_MODERATION_TOPIC_ID").ok(),
            allowed_origins,
        })
    }
}
