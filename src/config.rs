use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use teloxide::types::{ChatId, UserId};

/// Environment variable consulted when the config file has no token.
pub const TOKEN_ENV: &str = "BOT_TOKEN";

const DEFAULT_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 50;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    /// Falls back to the BOT_TOKEN environment variable when absent.
    #[serde(default)]
    telegram_bot_token: Option<String>,
    admin_user_id: i64,
    /// Directory for the database and logs. Defaults to current directory.
    data_dir: Option<String>,
    /// SQLite file. Defaults to `<data_dir>/feedback.db`.
    database_path: Option<String>,
    /// Chat that receives WARN/ERROR log lines.
    log_chat_id: Option<i64>,
    #[serde(default = "default_page_size")]
    feedback_page_size: usize,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

pub struct Config {
    pub telegram_bot_token: String,
    /// The single administrator receiving feedback.
    pub admin_user_id: UserId,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub log_chat_id: Option<ChatId>,
    pub feedback_page_size: usize,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env_token(path, std::env::var(TOKEN_ENV).ok())
    }

    fn load_with_env_token<P: AsRef<Path>>(path: P, env_token: Option<String>) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        let telegram_bot_token = file
            .telegram_bot_token
            .filter(|t| !t.is_empty())
            .or(env_token.filter(|t| !t.is_empty()))
            .ok_or_else(|| {
                ConfigError::Validation(format!("telegram_bot_token is required (or set {TOKEN_ENV})"))
            })?;
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }

        if file.admin_user_id <= 0 {
            return Err(ConfigError::Validation("admin_user_id must be a positive user ID".into()));
        }

        if file.feedback_page_size == 0 || file.feedback_page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Validation(format!(
                "feedback_page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let database_path = file
            .database_path
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("feedback.db"));

        Ok(Self {
            telegram_bot_token,
            admin_user_id: UserId(file.admin_user_id as u64),
            data_dir,
            database_path,
            log_chat_id: file.log_chat_id.map(ChatId),
            feedback_page_size: file.feedback_page_size,
        })
    }
}
