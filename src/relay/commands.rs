//! Slash-command parsing and argument validation.

use regex::Regex;
use std::sync::LazyLock;

use crate::relay::error::{RelayError, Result};

/// Prefix that marks a message as a command.
pub const COMMAND_PREFIX: char = '/';

static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^/([A-Za-z0-9_]+)(?:@[A-Za-z0-9_]+)?(?:\s+(.*))?$")
        .expect("command pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandName {
    Start,
    Help,
    Feedback,
    Admin,
    Ban,
    Unban,
    Process,
    FeedbackList,
    BannedUsers,
    Stats,
    Unknown(String),
}

impl CommandName {
    fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "help" => Self::Help,
            "feedback" => Self::Feedback,
            "admin" => Self::Admin,
            "ban" => Self::Ban,
            "unban" => Self::Unban,
            "process" => Self::Process,
            "feedback_list" => Self::FeedbackList,
            "banned_users" => Self::BannedUsers,
            "stats" => Self::Stats,
            _ => Self::Unknown(name.to_string()),
        }
    }

    /// Commands only the administrator may run.
    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            Self::Admin
                | Self::Ban
                | Self::Unban
                | Self::Process
                | Self::FeedbackList
                | Self::BannedUsers
                | Self::Stats
        )
    }

    pub fn usage(&self) -> &'static str {
        match self {
            Self::Ban => "/ban <user_id>",
            Self::Unban => "/unban <user_id>",
            Self::Process => "/process <feedback_id>",
            Self::FeedbackList => "/feedback_list [page]",
            _ => "/help",
        }
    }
}

/// A parsed command with its raw argument string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: CommandName,
    pub args: String,
}

impl Command {
    /// Parse `/name[@bot] [args]`. Returns `None` for non-command text.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with(COMMAND_PREFIX) {
            return None;
        }
        let Some(caps) = COMMAND_RE.captures(text) else {
            // A bare "/" or "/ something" is still a command, just not one we know.
            return Some(Self { name: CommandName::Unknown(text.to_string()), args: String::new() });
        };
        let name = CommandName::parse(&caps[1]);
        let args = caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
        Some(Self { name, args })
    }

    /// First argument as an id; usage hint on failure.
    pub fn id_arg(&self) -> Result<i64> {
        self.args
            .split_whitespace()
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(RelayError::Validation { usage: self.name.usage() })
    }

    /// Optional 1-based page number; defaults to 1.
    pub fn page_arg(&self) -> Result<usize> {
        match self.args.split_whitespace().next() {
            None => Ok(1),
            Some(s) => match s.parse::<usize>() {
                Ok(page) if page >= 1 => Ok(page),
                _ => Err(RelayError::Validation { usage: self.name.usage() }),
            },
        }
    }
}
