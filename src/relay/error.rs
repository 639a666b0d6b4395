//! Error taxonomy for relay and moderation operations.

use std::fmt;

/// What a moderation action referenced but could not find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    User(i64),
    Feedback(i64),
    /// No unprocessed feedback left for this user.
    OpenFeedback(i64),
}

/// Errors produced by the relay core.
#[derive(Debug)]
pub enum RelayError {
    /// A non-admin invoked an admin-only action.
    Unauthorized,
    /// Unknown user or feedback id.
    NotFound(Missing),
    /// The administrator tried to ban themselves.
    AdminBan,
    /// Malformed command arguments.
    Validation { usage: &'static str },
    /// Underlying SQLite failure.
    Storage(rusqlite::Error),
    /// The transport refused an outbound message.
    Delivery(String),
}

impl RelayError {
    /// Text shown to whoever triggered the failed operation.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized => "❌ You don't have administrator rights.".to_string(),
            Self::NotFound(Missing::User(id)) => format!("❌ User {id} not found."),
            Self::NotFound(Missing::Feedback(id)) => format!("❌ Feedback #{id} not found."),
            Self::NotFound(Missing::OpenFeedback(id)) => {
                format!("❌ No unprocessed feedback from user {id}.")
            }
            Self::AdminBan => "❌ The administrator cannot be banned.".to_string(),
            Self::Validation { usage } => format!("❌ Usage: {usage}"),
            Self::Storage(_) | Self::Delivery(_) => {
                "❌ Something went wrong. Please try again later.".to_string()
            }
        }
    }

    /// Whether this error is an operational fault worth logging at error level.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Delivery(_))
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "sender is not the administrator"),
            Self::NotFound(Missing::User(id)) => write!(f, "user {id} not found"),
            Self::NotFound(Missing::Feedback(id)) => write!(f, "feedback {id} not found"),
            Self::NotFound(Missing::OpenFeedback(id)) => {
                write!(f, "no unprocessed feedback for user {id}")
            }
            Self::AdminBan => write!(f, "refusing to ban the administrator"),
            Self::Validation { usage } => write!(f, "invalid arguments, usage: {usage}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Delivery(msg) => write!(f, "delivery error: {msg}"),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(source) => Some(source),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for RelayError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e)
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
