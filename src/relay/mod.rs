//! Feedback relay - stores user messages, forwards them to the admin and
//! applies the admin's replies and moderation actions.

pub mod commands;
pub mod database;
pub mod engine;
pub mod error;
pub mod message;
pub mod outbox;
pub mod render;
pub mod telegram;


pub use database::Database;
pub use engine::{Classification, RelayConfig, RelayEngine, ReplyTarget};
pub use error::RelayError;
pub use message::{InboundMessage, ReplyRef, Sender};
pub use outbox::Outbox;
pub use telegram::{TelegramClient, telegram_to_inbound};
