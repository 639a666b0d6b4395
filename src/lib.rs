//! Feedback relay bot: users write to the bot, the administrator answers.

pub mod chat_log;
pub mod config;
pub mod relay;
