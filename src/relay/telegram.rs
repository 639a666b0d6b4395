//! Telegram transport using teloxide.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode};
use tracing::warn;

use crate::relay::message::{Button, InboundMessage, ReplyRef, Sender};
use crate::relay::outbox::Outbox;

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn keyboard(buttons: &[Button]) -> InlineKeyboardMarkup {
    let row = buttons
        .iter()
        .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.action.encode()))
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(vec![row])
}

#[async_trait]
impl Outbox for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64, String> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })
    }

    async fn send_with_buttons(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[Button],
    ) -> Result<i64, String> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .reply_markup(keyboard(buttons))
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| {
                let msg = format!("Failed to send with buttons: {e}");
                warn!("{}", msg);
                msg
            })
    }

    async fn set_buttons(&self, chat_id: i64, message_id: i64, buttons: &[Button]) -> Result<(), String> {
        self.bot
            .edit_message_reply_markup(ChatId(chat_id), MessageId(message_id as i32))
            .reply_markup(keyboard(buttons))
            .await
            .map(|_| ())
            .map_err(|e| format!("Failed to edit buttons: {e}"))
    }
}

/// Convert a teloxide text message into an inbound event.
///
/// Returns `None` for messages without text.
pub fn telegram_to_inbound(msg: &Message) -> Option<InboundMessage> {
    let text = msg.text()?.to_string();

    let sender = msg.from.as_ref().map(|u| Sender {
        id: u.id.0 as i64,
        username: u.username.clone(),
        first_name: Some(u.first_name.clone()).filter(|s| !s.is_empty()),
        last_name: u.last_name.clone(),
    });

    let reply_to = msg.reply_to_message().map(|reply| ReplyRef {
        message_id: reply.id.0 as i64,
        text: reply.text().unwrap_or("").to_string(),
    });

    Some(InboundMessage { sender, text, reply_to })
}
