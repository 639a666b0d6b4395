//! Text templates sent through the transport.
//!
//! Everything is rendered as Telegram HTML, so any user-controlled content
//! passes through [`html_escape`] first.

use chrono::{DateTime, Utc};

use crate::relay::database::{FeedbackItem, Stats, User};

/// Escape `<`, `>` and `&` for Telegram's HTML parse mode.
pub fn html_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            _ => result.push(c),
        }
    }
    result
}

fn format_date(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

pub fn welcome() -> String {
    "👋 Welcome to the feedback bot!\n\n\
     📝 Send your message and it will be forwarded to the administrator.\n\
     🔧 Commands:\n\
     /help - show help\n\
     /feedback - how to send feedback"
        .to_string()
}

pub fn help() -> String {
    "📋 <b>Help</b>\n\n\
     📝 To send feedback just write a message to this bot.\n\
     🔧 Commands:\n\
     /start - start using the bot\n\
     /help - show this help\n\
     /feedback - how to send feedback\n\n\
     ❓ Questions and suggestions are welcome, just write them here!"
        .to_string()
}

pub fn feedback_hint() -> String {
    "📝 Send your feedback as a regular message.\n\n\
     You can write about:\n\
     • ideas for improvement\n\
     • bug reports\n\
     • reviews\n\
     • anything else\n\n\
     Just type it in your next message."
        .to_string()
}

pub fn admin_panel() -> String {
    "🔧 <b>Admin panel</b>\n\n\
     /ban &lt;user_id&gt; - ban a user\n\
     /unban &lt;user_id&gt; - unban a user\n\
     /process &lt;feedback_id&gt; - mark feedback processed\n\
     /feedback_list [page] - recent feedback\n\
     /banned_users - banned users\n\
     /stats - statistics\n\n\
     Reply to a feedback notification to answer its author."
        .to_string()
}

pub fn unknown_command() -> String {
    "❓ Unknown command. See /help.".to_string()
}

pub fn banned_notice() -> String {
    "❌ You are banned and cannot use this bot.".to_string()
}

pub fn feedback_received() -> String {
    "✅ Your message has been forwarded to the administrator!\n\nThank you for your feedback 🙏"
        .to_string()
}

/// Marker the admin notification carries so its author can be recovered.
pub fn sender_marker(user_id: i64) -> String {
    format!("(ID: {user_id})")
}

pub fn notification(feedback_id: i64, sender_name: &str, user_id: i64, at: &DateTime<Utc>, text: &str) -> String {
    format!(
        "📝 <b>New feedback #{feedback_id}</b>\n\n\
         👤 From: {} {}\n\
         📅 Date: {}\n\n\
         {}\n\n\
         <i>Reply to this message to answer.</i>",
        html_escape(sender_name),
        sender_marker(user_id),
        format_date(at),
        html_escape(text),
    )
}

/// What the end user sees when the admin answers.
pub fn admin_reply(text: &str) -> String {
    format!("💬 Reply: {}", html_escape(text))
}

pub fn reply_delivered(user_id: i64, feedback_id: i64) -> String {
    format!("✅ Reply sent to user {user_id}, feedback #{feedback_id} marked processed.")
}

pub fn banned(user_id: i64) -> String {
    format!("✅ User {user_id} banned.")
}

pub fn unbanned(user_id: i64) -> String {
    format!("✅ User {user_id} unbanned.")
}

pub fn processed(feedback_id: i64) -> String {
    format!("✅ Feedback #{feedback_id} marked processed.")
}

pub const BUTTON_PROCESS: &str = "✅ Processed";
pub const BUTTON_BAN: &str = "🚫 Ban";
pub const BUTTON_DONE_PROCESSED: &str = "✔️ Processed";
pub const BUTTON_DONE_BANNED: &str = "⛔ Author banned";

pub fn feedback_list(items: &[(FeedbackItem, String)], page: usize) -> String {
    if items.is_empty() {
        return if page == 1 {
            "📝 No feedback yet.".to_string()
        } else {
            format!("📝 Page {page} is empty.")
        };
    }

    let mut message = format!("📝 <b>Recent feedback</b> (page {page})\n\n");
    for (item, name) in items {
        message.push_str(&format!("🆔 ID: {}\n", item.id));
        message.push_str(&format!("👤 From: {} {}\n", html_escape(name), sender_marker(item.user_id)));
        message.push_str(&format!("📅 Date: {}\n", format_date(&item.created_at)));
        message.push_str(&format!("📝 Message: {}\n", html_escape(&item.message)));
        message.push_str(&format!(
            "✅ Processed: {}\n\n",
            if item.is_processed { "yes" } else { "no" }
        ));
    }
    message
}

pub fn banned_users(users: &[User]) -> String {
    if users.is_empty() {
        return "✅ No banned users.".to_string();
    }

    let mut message = "🚫 <b>Banned users</b>\n\n".to_string();
    for user in users {
        message.push_str(&format!("👤 {} (ID: {})\n", html_escape(&user.display_name()), user.id));
        if let Some(ref at) = user.banned_at {
            message.push_str(&format!("📅 Banned: {}\n", format_date(at)));
        }
        message.push('\n');
    }
    message
}

pub fn stats(stats: &Stats) -> String {
    format!(
        "📊 <b>Statistics</b>\n\n\
         📝 Total feedback: {}\n\
         ✅ Processed: {}\n\
         ⏳ Unprocessed: {}\n\
         🚫 Banned users: {}",
        stats.total, stats.processed, stats.unprocessed, stats.banned_users
    )
}
