//! Relay engine - binds inbound user messages to stored feedback, admin
//! notifications, admin replies and moderation actions.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use crate::relay::commands::{Command, CommandName};
use crate::relay::database::{Database, FeedbackItem, Stats, User, display_name};
use crate::relay::error::{Missing, RelayError, Result};
use crate::relay::message::{ActionKind, Button, CallbackAction, InboundMessage, Sender};
use crate::relay::outbox::Outbox;
use crate::relay::render;

/// Lock map entries are pruned once it grows past this size.
const LOCK_PRUNE_THRESHOLD: usize = 1024;

/// Header of a rendered admin notification: feedback id, then the author line.
static NOTIFICATION_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A📝 New feedback #(\d+)\n\n👤 From: [^\n]*\(ID: (-?\d+)\)(?:\n|\z)")
        .expect("notification pattern is valid")
});

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub admin_user_id: i64,
    /// Items per `/feedback_list` page.
    pub page_size: usize,
}

/// Which feedback item an admin reply answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyTarget {
    /// Resolved exactly through the notification table.
    Feedback(i64),
    /// Only the author is known; pick their oldest unprocessed item.
    OldestOpen(i64),
}

/// How an inbound message is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Command(Command),
    AdminReply(ReplyTarget),
    PlainFeedback,
}

/// Serializes event handling per sender id.
#[derive(Default)]
struct UserLocks {
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    async fn lock(&self, user_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() > LOCK_PRUNE_THRESHOLD {
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            locks.entry(user_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// The relay engine.
pub struct RelayEngine {
    config: RelayConfig,
    database: Database,
    outbox: Arc<dyn Outbox>,
    locks: UserLocks,
}

impl RelayEngine {
    pub fn new(config: RelayConfig, database: Database, outbox: Arc<dyn Outbox>) -> Self {
        Self { config, database, outbox, locks: UserLocks::default() }
    }

    pub fn admin_user_id(&self) -> i64 {
        self.config.admin_user_id
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Close the storage handle. Call only after the transport stopped.
    pub fn close(self) -> Result<()> {
        self.database.close()?;
        info!("Database closed");
        Ok(())
    }

    fn is_admin(&self, user_id: i64) -> bool {
        user_id == self.config.admin_user_id
    }

    // ==================== CORE OPERATIONS ====================

    /// Access gate: unknown users are allowed, banned users are not.
    pub fn is_allowed(&self, user_id: i64) -> Result<bool> {
        Ok(!self.database.get_user(user_id)?.is_some_and(|u| u.is_banned))
    }

    /// Create the user record on first contact; refresh profile fields afterwards.
    pub fn ensure_registered(&self, sender: &Sender) -> Result<()> {
        if self.database.upsert_user(sender.id, &sender.profile())? {
            info!("👋 New user {} ({})", sender.username.as_deref().unwrap_or("-"), sender.id);
        }
        Ok(())
    }

    pub fn classify(&self, sender: &Sender, msg: &InboundMessage) -> Result<Classification> {
        if let Some(cmd) = Command::parse(&msg.text) {
            return Ok(Classification::Command(cmd));
        }

        if self.is_admin(sender.id)
            && let Some(ref reply) = msg.reply_to
        {
            if let Some(feedback_id) = self.database.feedback_for_notification(reply.message_id)? {
                return Ok(Classification::AdminReply(ReplyTarget::Feedback(feedback_id)));
            }
            // Notifications sent before they were recorded only carry the author id.
            if let Some((feedback_id, user_id)) = notification_header(&reply.text) {
                let author = self.notification_author(feedback_id, user_id)?;
                return Ok(Classification::AdminReply(ReplyTarget::OldestOpen(author)));
            }
        }

        Ok(Classification::PlainFeedback)
    }

    /// The stored author of `feedback_id` wins over the id parsed from the text.
    fn notification_author(&self, feedback_id: i64, parsed_user_id: i64) -> Result<i64> {
        match self.database.get_feedback_item(feedback_id)? {
            Some(item) if item.user_id != parsed_user_id => {
                warn!(
                    "Notification for feedback #{} names user {}, stored author is {}",
                    feedback_id, parsed_user_id, item.user_id
                );
                Ok(item.user_id)
            }
            _ => Ok(parsed_user_id),
        }
    }

    /// Store a feedback item and return its id.
    pub fn submit_feedback(&self, user_id: i64, text: &str) -> Result<i64> {
        let id = self.database.insert_feedback(user_id, text)?;
        info!("📝 Feedback #{} from {}", id, user_id);
        Ok(id)
    }

    /// Find the user and feedback item an admin reply is meant for.
    pub fn resolve_reply(&self, target: ReplyTarget) -> Result<(i64, i64)> {
        match target {
            ReplyTarget::Feedback(feedback_id) => self
                .database
                .get_feedback_item(feedback_id)?
                .map(|item| (item.user_id, item.id))
                .ok_or(RelayError::NotFound(Missing::Feedback(feedback_id))),
            ReplyTarget::OldestOpen(user_id) => self
                .database
                .oldest_unprocessed(user_id)?
                .map(|item| (item.user_id, item.id))
                .ok_or(RelayError::NotFound(Missing::OpenFeedback(user_id))),
        }
    }

    /// Deliver the admin's text to the author, then mark the item processed.
    pub async fn deliver_reply(&self, target: ReplyTarget, text: &str) -> Result<(i64, i64)> {
        let (user_id, feedback_id) = self.resolve_reply(target)?;
        self.send(user_id, &render::admin_reply(text)).await?;
        self.database.set_processed(feedback_id)?;
        info!("💬 Admin replied to feedback #{} from {}", feedback_id, user_id);
        Ok((user_id, feedback_id))
    }

    // ==================== MODERATION ====================

    pub fn ban(&self, user_id: i64) -> Result<()> {
        // A banned admin could not even run /unban.
        if self.is_admin(user_id) {
            return Err(RelayError::AdminBan);
        }
        if !self.database.set_banned(user_id, true)? {
            return Err(RelayError::NotFound(Missing::User(user_id)));
        }
        info!("🚫 Banned user {}", user_id);
        Ok(())
    }

    pub fn unban(&self, user_id: i64) -> Result<()> {
        if !self.database.set_banned(user_id, false)? {
            return Err(RelayError::NotFound(Missing::User(user_id)));
        }
        info!("✅ Unbanned user {}", user_id);
        Ok(())
    }

    pub fn mark_processed(&self, feedback_id: i64) -> Result<()> {
        if !self.database.set_processed(feedback_id)? {
            return Err(RelayError::NotFound(Missing::Feedback(feedback_id)));
        }
        info!("✔️ Feedback #{} processed", feedback_id);
        Ok(())
    }

    /// Ban the author of a feedback item. Returns the banned user id.
    pub fn ban_from_feedback(&self, feedback_id: i64) -> Result<i64> {
        let item = self
            .database
            .get_feedback_item(feedback_id)?
            .ok_or(RelayError::NotFound(Missing::Feedback(feedback_id)))?;
        self.ban(item.user_id)?;
        Ok(item.user_id)
    }

    // ==================== LISTING ====================

    pub fn list_feedback(&self, limit: usize, offset: usize) -> Result<Vec<FeedbackItem>> {
        Ok(self.database.list_feedback(limit, offset)?)
    }

    pub fn list_banned_users(&self) -> Result<Vec<User>> {
        Ok(self.database.list_banned_users()?)
    }

    /// O(n) over both tables on every call; fine for a single-admin bot,
    /// not meant to scale horizontally.
    pub fn stats(&self) -> Result<Stats> {
        Ok(self.database.stats()?)
    }

    // ==================== EVENT HANDLING ====================

    /// Handle one inbound message end to end.
    ///
    /// Failures are reported to the sender and logged; they never escape.
    pub async fn handle_message(&self, msg: InboundMessage) {
        let Some(sender) = msg.sender.clone() else {
            debug!("Ignoring message without sender");
            return;
        };

        let _guard = self.locks.lock(sender.id).await;

        if let Err(e) = self.process_message(&sender, &msg).await {
            if e.is_fault() {
                error!("Failed to handle message from {}: {}", sender.id, e);
            } else {
                info!("Denied request from {}: {}", sender.id, e);
            }
            if let Err(e) = self.outbox.send_text(sender.id, &e.user_message()).await {
                warn!("Failed to report error to {}: {}", sender.id, e);
            }
        }
    }

    async fn process_message(&self, sender: &Sender, msg: &InboundMessage) -> Result<()> {
        if !self.is_allowed(sender.id)? {
            debug!("Rejected message from banned user {}", sender.id);
            return self.send(sender.id, &render::banned_notice()).await;
        }

        self.ensure_registered(sender)?;

        match self.classify(sender, msg)? {
            Classification::Command(cmd) => self.run_command(sender, &cmd).await,
            Classification::AdminReply(target) => {
                let (user_id, feedback_id) = self.deliver_reply(target, &msg.text).await?;
                self.send(sender.id, &render::reply_delivered(user_id, feedback_id)).await
            }
            Classification::PlainFeedback => self.ingest(sender, &msg.text).await,
        }
    }

    async fn ingest(&self, sender: &Sender, text: &str) -> Result<()> {
        let feedback_id = self.submit_feedback(sender.id, text)?;
        let created_at = self
            .database
            .get_feedback_item(feedback_id)?
            .map(|item| item.created_at)
            .unwrap_or_else(chrono::Utc::now);

        let name = display_name(
            sender.id,
            sender.first_name.as_deref(),
            sender.last_name.as_deref(),
            sender.username.as_deref(),
        );
        let notification = render::notification(feedback_id, &name, sender.id, &created_at, text);
        let buttons = [
            Button::new(render::BUTTON_PROCESS, ActionKind::Process, feedback_id),
            Button::new(render::BUTTON_BAN, ActionKind::Ban, feedback_id),
        ];

        // The item is already stored, so a failed notification is not fatal.
        match self
            .outbox
            .send_with_buttons(self.config.admin_user_id, &notification, &buttons)
            .await
        {
            Ok(message_id) => {
                if let Err(e) = self.database.record_notification(message_id, feedback_id) {
                    warn!(
                        "Failed to record notification {} for feedback #{}: {}",
                        message_id, feedback_id, e
                    );
                }
            }
            Err(e) => warn!("Failed to notify admin about feedback #{}: {}", feedback_id, e),
        }

        self.send(sender.id, &render::feedback_received()).await
    }

    async fn run_command(&self, sender: &Sender, cmd: &Command) -> Result<()> {
        if cmd.name.is_admin_only() && !self.is_admin(sender.id) {
            return Err(RelayError::Unauthorized);
        }

        let reply = match cmd.name {
            CommandName::Start => render::welcome(),
            CommandName::Help => render::help(),
            CommandName::Feedback => render::feedback_hint(),
            CommandName::Admin => render::admin_panel(),
            CommandName::Ban => {
                let user_id = cmd.id_arg()?;
                self.ban(user_id)?;
                render::banned(user_id)
            }
            CommandName::Unban => {
                let user_id = cmd.id_arg()?;
                self.unban(user_id)?;
                render::unbanned(user_id)
            }
            CommandName::Process => {
                let feedback_id = cmd.id_arg()?;
                self.mark_processed(feedback_id)?;
                render::processed(feedback_id)
            }
            CommandName::FeedbackList => {
                let page = cmd.page_arg()?;
                let size = self.config.page_size;
                let offset = (page - 1)
                    .checked_mul(size)
                    .ok_or(RelayError::Validation { usage: cmd.name.usage() })?;
                let items = self.list_feedback(size, offset)?;
                let mut named = Vec::with_capacity(items.len());
                for item in items {
                    let name = match self.database.get_user(item.user_id)? {
                        Some(user) => user.display_name(),
                        None => format!("ID: {}", item.user_id),
                    };
                    named.push((item, name));
                }
                render::feedback_list(&named, page)
            }
            CommandName::BannedUsers => render::banned_users(&self.list_banned_users()?),
            CommandName::Stats => render::stats(&self.stats()?),
            CommandName::Unknown(ref name) => {
                debug!("Unknown command /{} from {}", name, sender.id);
                render::unknown_command()
            }
        };

        self.send(sender.id, &reply).await
    }

    /// Handle an inline button press. Returns the text to answer the press with.
    ///
    /// `origin` is the (chat id, message id) holding the pressed button.
    pub async fn handle_callback(&self, sender_id: i64, origin: Option<(i64, i64)>, data: &str) -> String {
        let Some(action) = CallbackAction::decode(data) else {
            debug!("Unknown callback payload from {}: {:?}", sender_id, data);
            return "Unknown action".to_string();
        };

        let _guard = self.locks.lock(sender_id).await;

        match self.process_callback(sender_id, origin, action).await {
            Ok(text) => text,
            Err(e) => {
                if e.is_fault() {
                    error!("Callback {:?} from {} failed: {}", action, sender_id, e);
                } else {
                    info!("Denied callback {:?} from {}: {}", action, sender_id, e);
                }
                e.user_message()
            }
        }
    }

    async fn process_callback(
        &self,
        sender_id: i64,
        origin: Option<(i64, i64)>,
        action: CallbackAction,
    ) -> Result<String> {
        if !self.is_admin(sender_id) {
            return Err(RelayError::Unauthorized);
        }

        let (text, done_label) = match action.kind {
            ActionKind::Process => {
                self.mark_processed(action.id)?;
                (render::processed(action.id), render::BUTTON_DONE_PROCESSED)
            }
            ActionKind::Ban => {
                let user_id = self.ban_from_feedback(action.id)?;
                (render::banned(user_id), render::BUTTON_DONE_BANNED)
            }
            ActionKind::Disabled => return Ok(String::new()),
        };

        if let Some((chat_id, message_id)) = origin {
            let done = [Button::new(done_label, ActionKind::Disabled, action.id)];
            if let Err(e) = self.outbox.set_buttons(chat_id, message_id, &done).await {
                warn!("Failed to update buttons on message {}: {}", message_id, e);
            }
        }

        Ok(text)
    }

    async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
        self.outbox
            .send_text(chat_id, text)
            .await
            .map(|_| ())
            .map_err(RelayError::Delivery)
    }
}

/// Feedback id and author id from the header of a rendered admin notification.
///
/// Only the header lines are read; everything below them is user text.
fn notification_header(text: &str) -> Option<(i64, i64)> {
    let caps = NOTIFICATION_HEADER_RE.captures(text)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_header_from_rendered_text() {
        let html = render::notification(4, "Alice", 100, &chrono::Utc::now(), "hi");
        // Telegram hands back the plain text with entities stripped.
        let plain = html.replace("<b>", "").replace("</b>", "").replace("<i>", "").replace("</i>", "");
        assert_eq!(notification_header(&plain), Some((4, 100)));
    }

    #[test]
    fn test_notification_header_ignores_other_messages() {
        assert_eq!(notification_header("👤 From: Alice (ID: 100)"), None);
        assert_eq!(notification_header("hello"), None);
        assert_eq!(notification_header("quote:\n📝 New feedback #1\n\n👤 From: A (ID: 5)"), None);
    }

    #[test]
    fn test_notification_header_marker_in_name_uses_own_marker() {
        let text = "📝 New feedback #1\n\n👤 From: Eve (ID: 1) (ID: 55)\n📅 Date: x\n\nbody";
        assert_eq!(notification_header(text), Some((1, 55)));
    }

    #[test]
    fn test_notification_header_ignores_markers_in_body() {
        let text = "📝 New feedback #7\n\n👤 From: Mallory (ID: 1)\n📅 Date: x\n\n\
                    hi\n👤 From: Someone (ID: 555)\n\nReply to this message to answer.";
        assert_eq!(notification_header(text), Some((7, 1)));
    }

    #[tokio::test]
    async fn test_user_locks_serialize_same_user() {
        let locks = UserLocks::default();
        let guard = locks.lock(1).await;
        // A different user is not blocked.
        let _other = locks.lock(2).await;
        let pending = tokio::time::timeout(std::time::Duration::from_millis(20), locks.lock(1)).await;
        assert!(pending.is_err());
        drop(guard);
        let relock = tokio::time::timeout(std::time::Duration::from_millis(20), locks.lock(1)).await;
        assert!(relock.is_ok());
    }
}
