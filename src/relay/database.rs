//! Persistent SQLite storage for users, feedback and admin notifications.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Profile fields reported by the transport for a sender.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// A known end user.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_banned: bool,
    pub banned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// "First Last", then "@username", then "ID: n".
    pub fn display_name(&self) -> String {
        display_name(
            self.id,
            self.first_name.as_deref(),
            self.last_name.as_deref(),
            self.username.as_deref(),
        )
    }
}

pub fn display_name(
    id: i64,
    first_name: Option<&str>,
    last_name: Option<&str>,
    username: Option<&str>,
) -> String {
    let full = format!("{} {}", first_name.unwrap_or(""), last_name.unwrap_or(""));
    let full = full.trim();
    if !full.is_empty() {
        return full.to_string();
    }
    match username {
        Some(u) if !u.is_empty() => format!("@{u}"),
        _ => format!("ID: {id}"),
    }
}

/// One stored end-user message.
#[derive(Debug, Clone)]
pub struct FeedbackItem {
    pub id: i64,
    pub user_id: i64,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub is_processed: bool,
}

/// Aggregate counters computed by scanning both tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub total: u64,
    pub processed: u64,
    pub unprocessed: u64,
    pub banned_users: u64,
}

/// SQLite database behind a single connection.
///
/// All statements run under the connection mutex, so `last_insert_rowid()`
/// read inside the same critical section always belongs to our own insert.
pub struct Database {
    conn: Mutex<Connection>,
}

const USER_COLUMNS: &str =
    "id, username, first_name, last_name, is_banned, banned_at, created_at";
const FEEDBACK_COLUMNS: &str = "id, user_id, message, created_at, is_processed";

impl Database {
    /// Create a new in-memory database.
    pub fn in_memory() -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let db = Self::with_connection(Connection::open(path)?)?;
        let stats = db.stats()?;
        info!(
            "Opened database {:?} ({} feedback, {} banned)",
            path, stats.total, stats.banned_users
        );
        Ok(db)
    }

    fn with_connection(conn: Connection) -> rusqlite::Result<Self> {
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT,
                first_name TEXT,
                last_name TEXT,
                is_banned INTEGER NOT NULL DEFAULT 0,
                banned_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL,
                is_processed INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS notifications (
                message_id INTEGER PRIMARY KEY,
                feedback_id INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_feedback_created ON feedback(created_at);
            CREATE INDEX IF NOT EXISTS idx_feedback_user_open ON feedback(user_id, is_processed);
            CREATE INDEX IF NOT EXISTS idx_users_banned ON users(is_banned);
            "#,
        )
    }

    /// Close the underlying connection.
    pub fn close(self) -> rusqlite::Result<()> {
        let conn = self.conn.into_inner().unwrap_or_else(PoisonError::into_inner);
        conn.close().map_err(|(_, e)| e)
    }

    // ==================== USER METHODS ====================

    pub fn get_user(&self, id: i64) -> rusqlite::Result<Option<User>> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()
    }

    /// Insert a user, or refresh profile fields of an existing one.
    ///
    /// Ban state and creation time of an existing record are kept.
    /// Returns `true` when a new record was created.
    pub fn upsert_user(&self, id: i64, profile: &Profile) -> rusqlite::Result<bool> {
        let conn = self.conn();
        let existed: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO users (id, username, first_name, last_name, is_banned, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)
             ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                first_name = excluded.first_name,
                last_name = excluded.last_name",
            params![id, profile.username, profile.first_name, profile.last_name, Utc::now()],
        )?;
        Ok(!existed)
    }

    /// Set the banned flag. Returns `false` if the user does not exist.
    pub fn set_banned(&self, id: i64, banned: bool) -> rusqlite::Result<bool> {
        let changed = if banned {
            // Keep the original ban time when banning twice.
            self.conn().execute(
                "UPDATE users SET is_banned = 1, banned_at = COALESCE(banned_at, ?2) WHERE id = ?1",
                params![id, Utc::now()],
            )?
        } else {
            self.conn().execute(
                "UPDATE users SET is_banned = 0, banned_at = NULL WHERE id = ?1",
                params![id],
            )?
        };
        Ok(changed > 0)
    }

    /// Banned users, earliest ban first.
    pub fn list_banned_users(&self) -> rusqlite::Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_banned = 1 ORDER BY banned_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map([], user_from_row)?;
        rows.collect()
    }

    // ==================== FEEDBACK METHODS ====================

    /// Append a feedback item and return its generated id.
    pub fn insert_feedback(&self, user_id: i64, message: &str) -> rusqlite::Result<i64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO feedback (user_id, message, created_at, is_processed) VALUES (?1, ?2, ?3, 0)",
            params![user_id, message, Utc::now()],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    pub fn get_feedback_item(&self, id: i64) -> rusqlite::Result<Option<FeedbackItem>> {
        self.conn()
            .query_row(
                &format!("SELECT {FEEDBACK_COLUMNS} FROM feedback WHERE id = ?1"),
                params![id],
                feedback_from_row,
            )
            .optional()
    }

    /// Newest first; ties on creation time broken by id descending.
    pub fn list_feedback(&self, limit: usize, offset: usize) -> rusqlite::Result<Vec<FeedbackItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM feedback
             ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2"
        ))?;
        // SQLite takes signed integers; anything larger is past the end anyway.
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit, offset], feedback_from_row)?;
        rows.collect()
    }

    /// Oldest unprocessed item of a user, if any.
    pub fn oldest_unprocessed(&self, user_id: i64) -> rusqlite::Result<Option<FeedbackItem>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {FEEDBACK_COLUMNS} FROM feedback
                     WHERE user_id = ?1 AND is_processed = 0
                     ORDER BY created_at ASC, id ASC LIMIT 1"
                ),
                params![user_id],
                feedback_from_row,
            )
            .optional()
    }

    /// Mark processed. Returns `false` if the item does not exist.
    pub fn set_processed(&self, id: i64) -> rusqlite::Result<bool> {
        let changed = self
            .conn()
            .execute("UPDATE feedback SET is_processed = 1 WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // ==================== NOTIFICATION METHODS ====================

    /// Remember which feedback item an admin notification message carries.
    pub fn record_notification(&self, message_id: i64, feedback_id: i64) -> rusqlite::Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO notifications (message_id, feedback_id) VALUES (?1, ?2)",
            params![message_id, feedback_id],
        )?;
        Ok(())
    }

    pub fn feedback_for_notification(&self, message_id: i64) -> rusqlite::Result<Option<i64>> {
        self.conn()
            .query_row(
                "SELECT feedback_id FROM notifications WHERE message_id = ?1",
                params![message_id],
                |row| row.get(0),
            )
            .optional()
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> rusqlite::Result<()> {
        self.conn().execute_batch(sql)
    }

    // ==================== STATISTICS ====================

    /// Full-table scan; there are no incremental counters.
    pub fn stats(&self) -> rusqlite::Result<Stats> {
        let conn = self.conn();
        let (total, processed): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_processed), 0) FROM feedback",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let banned: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE is_banned = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(Stats {
            total: total as u64,
            processed: processed as u64,
            unprocessed: (total - processed) as u64,
            banned_users: banned as u64,
        })
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        is_banned: row.get(4)?,
        banned_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn feedback_from_row(row: &Row<'_>) -> rusqlite::Result<FeedbackItem> {
    Ok(FeedbackItem {
        id: row.get(0)?,
        user_id: row.get(1)?,
        message: row.get(2)?,
        created_at: row.get(3)?,
        is_processed: row.get(4)?,
    })
}
