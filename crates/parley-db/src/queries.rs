use crate::Database;
use crate::models::{
    ChannelRow, MembershipRow, MessageRow, NewChannelRow, NewMessageRow, ReactionRow, UserRow,
};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str = "m.id, m.channel_id, m.author_id, u.username, u.display_name, m.body, m.nonce,
     m.created_at, m.updated_at, m.edited_at, m.pinned_at, m.pinned_by, m.deleted_at, m.deleted_by";

const CHANNEL_COLUMNS: &str = "id, slug, name, kind, is_private, is_direct, created_by, created_at, updated_at, archived_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        display_name: Option<&str>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, display_name) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, display_name),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Channels --

    /// Inserts the channel and its creator's OWNER membership in one
    /// transaction. Returns false, writing nothing, when the slug is taken.
    pub fn create_channel_with_owner(&self, channel: &NewChannelRow<'_>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO channels
                     (id, slug, name, kind, is_private, is_direct, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                rusqlite::params![
                    channel.id,
                    channel.slug,
                    channel.name,
                    channel.kind,
                    channel.is_private,
                    channel.is_direct,
                    channel.created_by,
                    channel.created_at,
                ],
            )?;
            if inserted == 0 {
                return Ok(false);
            }
            tx.execute(
                "INSERT OR IGNORE INTO channel_members (channel_id, user_id, role) VALUES (?1, ?2, 'OWNER')",
                (channel.id, channel.created_by),
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn get_channel_by_id(&self, id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| query_channel(conn, "id", id))
    }

    pub fn get_channel_by_slug(&self, slug: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| query_channel(conn, "slug", slug))
    }

    pub fn get_membership(&self, channel_id: &str, user_id: &str) -> Result<Option<MembershipRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT channel_id, user_id, role FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
                (channel_id, user_id),
                |row| {
                    Ok(MembershipRow {
                        channel_id: row.get(0)?,
                        user_id: row.get(1)?,
                        role: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Idempotent: an existing row for `(channel_id, user_id)` is kept as is.
    pub fn insert_membership(&self, channel_id: &str, user_id: &str, role: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO channel_members (channel_id, user_id, role) VALUES (?1, ?2, ?3)",
                (channel_id, user_id, role),
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn count_members(&self, channel_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM channel_members WHERE channel_id = ?1",
                [channel_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    // -- Messages --

    /// Inserts a message. A send repeated with the same nonce by the same
    /// author in the same channel is ignored and the row from the first
    /// attempt is returned. Returns `None` when the nonce is already used by
    /// another author or in another channel.
    pub fn insert_message(&self, msg: &NewMessageRow<'_>) -> Result<Option<MessageRow>> {
        self.with_conn_mut(|conn| {
            if let Some(nonce) = msg.nonce {
                let foreign: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM messages
                     WHERE nonce = ?1 AND (channel_id != ?2 OR author_id != ?3))",
                    (nonce, msg.channel_id, msg.author_id),
                    |r| r.get(0),
                )?;
                if foreign {
                    return Ok(None);
                }
            }

            conn.execute(
                "INSERT OR IGNORE INTO messages (id, channel_id, author_id, body, nonce, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![
                    msg.id,
                    msg.channel_id,
                    msg.author_id,
                    msg.body,
                    msg.nonce,
                    msg.created_at
                ],
            )?;

            let row = match msg.nonce {
                Some(nonce) => query_sent_message(conn, msg.channel_id, msg.author_id, nonce)?,
                None => query_message(conn, "id", msg.id)?,
            };
            row.map(Some)
                .ok_or_else(|| anyhow!("Message vanished after insert: {}", msg.id))
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, "id", id))
    }

    /// One page of a channel's history, newest first. With a cursor, only
    /// rows strictly older than `(before_created_at, before_id)` are returned.
    pub fn get_messages(
        &self,
        channel_id: &str,
        limit: u32,
        before: Option<(&str, &str)>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, channel_id, limit, before))
    }

    /// Returns false when the message is missing or already a tombstone.
    pub fn edit_message(&self, id: &str, body: &str, edited_at: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET body = ?2, edited_at = ?3, updated_at = ?3
                 WHERE id = ?1 AND deleted_at IS NULL",
                (id, body, edited_at),
            )?;
            Ok(changed == 1)
        })
    }

    /// Tombstones the message. The body column is left untouched.
    pub fn soft_delete_message(&self, id: &str, deleted_by: &str, deleted_at: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET deleted_at = ?3, deleted_by = ?2, updated_at = ?3
                 WHERE id = ?1 AND deleted_at IS NULL",
                (id, deleted_by, deleted_at),
            )?;
            Ok(changed == 1)
        })
    }

    /// `pin = Some((pinned_by, pinned_at))` pins, `None` unpins.
    pub fn set_pin(&self, id: &str, pin: Option<(&str, &str)>, updated_at: &str) -> Result<bool> {
        let (pinned_by, pinned_at) = pin.unzip();
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET pinned_at = ?2, pinned_by = ?3, updated_at = ?4 WHERE id = ?1",
                rusqlite::params![id, pinned_at, pinned_by, updated_at],
            )?;
            Ok(changed == 1)
        })
    }

    /// Bumps `updated_at` after a change stored outside the row, such as a reaction.
    pub fn touch_message(&self, id: &str, updated_at: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute("UPDATE messages SET updated_at = ?2 WHERE id = ?1", (id, updated_at))?;
            Ok(changed == 1)
        })
    }

    // -- Reactions --

    /// Records one `(message, user, emoji)` fact. Returns false if it already existed.
    pub fn add_reaction(&self, message_id: &str, user_id: &str, emoji: &str, created_at: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4)",
                (message_id, user_id, emoji, created_at),
            )?;
            Ok(inserted == 1)
        })
    }

    /// Removes one `(message, user, emoji)` fact. Returns false if it was absent.
    pub fn remove_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                (message_id, user_id, emoji),
            )?;
            Ok(removed == 1)
        })
    }

    /// Batch-fetch reactions for a set of message IDs, oldest first.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id, emoji, created_at FROM reactions
                 WHERE message_id IN ({})
                 ORDER BY created_at, rowid",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        emoji: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, display_name, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    stmt.query_row([value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            username: row.get(1)?,
            password: row.get(2)?,
            display_name: row.get(3)?,
            created_at: row.get(4)?,
        })
    })
    .optional()
}

fn query_channel(conn: &Connection, column: &str, value: &str) -> Result<Option<ChannelRow>> {
    let sql = format!("SELECT {} FROM channels WHERE {} = ?1", CHANNEL_COLUMNS, column);
    let mut stmt = conn.prepare(&sql)?;

    stmt.query_row([value], |row| {
        Ok(ChannelRow {
            id: row.get(0)?,
            slug: row.get(1)?,
            name: row.get(2)?,
            kind: row.get(3)?,
            is_private: row.get(4)?,
            is_direct: row.get(5)?,
            created_by: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            archived_at: row.get(9)?,
        })
    })
    .optional()
}

fn query_message(conn: &Connection, column: &str, value: &str) -> Result<Option<MessageRow>> {
    // JOIN users to fetch the author's names in a single query
    let sql = format!(
        "SELECT {} FROM messages m LEFT JOIN users u ON m.author_id = u.id WHERE m.{} = ?1",
        MESSAGE_COLUMNS, column
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([value], message_row).optional()
}

fn query_sent_message(
    conn: &Connection,
    channel_id: &str,
    author_id: &str,
    nonce: &str,
) -> Result<Option<MessageRow>> {
    let sql = format!(
        "SELECT {} FROM messages m LEFT JOIN users u ON m.author_id = u.id
         WHERE m.channel_id = ?1 AND m.author_id = ?2 AND m.nonce = ?3",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row((channel_id, author_id, nonce), message_row).optional()
}

fn query_messages(
    conn: &Connection,
    channel_id: &str,
    limit: u32,
    before: Option<(&str, &str)>,
) -> Result<Vec<MessageRow>> {
    let (before_created_at, before_id) = before.unzip();
    let sql = format!(
        "SELECT {} FROM messages m
         LEFT JOIN users u ON m.author_id = u.id
         WHERE m.channel_id = ?1
           AND (?2 IS NULL OR m.created_at < ?2 OR (m.created_at = ?2 AND m.id < ?3))
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT ?4",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map(
            rusqlite::params![channel_id, before_created_at, before_id, limit],
            message_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        author_id: row.get(2)?,
        author_username: row.get::<_, Option<String>>(3)?.unwrap_or_else(|| "unknown".to_string()),
        author_display_name: row.get(4)?,
        body: row.get(5)?,
        nonce: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        edited_at: row.get(9)?,
        pinned_at: row.get(10)?,
        pinned_by: row.get(11)?,
        deleted_at: row.get(12)?,
        deleted_by: row.get(13)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
