use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id            TEXT PRIMARY KEY,
                username      TEXT NOT NULL UNIQUE,
                password      TEXT NOT NULL,
                display_name  TEXT,
                created_at    TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE channels (
                id          TEXT PRIMARY KEY,
                slug        TEXT NOT NULL UNIQUE,
                name        TEXT NOT NULL,
                kind        TEXT NOT NULL DEFAULT 'TEXT',
                is_private  INTEGER NOT NULL DEFAULT 0,
                is_direct   INTEGER NOT NULL DEFAULT 0,
                created_by  TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                archived_at TEXT
            );

            CREATE TABLE channel_members (
                channel_id  TEXT NOT NULL REFERENCES channels(id),
                user_id     TEXT NOT NULL,
                role        TEXT NOT NULL,
                joined_at   TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (channel_id, user_id)
            );

            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                channel_id  TEXT NOT NULL REFERENCES channels(id),
                author_id   TEXT NOT NULL REFERENCES users(id),
                body        TEXT NOT NULL,
                nonce       TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                edited_at   TEXT,
                pinned_at   TEXT,
                pinned_by   TEXT,
                deleted_at  TEXT,
                deleted_by  TEXT
            );

            CREATE INDEX idx_messages_channel
                ON messages(channel_id, created_at, id);

            CREATE UNIQUE INDEX idx_messages_send_nonce
                ON messages(channel_id, author_id, nonce);

            CREATE INDEX idx_messages_nonce
                ON messages(nonce);

            CREATE TABLE reactions (
                message_id  TEXT NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL,
                emoji       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                UNIQUE(message_id, user_id, emoji)
            );

            CREATE INDEX idx_reactions_message
                ON reactions(message_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
