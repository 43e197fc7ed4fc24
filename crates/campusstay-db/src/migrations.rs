use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Message, listing, and owner references are plain TEXT ids on purpose:
/// deleting a user or listing must never cascade into or invalidate the
/// messages that mention it. Lookups resolve to absent instead.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS listings (
            id               TEXT PRIMARY KEY,
            owner_id         TEXT NOT NULL,
            title            TEXT NOT NULL,
            description      TEXT NOT NULL DEFAULT '',
            price            REAL NOT NULL,
            location         TEXT NOT NULL,
            image_file_names TEXT NOT NULL,
            available_rooms  INTEGER NOT NULL DEFAULT 1 CHECK (available_rooms >= 0),
            total_rooms      INTEGER NOT NULL DEFAULT 1 CHECK (total_rooms >= 1),
            facilities       TEXT NOT NULL DEFAULT '[]',
            created_at       TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_listings_owner
            ON listings(owner_id);

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            sender_id   TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            listing_id  TEXT NOT NULL,
            body        TEXT NOT NULL,
            read        INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_sender
            ON messages(sender_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_receiver
            ON messages(receiver_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(listing_id, sender_id, receiver_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
