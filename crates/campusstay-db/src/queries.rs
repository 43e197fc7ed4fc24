use crate::Database;
use crate::models::{ListingRow, MessageRow, UserRow};
use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, email: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password) VALUES (?1, ?2, ?3, ?4)",
                (id, username, email, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Listings --

    pub fn insert_listing(&self, listing: &ListingRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO listings (id, owner_id, title, description, price, location,
                                       image_file_names, available_rooms, total_rooms, facilities, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    listing.id,
                    listing.owner_id,
                    listing.title,
                    listing.description,
                    listing.price,
                    listing.location,
                    listing.image_file_names,
                    listing.available_rooms,
                    listing.total_rooms,
                    listing.facilities,
                    listing.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_listings(&self) -> Result<Vec<ListingRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LISTING_COLUMNS} FROM listings ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map([], listing_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_listing_by_id(&self, id: &str) -> Result<Option<ListingRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LISTING_COLUMNS} FROM listings WHERE id = ?1"
            ))?;
            stmt.query_row([id], listing_from_row).optional()
        })
    }

    pub fn update_listing(&self, listing: &ListingRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE listings SET title = ?2, description = ?3, price = ?4, location = ?5,
                                     image_file_names = ?6, available_rooms = ?7, total_rooms = ?8,
                                     facilities = ?9
                 WHERE id = ?1",
                rusqlite::params![
                    listing.id,
                    listing.title,
                    listing.description,
                    listing.price,
                    listing.location,
                    listing.image_file_names,
                    listing.available_rooms,
                    listing.total_rooms,
                    listing.facilities,
                ],
            )?;
            Ok(())
        })
    }

    /// Returns false if no listing with that id existed.
    pub fn delete_listing(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM listings WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    /// Listings similar to the reference: same location or price within ±30%,
    /// rooms still available, the reference itself excluded.
    pub fn get_recommendations(&self, reference: &ListingRow, limit: u32) -> Result<Vec<ListingRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LISTING_COLUMNS} FROM listings
                 WHERE id != ?1
                   AND available_rooms > 0
                   AND (location = ?2 OR price BETWEEN ?3 AND ?4)
                 ORDER BY created_at DESC
                 LIMIT ?5"
            ))?;
            let spread = reference.price * 0.3;
            let rows = stmt
                .query_map(
                    rusqlite::params![
                        reference.id,
                        reference.location,
                        reference.price - spread,
                        reference.price + spread,
                        limit,
                    ],
                    listing_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Inserts a message and returns the stored row. `created_at` is assigned
    /// here with microsecond precision so ordering by it is stable.
    pub fn insert_message(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
        listing_id: &str,
        body: &str,
    ) -> Result<MessageRow> {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, listing_id, body, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                rusqlite::params![id, sender_id, receiver_id, listing_id, body, created_at],
            )?;
            Ok(MessageRow {
                id: id.to_string(),
                sender_id: sender_id.to_string(),
                receiver_id: receiver_id.to_string(),
                listing_id: listing_id.to_string(),
                body: body.to_string(),
                read: false,
                created_at: created_at.clone(),
            })
        })
    }

    /// Every message the user is a party to, newest first.
    pub fn get_messages_for_user(&self, user_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE sender_id = ?1 OR receiver_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map([user_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Both directions of one (listing, counterpart) conversation, oldest first.
    pub fn get_conversation(
        &self,
        listing_id: &str,
        user_id: &str,
        counterpart_id: &str,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE listing_id = ?1
                   AND ((sender_id = ?2 AND receiver_id = ?3)
                     OR (sender_id = ?3 AND receiver_id = ?2))
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map([listing_id, user_id, counterpart_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Marks the counterpart's unread messages to the user in one conversation
    /// as read. Idempotent; returns how many rows flipped.
    pub fn mark_conversation_read(
        &self,
        listing_id: &str,
        user_id: &str,
        counterpart_id: &str,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET read = 1
                 WHERE listing_id = ?1 AND sender_id = ?2 AND receiver_id = ?3 AND read = 0",
                [listing_id, counterpart_id, user_id],
            )?;
            Ok(n)
        })
    }

    pub fn get_message_by_id(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"
            ))?;
            stmt.query_row([id], message_from_row).optional()
        })
    }

    /// Returns false if no message with that id existed.
    pub fn delete_message(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }
}

const LISTING_COLUMNS: &str = "id, owner_id, title, description, price, location, \
                               image_file_names, available_rooms, total_rooms, facilities, created_at";

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, listing_id, body, read, created_at";

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is always one of our own literals, never caller input
    let mut stmt = conn.prepare(&format!(
        "SELECT id, username, email, password, created_at FROM users WHERE {column} = ?1"
    ))?;

    stmt.query_row([value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password: row.get(3)?,
            created_at: row.get(4)?,
        })
    })
    .optional()
}

fn listing_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<ListingRow, rusqlite::Error> {
    Ok(ListingRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        price: row.get(4)?,
        location: row.get(5)?,
        image_file_names: row.get(6)?,
        available_rooms: row.get(7)?,
        total_rooms: row.get(8)?,
        facilities: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        listing_id: row.get(3)?,
        body: row.get(4)?,
        read: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
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
