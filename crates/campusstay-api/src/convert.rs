//! Row-to-response conversions shared by the listing and message handlers.
//! Stored ids and timestamps are TEXT; corrupt values degrade to defaults
//! with a warning instead of failing the whole response.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use campusstay_db::models::{ListingRow, MessageRow, UserRow};
use campusstay_types::api::{ListingResponse, ListingSummary, MessageResponse, UserPublic};

pub(crate) fn parse_uuid(value: &str, what: &str) -> Uuid {
    value.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} id '{}': {}", what, value, e);
        Uuid::default()
    })
}

pub(crate) fn parse_timestamp(value: &str, what: &str) -> DateTime<Utc> {
    value
        .parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite-defaulted timestamps are "YYYY-MM-DD HH:MM:SS" without
            // timezone. Parse as naive UTC and convert.
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on {}: {}", value, what, e);
            DateTime::default()
        })
}

/// Decode a stored JSON string array column (image file names, facilities).
pub(crate) fn decode_string_array(json: &str, what: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_else(|e| {
        warn!("Corrupt {} array '{}': {}", what, json, e);
        Vec::new()
    })
}

pub(crate) fn user_public(row: &UserRow) -> UserPublic {
    UserPublic {
        id: parse_uuid(&row.id, "user"),
        username: row.username.clone(),
        email: row.email.clone(),
    }
}

pub(crate) fn listing_summary(row: &ListingRow) -> ListingSummary {
    ListingSummary {
        id: parse_uuid(&row.id, "listing"),
        title: row.title.clone(),
        image_file_names: decode_string_array(&row.image_file_names, "image_file_names"),
    }
}

pub(crate) fn listing_response(row: &ListingRow, owner: Option<&UserRow>) -> ListingResponse {
    ListingResponse {
        id: parse_uuid(&row.id, "listing"),
        owner: owner.map(user_public),
        title: row.title.clone(),
        description: row.description.clone(),
        price: row.price,
        location: row.location.clone(),
        image_file_names: decode_string_array(&row.image_file_names, "image_file_names"),
        available_rooms: row.available_rooms,
        total_rooms: row.total_rooms,
        facilities: decode_string_array(&row.facilities, "facilities"),
        created_at: parse_timestamp(&row.created_at, "listing"),
    }
}

pub(crate) fn message_response(
    row: &MessageRow,
    sender: Option<&UserRow>,
    receiver: Option<&UserRow>,
    listing: Option<&ListingRow>,
) -> MessageResponse {
    MessageResponse {
        id: parse_uuid(&row.id, "message"),
        sender: sender.map(user_public),
        receiver: receiver.map(user_public),
        listing: listing.map(listing_summary),
        body: row.body.clone(),
        read: row.read,
        created_at: parse_timestamp(&row.created_at, "message"),
    }
}
