use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared between the auth handlers (token creation) and the
/// request middleware (token validation). Canonical definition lives here in
/// campusstay-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub token: String,
}

// -- Users --

/// Public profile shape used everywhere a user is embedded in a response.
#[derive(Debug, Clone, Serialize)]
pub struct UserPublic {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

// -- Listings --

#[derive(Debug, Serialize)]
pub struct ListingResponse {
    pub id: Uuid,
    pub owner: Option<UserPublic>,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub location: String,
    pub image_file_names: Vec<String>,
    pub available_rooms: i64,
    pub total_rooms: i64,
    pub facilities: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Compact listing shape embedded in message and conversation responses.
#[derive(Debug, Clone, Serialize)]
pub struct ListingSummary {
    pub id: Uuid,
    pub title: String,
    pub image_file_names: Vec<String>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub receiver: Uuid,
    pub listing: Uuid,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub sender: Option<UserPublic>,
    pub receiver: Option<UserPublic>,
    pub listing: Option<ListingSummary>,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

// -- Conversations --

/// One entry of the per-user inbox: the most recent message exchanged with
/// one counterpart about one listing, plus the unread tally. Counterpart and
/// listing are `None` when the referenced row no longer exists.
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub listing_id: Uuid,
    pub counterpart_id: Uuid,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: u32,
    pub counterpart: Option<UserPublic>,
    pub listing: Option<ListingSummary>,
}

// -- Deletions --

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub id: Uuid,
}
