use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use campusstay_types::api::{Claims, DeleteResponse, SendMessageRequest};

use crate::auth::AppState;
use crate::convert::message_response;

/// Starting a conversation requires an existing listing, but the listing
/// owner is a legitimate party on their own listing — replies flow both
/// ways. Only self-addressed messages are rejected.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.body.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.receiver == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.clone();
    let sender_id = claims.sub.to_string();
    let receiver_id = req.receiver.to_string();
    let listing_id = req.listing.to_string();
    let body = req.body.clone();

    let response = tokio::task::spawn_blocking(move || {
        let listing = db
            .db
            .get_listing_by_id(&listing_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;

        let message_id = Uuid::new_v4().to_string();
        let stored = db
            .db
            .insert_message(&message_id, &sender_id, &receiver_id, &listing_id, &body)
            .map_err(|e| {
                error!("Failed to insert message: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;

        let sender = db.db.get_user_by_id(&sender_id).unwrap_or_default();
        let receiver = db.db.get_user_by_id(&receiver_id).unwrap_or_default();

        Ok::<_, StatusCode>(message_response(
            &stored,
            sender.as_ref(),
            receiver.as_ref(),
            Some(&listing),
        ))
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })??;

    Ok((StatusCode::CREATED, Json(response)))
}

/// One (listing, counterpart) conversation, oldest first. Unread messages
/// addressed to the requester are marked read before the select, so the
/// returned messages already carry the updated flag.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path((listing_id, counterpart_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let user_id = claims.sub.to_string();
    let listing_id = listing_id.to_string();
    let counterpart_id = counterpart_id.to_string();

    let messages = tokio::task::spawn_blocking(move || {
        db.db
            .mark_conversation_read(&listing_id, &user_id, &counterpart_id)
            .map_err(|e| {
                error!("Failed to mark conversation read: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;

        let rows = db
            .db
            .get_conversation(&listing_id, &user_id, &counterpart_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        // Two participants and one listing per conversation; resolve once.
        let user = db.db.get_user_by_id(&user_id).unwrap_or_default();
        let counterpart = db.db.get_user_by_id(&counterpart_id).unwrap_or_default();
        let listing = db.db.get_listing_by_id(&listing_id).unwrap_or_default();

        let messages: Vec<_> = rows
            .iter()
            .map(|row| {
                let (sender, receiver) = if row.sender_id == user_id {
                    (user.as_ref(), counterpart.as_ref())
                } else {
                    (counterpart.as_ref(), user.as_ref())
                };
                message_response(row, sender, receiver, listing.as_ref())
            })
            .collect();

        Ok::<_, StatusCode>(messages)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })??;

    Ok(Json(messages))
}

/// Only the sender may delete a message.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let message = state
        .db
        .get_message_by_id(&message_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if message.sender_id != claims.sub.to_string() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    state.db.delete_message(&message.id).map_err(|e| {
        error!("Failed to delete message {}: {}", message.id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(DeleteResponse { id: message_id }))
}
