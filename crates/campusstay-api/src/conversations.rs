//! Conversation aggregation: folds the flat message log into one inbox entry
//! per (listing, counterpart) pair for the requesting user.
//!
//! The fold is a pure single pass over an in-memory snapshot. Message
//! timestamps are written by the store as RFC 3339 UTC with fixed-width
//! fractional seconds, so comparing them as strings is chronological; the
//! message id breaks exact ties, which makes the result independent of the
//! order the rows arrive in.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use thiserror::Error;
use tracing::error;

use campusstay_db::Database;
use campusstay_db::models::{ListingRow, MessageRow, UserRow};
use campusstay_types::api::{Claims, ConversationResponse};

use crate::auth::AppState;
use crate::convert::{listing_summary, parse_timestamp, parse_uuid, user_public};

/// A message row missing one of its references cannot be attributed to a
/// group. Dropping it would understate unread counts, so the whole
/// aggregation aborts instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("message {id} has an empty {field} reference")]
    MissingField { id: String, field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    pub listing_id: String,
    pub counterpart_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub key: ConversationKey,
    pub last_message: String,
    pub last_message_at: String,
    pub unread_count: u32,
}

struct Accumulator {
    last_at: String,
    last_id: String,
    last_body: String,
    unread: u32,
}

/// Fold `messages` (every message where `user_id` is sender or receiver —
/// the caller guarantees that filter) into per-(listing, counterpart)
/// summaries, newest conversation first.
pub fn aggregate(
    user_id: &str,
    messages: &[MessageRow],
) -> Result<Vec<ConversationSummary>, IntegrityError> {
    let mut groups: HashMap<ConversationKey, Accumulator> = HashMap::new();

    for message in messages {
        require_field(message, "sender", &message.sender_id)?;
        require_field(message, "receiver", &message.receiver_id)?;
        require_field(message, "listing", &message.listing_id)?;

        // Group membership ignores who sent it; only the non-requesting
        // party and the listing identify the conversation.
        let counterpart = if message.sender_id == user_id {
            &message.receiver_id
        } else {
            &message.sender_id
        };
        let key = ConversationKey {
            listing_id: message.listing_id.clone(),
            counterpart_id: counterpart.clone(),
        };

        // Unread attribution does depend on direction: only messages the
        // requester received count toward their unread total.
        let unread = u32::from(message.receiver_id == user_id && !message.read);

        match groups.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(Accumulator {
                    last_at: message.created_at.clone(),
                    last_id: message.id.clone(),
                    last_body: message.body.clone(),
                    unread,
                });
            }
            Entry::Occupied(mut slot) => {
                let acc = slot.get_mut();
                acc.unread += unread;
                if (message.created_at.as_str(), message.id.as_str())
                    > (acc.last_at.as_str(), acc.last_id.as_str())
                {
                    acc.last_at = message.created_at.clone();
                    acc.last_id = message.id.clone();
                    acc.last_body = message.body.clone();
                }
            }
        }
    }

    let mut summaries: Vec<ConversationSummary> = groups
        .into_iter()
        .map(|(key, acc)| ConversationSummary {
            key,
            last_message: acc.last_body,
            last_message_at: acc.last_at,
            unread_count: acc.unread,
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.last_message_at
            .cmp(&a.last_message_at)
            .then_with(|| a.key.cmp(&b.key))
    });

    Ok(summaries)
}

fn require_field(
    message: &MessageRow,
    field: &'static str,
    value: &str,
) -> Result<(), IntegrityError> {
    if value.is_empty() {
        return Err(IntegrityError::MissingField {
            id: message.id.clone(),
            field,
        });
    }
    Ok(())
}

/// Annotate summaries with counterpart profiles and listing details.
/// References are loose, so a user or listing deleted after the messages
/// were written resolves to `None` instead of failing the join.
fn enrich(db: &Database, summaries: &[ConversationSummary]) -> Vec<ConversationResponse> {
    // The same counterpart or listing can appear in several groups;
    // resolve each id once.
    let mut users: HashMap<String, Option<UserRow>> = HashMap::new();
    let mut listings: HashMap<String, Option<ListingRow>> = HashMap::new();

    let mut out = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let counterpart = users
            .entry(summary.key.counterpart_id.clone())
            .or_insert_with(|| db.get_user_by_id(&summary.key.counterpart_id).unwrap_or_default());
        let listing = listings
            .entry(summary.key.listing_id.clone())
            .or_insert_with(|| db.get_listing_by_id(&summary.key.listing_id).unwrap_or_default());

        out.push(ConversationResponse {
            listing_id: parse_uuid(&summary.key.listing_id, "listing"),
            counterpart_id: parse_uuid(&summary.key.counterpart_id, "user"),
            last_message: summary.last_message.clone(),
            last_message_at: parse_timestamp(&summary.last_message_at, "conversation"),
            unread_count: summary.unread_count,
            counterpart: counterpart.as_ref().map(user_public),
            listing: listing.as_ref().map(listing_summary),
        });
    }
    out
}

/// GET /api/messages — the requesting user's inbox: one summary per
/// conversation, annotated with counterpart profile and listing details.
pub async fn get_all_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let user_id = claims.sub.to_string();

    let conversations = tokio::task::spawn_blocking(move || {
        let rows = db.db.get_messages_for_user(&user_id).map_err(|e| {
            error!("Failed to load messages for {}: {}", user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

        let summaries = aggregate(&user_id, &rows).map_err(|e| {
            error!("Conversation aggregation failed for {}: {}", user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

        Ok::<_, StatusCode>(enrich(&db.db, &summaries))
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })??;

    Ok(Json(conversations))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "alice";
    const BOB: &str = "bob";
    const CARA: &str = "cara";
    const L1: &str = "listing-1";
    const L2: &str = "listing-2";

    fn msg(
        id: &str,
        sender: &str,
        receiver: &str,
        listing: &str,
        body: &str,
        read: bool,
        at: &str,
    ) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            listing_id: listing.to_string(),
            body: body.to_string(),
            read,
            created_at: format!("2026-08-01T{at}.000000Z"),
        }
    }

    fn key(listing: &str, counterpart: &str) -> ConversationKey {
        ConversationKey {
            listing_id: listing.to_string(),
            counterpart_id: counterpart.to_string(),
        }
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert_eq!(aggregate(ALICE, &[]).unwrap(), vec![]);
    }

    #[test]
    fn groups_by_listing_and_counterpart_with_unread_counts() {
        // 3 messages with bob about L1 (2 unread, alice receiving), 1 read
        // message with cara about L2.
        let messages = vec![
            msg("m1", ALICE, BOB, L1, "hi", true, "10:00:00"),
            msg("m2", BOB, ALICE, L1, "hello", false, "10:01:00"),
            msg("m3", BOB, ALICE, L1, "still interested?", false, "10:02:00"),
            msg("m4", CARA, ALICE, L2, "sold", true, "09:00:00"),
        ];

        let summaries = aggregate(ALICE, &messages).unwrap();
        assert_eq!(summaries.len(), 2);

        // newest conversation first
        assert_eq!(summaries[0].key, key(L1, BOB));
        assert_eq!(summaries[0].unread_count, 2);
        assert_eq!(summaries[0].last_message, "still interested?");
        assert_eq!(summaries[1].key, key(L2, CARA));
        assert_eq!(summaries[1].unread_count, 0);
    }

    #[test]
    fn direction_does_not_split_groups() {
        let messages = vec![
            msg("m1", ALICE, BOB, L1, "a", true, "10:00:00"),
            msg("m2", BOB, ALICE, L1, "b", true, "10:01:00"),
        ];
        let summaries = aggregate(ALICE, &messages).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].key, key(L1, BOB));
    }

    #[test]
    fn same_counterpart_different_listings_are_distinct_groups() {
        let messages = vec![
            msg("m1", BOB, ALICE, L1, "about L1", false, "10:00:00"),
            msg("m2", BOB, ALICE, L2, "about L2", false, "11:00:00"),
        ];
        let summaries = aggregate(ALICE, &messages).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].key, key(L2, BOB));
        assert_eq!(summaries[1].key, key(L1, BOB));
    }

    #[test]
    fn every_message_lands_in_exactly_one_group() {
        let messages = vec![
            msg("m1", ALICE, BOB, L1, "a", false, "10:00:00"),
            msg("m2", BOB, ALICE, L1, "b", false, "10:01:00"),
            msg("m3", ALICE, CARA, L1, "c", false, "10:02:00"),
            msg("m4", CARA, ALICE, L2, "d", false, "10:03:00"),
            msg("m5", BOB, ALICE, L2, "e", true, "10:04:00"),
        ];
        let summaries = aggregate(ALICE, &messages).unwrap();

        // membership is total: group sizes sum to the input size
        let count_for = |k: &ConversationKey| {
            messages
                .iter()
                .filter(|m| {
                    let counterpart = if m.sender_id == ALICE { &m.receiver_id } else { &m.sender_id };
                    m.listing_id == k.listing_id && *counterpart == k.counterpart_id
                })
                .count()
        };
        let total: usize = summaries.iter().map(|s| count_for(&s.key)).sum();
        assert_eq!(total, messages.len());

        // and unread equals the receiver-side unread tally per group
        for summary in &summaries {
            let expected = messages
                .iter()
                .filter(|m| {
                    let counterpart = if m.sender_id == ALICE { &m.receiver_id } else { &m.sender_id };
                    m.listing_id == summary.key.listing_id
                        && *counterpart == summary.key.counterpart_id
                        && m.receiver_id == ALICE
                        && !m.read
                })
                .count() as u32;
            assert_eq!(summary.unread_count, expected, "group {:?}", summary.key);
        }
    }

    #[test]
    fn own_unread_messages_never_count() {
        // bob has not read either of alice's messages; alice's own inbox
        // still shows zero unread for the conversation.
        let messages = vec![
            msg("m1", ALICE, BOB, L1, "a", false, "10:00:00"),
            msg("m2", ALICE, BOB, L1, "b", false, "10:01:00"),
        ];
        let summaries = aggregate(ALICE, &messages).unwrap();
        assert_eq!(summaries[0].unread_count, 0);

        // the same snapshot aggregated for bob shows both
        let summaries = aggregate(BOB, &messages).unwrap();
        assert_eq!(summaries[0].unread_count, 2);
    }

    #[test]
    fn last_message_is_the_maximum_timestamp() {
        let messages = vec![
            msg("m1", BOB, ALICE, L1, "first", true, "10:00:00"),
            msg("m3", BOB, ALICE, L1, "last", true, "12:00:00"),
            msg("m2", BOB, ALICE, L1, "middle", true, "11:00:00"),
        ];
        let summaries = aggregate(ALICE, &messages).unwrap();
        assert_eq!(summaries[0].last_message, "last");
        assert_eq!(summaries[0].last_message_at, "2026-08-01T12:00:00.000000Z");
    }

    #[test]
    fn result_is_independent_of_input_order() {
        let mut messages = vec![
            msg("m1", ALICE, BOB, L1, "a", true, "10:00:00"),
            msg("m2", BOB, ALICE, L1, "b", false, "10:30:00"),
            msg("m3", CARA, ALICE, L2, "c", false, "11:00:00"),
            msg("m4", ALICE, CARA, L2, "d", true, "09:00:00"),
            msg("m5", BOB, ALICE, L2, "e", false, "10:45:00"),
        ];

        let baseline = aggregate(ALICE, &messages).unwrap();

        messages.reverse();
        assert_eq!(aggregate(ALICE, &messages).unwrap(), baseline);

        // a rotation as a second permutation
        messages.rotate_left(2);
        assert_eq!(aggregate(ALICE, &messages).unwrap(), baseline);
    }

    #[test]
    fn equal_timestamps_break_ties_by_group_key() {
        let messages = vec![
            msg("m1", BOB, ALICE, L2, "b", true, "10:00:00"),
            msg("m2", CARA, ALICE, L1, "c", true, "10:00:00"),
        ];
        let summaries = aggregate(ALICE, &messages).unwrap();
        // listing id orders before counterpart id
        assert_eq!(summaries[0].key, key(L1, CARA));
        assert_eq!(summaries[1].key, key(L2, BOB));
    }

    #[test]
    fn blank_reference_aborts_the_aggregation() {
        let messages = vec![
            msg("m1", BOB, ALICE, L1, "fine", false, "10:00:00"),
            msg("m2", BOB, ALICE, "", "broken", false, "10:01:00"),
        ];
        let err = aggregate(ALICE, &messages).unwrap_err();
        assert_eq!(
            err,
            IntegrityError::MissingField { id: "m2".to_string(), field: "listing" }
        );

        let messages = vec![msg("m3", "", ALICE, L1, "broken", false, "10:00:00")];
        assert_eq!(
            aggregate(ALICE, &messages).unwrap_err(),
            IntegrityError::MissingField { id: "m3".to_string(), field: "sender" }
        );
    }

    #[test]
    fn reading_a_conversation_clears_its_unread_count() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message("m1", BOB, ALICE, L1, "hi").unwrap();
        db.insert_message("m2", BOB, ALICE, L1, "anyone there?").unwrap();
        db.insert_message("m3", ALICE, CARA, L2, "taking it").unwrap();
        db.mark_conversation_read(L2, CARA, ALICE).unwrap();

        let rows = db.get_messages_for_user(ALICE).unwrap();
        let before = aggregate(ALICE, &rows).unwrap();
        let l1 = before.iter().find(|s| s.key == key(L1, BOB)).unwrap();
        assert_eq!(l1.unread_count, 2);

        // opening the (L1, bob) conversation marks both messages read; the
        // next aggregation over a fresh snapshot reflects that
        db.mark_conversation_read(L1, ALICE, BOB).unwrap();
        let rows = db.get_messages_for_user(ALICE).unwrap();
        let after = aggregate(ALICE, &rows).unwrap();
        let l1 = after.iter().find(|s| s.key == key(L1, BOB)).unwrap();
        assert_eq!(l1.unread_count, 0);

        // a listing row was never created for L1; the enrichment lookup
        // resolves to absent rather than failing
        assert!(db.get_listing_by_id(L1).unwrap().is_none());
    }

    #[test]
    fn missing_references_enrich_to_null_fields() {
        let db = Database::open_in_memory().unwrap();

        let alice = uuid::Uuid::new_v4().to_string();
        let bob = uuid::Uuid::new_v4().to_string();
        let ghost = uuid::Uuid::new_v4().to_string();
        let listing = uuid::Uuid::new_v4().to_string();
        let gone_listing = uuid::Uuid::new_v4().to_string();

        db.create_user(&bob, "bob", "bob@campus.test", "hash").unwrap();
        db.insert_listing(&ListingRow {
            id: listing.clone(),
            owner_id: bob.clone(),
            title: "Room with a view".to_string(),
            description: String::new(),
            price: 450.0,
            location: "North End".to_string(),
            image_file_names: r#"["images-a.jpg"]"#.to_string(),
            available_rooms: 1,
            total_rooms: 1,
            facilities: "[]".to_string(),
            created_at: "2026-08-01T09:00:00.000000Z".to_string(),
        })
        .unwrap();

        // one conversation with full references, one whose listing and
        // counterpart rows were never persisted
        db.insert_message("m1", &bob, &alice, &listing, "hi").unwrap();
        db.insert_message("m2", &ghost, &alice, &gone_listing, "still here?").unwrap();

        let rows = db.get_messages_for_user(&alice).unwrap();
        let summaries = aggregate(&alice, &rows).unwrap();
        let enriched = enrich(&db, &summaries);
        assert_eq!(enriched.len(), 2);

        let with_refs = enriched
            .iter()
            .find(|c| c.counterpart_id.to_string() == bob)
            .unwrap();
        assert_eq!(with_refs.counterpart.as_ref().unwrap().username, "bob");
        assert_eq!(with_refs.listing.as_ref().unwrap().title, "Room with a view");
        assert_eq!(with_refs.unread_count, 1);

        let dangling = enriched
            .iter()
            .find(|c| c.counterpart_id.to_string() == ghost)
            .unwrap();
        assert!(dangling.counterpart.is_none());
        assert!(dangling.listing.is_none());
        assert_eq!(dangling.unread_count, 1);
        assert_eq!(dangling.last_message, "still here?");
    }

    #[test]
    fn recomputation_is_idempotent() {
        let messages = vec![
            msg("m1", BOB, ALICE, L1, "a", false, "10:00:00"),
            msg("m2", ALICE, BOB, L1, "b", true, "10:01:00"),
        ];
        let first = aggregate(ALICE, &messages).unwrap();
        let second = aggregate(ALICE, &messages).unwrap();
        assert_eq!(first, second);
    }
}
