use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{SecondsFormat, Utc};
use tracing::{error, warn};
use uuid::Uuid;

use campusstay_db::models::{ListingRow, UserRow};
use campusstay_types::api::{Claims, DeleteResponse};

use crate::auth::AppState;
use crate::convert::{decode_string_array, listing_response};
use crate::storage::{ImageStore, MAX_IMAGE_SIZE, MAX_IMAGES_PER_LISTING};

const RECOMMENDATION_LIMIT: u32 = 4;

pub async fn get_listings(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let listings = tokio::task::spawn_blocking(move || {
        let rows = db.db.get_listings().map_err(|e| {
            error!("Failed to load listings: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

        // Owners are loose references; resolve each once and tolerate absence.
        let mut owners: HashMap<String, Option<UserRow>> = HashMap::new();
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let owner = owners
                .entry(row.owner_id.clone())
                .or_insert_with(|| db.db.get_user_by_id(&row.owner_id).unwrap_or_default());
            out.push(listing_response(row, owner.as_ref()));
        }
        Ok::<_, StatusCode>(out)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })??;

    Ok(Json(listings))
}

pub async fn get_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let row = state
        .db
        .get_listing_by_id(&listing_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let owner = state
        .db
        .get_user_by_id(&row.owner_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(listing_response(&row, owner.as_ref())))
}

pub async fn get_recommendations(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let listings = tokio::task::spawn_blocking(move || {
        let reference = db
            .db
            .get_listing_by_id(&listing_id.to_string())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;

        let rows = db
            .db
            .get_recommendations(&reference, RECOMMENDATION_LIMIT)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let owner = db.db.get_user_by_id(&row.owner_id).unwrap_or_default();
            out.push(listing_response(row, owner.as_ref()));
        }
        Ok::<_, StatusCode>(out)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })??;

    Ok(Json(listings))
}

pub async fn create_listing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, StatusCode> {
    let form = read_form(&state.images, multipart).await?;

    if form.image_file_names.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let fields = match parse_fields(&form, None) {
        Ok(fields) => fields,
        Err(code) => {
            discard_images(&state.images, &form.image_file_names).await;
            return Err(code);
        }
    };

    let row = ListingRow {
        id: Uuid::new_v4().to_string(),
        owner_id: claims.sub.to_string(),
        title: fields.title,
        description: fields.description,
        price: fields.price,
        location: fields.location,
        image_file_names: encode_names(&form.image_file_names),
        available_rooms: fields.available_rooms,
        total_rooms: fields.total_rooms,
        facilities: fields.facilities,
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    };

    if let Err(e) = state.db.insert_listing(&row) {
        error!("Failed to insert listing: {}", e);
        discard_images(&state.images, &form.image_file_names).await;
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let owner = state
        .db
        .get_user_by_id(&row.owner_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(listing_response(&row, owner.as_ref()))))
}

pub async fn update_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, StatusCode> {
    // Authorize before touching the multipart body so nothing is written
    // to disk for a rejected request.
    let existing = state
        .db
        .get_listing_by_id(&listing_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if existing.owner_id != claims.sub.to_string() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let form = read_form(&state.images, multipart).await?;

    let fields = match parse_fields(&form, Some(&existing)) {
        Ok(fields) => fields,
        Err(code) => {
            discard_images(&state.images, &form.image_file_names).await;
            return Err(code);
        }
    };

    // New images replace the old set; the old files are removed from disk.
    let image_file_names = if form.image_file_names.is_empty() {
        existing.image_file_names.clone()
    } else {
        let old = decode_string_array(&existing.image_file_names, "image_file_names");
        discard_images(&state.images, &old).await;
        encode_names(&form.image_file_names)
    };

    let row = ListingRow {
        id: existing.id.clone(),
        owner_id: existing.owner_id.clone(),
        title: fields.title,
        description: fields.description,
        price: fields.price,
        location: fields.location,
        image_file_names,
        available_rooms: fields.available_rooms,
        total_rooms: fields.total_rooms,
        facilities: fields.facilities,
        created_at: existing.created_at.clone(),
    };

    state.db.update_listing(&row).map_err(|e| {
        error!("Failed to update listing {}: {}", row.id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let owner = state
        .db
        .get_user_by_id(&row.owner_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(listing_response(&row, owner.as_ref())))
}

pub async fn delete_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let existing = state
        .db
        .get_listing_by_id(&listing_id.to_string())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if existing.owner_id != claims.sub.to_string() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let images = decode_string_array(&existing.image_file_names, "image_file_names");
    discard_images(&state.images, &images).await;

    state.db.delete_listing(&existing.id).map_err(|e| {
        error!("Failed to delete listing {}: {}", existing.id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(DeleteResponse { id: listing_id }))
}

// ── Multipart form handling ─────────────────────────────────────────────

#[derive(Default)]
struct ListingForm {
    title: Option<String>,
    description: Option<String>,
    price: Option<String>,
    location: Option<String>,
    available_rooms: Option<String>,
    total_rooms: Option<String>,
    facilities: Option<String>,
    image_file_names: Vec<String>,
}

#[derive(Debug)]
struct ListingFields {
    title: String,
    description: String,
    price: f64,
    location: String,
    available_rooms: i64,
    total_rooms: i64,
    facilities: String,
}

/// Drain the multipart body: text fields into the form, image parts onto
/// disk. Already-saved images are removed again if a later part fails.
async fn read_form(images: &ImageStore, mut multipart: Multipart) -> Result<ListingForm, StatusCode> {
    let mut form = ListingForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(_) => {
                discard_images(images, &form.image_file_names).await;
                return Err(StatusCode::BAD_REQUEST);
            }
        };

        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == "images" {
            if form.image_file_names.len() >= MAX_IMAGES_PER_LISTING {
                discard_images(images, &form.image_file_names).await;
                return Err(StatusCode::BAD_REQUEST);
            }

            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let Some(ext) =
                ImageStore::allowed_extension(file_name.as_deref(), content_type.as_deref())
            else {
                discard_images(images, &form.image_file_names).await;
                return Err(StatusCode::BAD_REQUEST);
            };

            let data = match field.bytes().await {
                Ok(data) => data,
                Err(_) => {
                    discard_images(images, &form.image_file_names).await;
                    return Err(StatusCode::BAD_REQUEST);
                }
            };
            if data.is_empty() {
                discard_images(images, &form.image_file_names).await;
                return Err(StatusCode::BAD_REQUEST);
            }
            if data.len() > MAX_IMAGE_SIZE {
                discard_images(images, &form.image_file_names).await;
                return Err(StatusCode::PAYLOAD_TOO_LARGE);
            }

            match images.save(ext, &data).await {
                Ok(name) => form.image_file_names.push(name),
                Err(e) => {
                    error!("Failed to store uploaded image: {}", e);
                    discard_images(images, &form.image_file_names).await;
                    return Err(StatusCode::INTERNAL_SERVER_ERROR);
                }
            }
            continue;
        }

        let text = match field.text().await {
            Ok(text) => text,
            Err(_) => {
                discard_images(images, &form.image_file_names).await;
                return Err(StatusCode::BAD_REQUEST);
            }
        };

        match name.as_str() {
            "title" => form.title = Some(text),
            "description" => form.description = Some(text),
            "price" => form.price = Some(text),
            "location" => form.location = Some(text),
            "available_rooms" => form.available_rooms = Some(text),
            "total_rooms" => form.total_rooms = Some(text),
            "facilities" => form.facilities = Some(text),
            _ => {}
        }
    }

    Ok(form)
}

/// Merge form fields over the existing row (update) or require them (create).
fn parse_fields(form: &ListingForm, existing: Option<&ListingRow>) -> Result<ListingFields, StatusCode> {
    let title = form
        .title
        .clone()
        .or_else(|| existing.map(|l| l.title.clone()))
        .filter(|t| !t.trim().is_empty())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let location = form
        .location
        .clone()
        .or_else(|| existing.map(|l| l.location.clone()))
        .filter(|l| !l.trim().is_empty())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let description = form
        .description
        .clone()
        .or_else(|| existing.map(|l| l.description.clone()))
        .unwrap_or_default();

    let price = match &form.price {
        Some(raw) => raw.trim().parse::<f64>().map_err(|_| StatusCode::BAD_REQUEST)?,
        None => existing.map(|l| l.price).ok_or(StatusCode::BAD_REQUEST)?,
    };
    if !price.is_finite() || price < 0.0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let total_rooms = match &form.total_rooms {
        Some(raw) => raw.trim().parse::<i64>().map_err(|_| StatusCode::BAD_REQUEST)?,
        None => existing.map(|l| l.total_rooms).unwrap_or(1),
    };
    if total_rooms < 1 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let available_rooms = match &form.available_rooms {
        Some(raw) => raw.trim().parse::<i64>().map_err(|_| StatusCode::BAD_REQUEST)?,
        None => existing.map(|l| l.available_rooms).unwrap_or(total_rooms),
    };
    if available_rooms < 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Facilities arrive as a JSON array string; store the canonical encoding.
    let facilities = match &form.facilities {
        Some(raw) => {
            let list: Vec<String> =
                serde_json::from_str(raw).map_err(|_| StatusCode::BAD_REQUEST)?;
            encode_names(&list)
        }
        None => existing
            .map(|l| l.facilities.clone())
            .unwrap_or_else(|| "[]".to_string()),
    };

    Ok(ListingFields {
        title,
        description,
        price,
        location,
        available_rooms,
        total_rooms,
        facilities,
    })
}

fn encode_names(names: &[String]) -> String {
    serde_json::to_string(names).unwrap_or_else(|_| "[]".to_string())
}

/// Best-effort removal of uploaded files after a failed or replaced write.
async fn discard_images(images: &ImageStore, names: &[String]) {
    for name in names {
        if let Err(e) = images.delete(name).await {
            warn!("Failed to remove image {}: {}", name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn existing_row() -> ListingRow {
        ListingRow {
            id: "listing-1".to_string(),
            owner_id: "owner-1".to_string(),
            title: "Old title".to_string(),
            description: "Old description".to_string(),
            price: 500.0,
            location: "North End".to_string(),
            image_file_names: r#"["images-a.jpg"]"#.to_string(),
            available_rooms: 2,
            total_rooms: 3,
            facilities: r#"["wifi"]"#.to_string(),
            created_at: "2026-01-01T00:00:00.000000Z".to_string(),
        }
    }

    #[test]
    fn create_requires_title_price_location() {
        let form = ListingForm {
            title: Some("Room".to_string()),
            price: Some("450".to_string()),
            location: Some("Downtown".to_string()),
            ..Default::default()
        };
        let fields = parse_fields(&form, None).unwrap();
        assert_eq!(fields.price, 450.0);
        assert_eq!(fields.total_rooms, 1);
        assert_eq!(fields.available_rooms, 1);
        assert_eq!(fields.facilities, "[]");

        let missing_price = ListingForm {
            title: Some("Room".to_string()),
            location: Some("Downtown".to_string()),
            ..Default::default()
        };
        assert_eq!(parse_fields(&missing_price, None).unwrap_err(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn available_rooms_defaults_to_total() {
        let form = ListingForm {
            title: Some("Room".to_string()),
            price: Some("450".to_string()),
            location: Some("Downtown".to_string()),
            total_rooms: Some("4".to_string()),
            ..Default::default()
        };
        let fields = parse_fields(&form, None).unwrap();
        assert_eq!(fields.total_rooms, 4);
        assert_eq!(fields.available_rooms, 4);
    }

    #[test]
    fn update_keeps_unset_fields() {
        let existing = existing_row();
        let form = ListingForm {
            price: Some("620.5".to_string()),
            ..Default::default()
        };
        let fields = parse_fields(&form, Some(&existing)).unwrap();
        assert_eq!(fields.title, "Old title");
        assert_eq!(fields.price, 620.5);
        assert_eq!(fields.location, "North End");
        assert_eq!(fields.facilities, r#"["wifi"]"#);
        assert_eq!(fields.available_rooms, 2);
    }

    #[test]
    fn rejects_bad_numbers_and_facilities() {
        let base = || ListingForm {
            title: Some("Room".to_string()),
            price: Some("450".to_string()),
            location: Some("Downtown".to_string()),
            ..Default::default()
        };

        let mut form = base();
        form.price = Some("not-a-number".to_string());
        assert!(parse_fields(&form, None).is_err());

        let mut form = base();
        form.price = Some("-10".to_string());
        assert!(parse_fields(&form, None).is_err());

        let mut form = base();
        form.total_rooms = Some("0".to_string());
        assert!(parse_fields(&form, None).is_err());

        let mut form = base();
        form.facilities = Some("wifi,parking".to_string());
        assert!(parse_fields(&form, None).is_err());
    }
}
