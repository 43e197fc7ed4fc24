/// Row types for the three tables, one field per column. The API response
/// shapes live in campusstay-types; these stay store-faithful, so
/// `image_file_names` and `facilities` hold their JSON arrays as stored
/// TEXT and decoding happens at the API boundary.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ListingRow {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub location: String,
    pub image_file_names: String,
    pub available_rooms: i64,
    pub total_rooms: i64,
    pub facilities: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub listing_id: String,
    pub body: String,
    pub read: bool,
    pub created_at: String,
}
