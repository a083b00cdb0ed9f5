/// Database row types — these map directly to SQLite rows.
/// Distinct from the atelier-types API models to keep the storage layer
/// independent; conversion happens in `queries`.

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<String>,
    pub created_at: String,
}

/// A message row joined with both participants' display fields.
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub receiver_id: String,
    pub receiver_name: String,
    pub receiver_avatar: Option<String>,
    pub content: String,
    pub read: bool,
    pub read_at: Option<String>,
    pub created_at: String,
}

pub struct ProductRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub stock: i64,
    pub created_by: String,
    pub created_at: String,
}

/// A review row joined with the reviewer's display fields.
pub struct ReviewRow {
    pub id: String,
    pub product_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_avatar: Option<String>,
    pub title: String,
    pub comment: String,
    pub rating: i64,
    pub created_at: String,
}
