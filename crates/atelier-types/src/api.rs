use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, Product, Role, User, UserSummary};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway handshake.
/// Canonical definition lives here to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
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
    pub success: bool,
    pub token: String,
    pub user: User,
}

// -- Chat --

#[derive(Debug, Serialize)]
pub struct AdminResponse {
    pub success: bool,
    pub admin: User,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub success: bool,
    pub count: usize,
    pub messages: Vec<ChatMessage>,
}

/// One row of the conversation overview: the other participant, the last
/// message exchanged, and how many of the caller's messages are unread.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub user: UserSummary,
    pub last_message: ChatMessage,
    pub unread_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub success: bool,
    pub count: usize,
    pub conversations: Vec<ConversationSummary>,
}

// -- Products --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: String,
    pub price: f64,
    #[serde(default)]
    pub stock: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub success: bool,
    pub product: Product,
}

#[derive(Debug, Serialize)]
pub struct ProductsResponse {
    pub success: bool,
    pub count: usize,
    pub products: Vec<Product>,
}

// -- Reviews --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateReviewRequest {
    pub title: String,
    pub comment: String,
    pub rating: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateReviewRequest {
    pub title: Option<String>,
    pub comment: Option<String>,
    pub rating: Option<i64>,
}

// -- Misc --

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
    pub message: String,
}
