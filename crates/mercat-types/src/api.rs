use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Condition, ListingStatus, Message};

// -- JWT Claims --

/// JWT claims shared by mercat-api (REST middleware) and mercat-gateway
/// (WebSocket upgrade).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub neighborhood: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub name: String,
    pub token: String,
}

// -- Listings --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateListingRequest {
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub category: String,
    pub condition: Condition,
    pub neighborhood: String,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateListingStatusRequest {
    pub status: ListingStatus,
}

// -- Threads & messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenThreadRequest {
    pub listing_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

/// A sent message, plus the system warning appended after it when the
/// final scan flagged it.
#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message: Message,
    pub warning: Option<Message>,
}

// -- Reviews --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateReviewRequest {
    pub rating: u8,
    pub comment: String,
    pub listing_id: Option<Uuid>,
}

// -- Safety --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanRequest {
    pub text: String,
}
