use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use mercat_db::models::ListingRow;
use mercat_db::{ListingFilter, format_ts};
use mercat_types::api::{Claims, CreateListingRequest, UpdateListingStatusRequest};
use mercat_types::events::GatewayEvent;
use mercat_types::models::{Listing, ListingStatus};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::run_db;

const MAX_TITLE_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 2000;
const MAX_IMAGES: usize = 10;

#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub neighborhood: Option<String>,
    pub limit: Option<u32>,
}

impl From<ListingQuery> for ListingFilter {
    fn from(q: ListingQuery) -> Self {
        ListingFilter {
            search: q.search,
            category: q.category,
            neighborhood: q.neighborhood,
            limit: q.limit,
        }
    }
}

pub(crate) async fn load_listing(state: &AppState, listing_id: Uuid) -> Result<Listing, ApiError> {
    let id = listing_id.to_string();
    let row = run_db(state, move |db| db.get_listing(&id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("listing {} not found", listing_id)))?;
    Ok(Listing::try_from(row)?)
}

pub async fn list_listings(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = ListingFilter::from(query);
    let listings = run_db(&state, move |db| {
        db.list_listings(&filter)?
            .into_iter()
            .map(Listing::try_from)
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await?;
    Ok(Json(listings))
}

pub async fn get_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(load_listing(&state, listing_id).await?))
}

fn validate(req: &CreateListingRequest) -> Result<(), ApiError> {
    let title = req.title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::Validation(format!("title must be 1-{} characters", MAX_TITLE_CHARS)));
    }
    if req.description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(ApiError::Validation(format!(
            "description must be at most {} characters",
            MAX_DESCRIPTION_CHARS
        )));
    }
    if req.price_cents < 0 {
        return Err(ApiError::Validation("price cannot be negative".into()));
    }
    if req.category.trim().is_empty() || req.neighborhood.trim().is_empty() {
        return Err(ApiError::Validation("category and neighborhood are required".into()));
    }
    if req.images.len() > MAX_IMAGES {
        return Err(ApiError::Validation(format!("at most {} images", MAX_IMAGES)));
    }
    Ok(())
}

pub async fn create_listing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateListingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate(&req)?;

    let listing_id = Uuid::new_v4();
    let row = ListingRow {
        id: listing_id.to_string(),
        seller_id: claims.sub.to_string(),
        seller_name: claims.name.clone(),
        seller_verified: false,
        title: req.title.trim().to_string(),
        description: req.description.trim().to_string(),
        price_cents: req.price_cents,
        currency: "EUR".into(),
        category: req.category.trim().to_string(),
        condition: req.condition.as_str().to_string(),
        neighborhood: req.neighborhood.trim().to_string(),
        images: serde_json::to_string(&req.images)
            .map_err(|e| ApiError::Internal(format!("images could not be encoded: {}", e)))?,
        status: ListingStatus::Active.as_str().to_string(),
        likes: 0,
        created_at: format_ts(chrono::Utc::now()),
    };
    run_db(&state, move |db| db.insert_listing(&row)).await?;
    info!("user {} listed {}", claims.sub, listing_id);

    Ok((StatusCode::CREATED, Json(load_listing(&state, listing_id).await?)))
}

/// Only the seller may move a listing between active, reserved and sold.
pub async fn update_listing_status(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateListingStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut listing = load_listing(&state, listing_id).await?;
    if listing.seller_id != claims.sub {
        return Err(ApiError::PermissionDenied("only the seller can change a listing's status".into()));
    }

    if listing.status != req.status {
        let id = listing_id.to_string();
        let status = req.status;
        run_db(&state, move |db| db.update_listing_status(&id, status.as_str())).await?;
        listing.status = req.status;

        state.dispatcher.broadcast(GatewayEvent::ListingStatusChange {
            listing_id,
            status: req.status,
        });
        info!("listing {} is now {}", listing_id, req.status.as_str());
    }

    Ok(Json(listing))
}
