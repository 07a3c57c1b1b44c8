use std::sync::Arc;
use std::time::Duration;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use mercat_db::{Database, SqliteStore, format_ts};
use mercat_gateway::{Dispatcher, Gateway};
use mercat_safety::{SafetyScanner, ThreadGuard};
use mercat_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub store: SqliteStore,
    pub guard: ThreadGuard,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, jwt_secret: String, scanner: SafetyScanner, send_timeout: Duration) -> Self {
        let store = SqliteStore::new(db.clone());
        let guard = ThreadGuard::new(Arc::new(store.clone()))
            .with_scanner(scanner)
            .with_send_timeout(send_timeout);
        Self {
            db,
            store,
            guard,
            dispatcher: Dispatcher::new(),
            jwt_secret,
        }
    }

    pub fn gateway(&self) -> Gateway {
        Gateway {
            dispatcher: self.dispatcher.clone(),
            guard: self.guard.clone(),
            db: self.db.clone(),
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    let email = req.email.trim().to_string();
    let neighborhood = req.neighborhood.trim().to_string();

    // Validate input
    if name.chars().count() < 2 || name.chars().count() > 50 {
        return Err(ApiError::Validation("name must be 2-50 characters".into()));
    }
    if !email.contains('@') || email.len() > 254 {
        return Err(ApiError::Validation("invalid email".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation("password must be at least 8 characters".into()));
    }
    if neighborhood.is_empty() {
        return Err(ApiError::Validation("neighborhood is required".into()));
    }

    if state.db.get_user_by_email(&email)?.is_some() {
        return Err(ApiError::Conflict("email already registered".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();
    let now = format_ts(chrono::Utc::now());

    insert_user(&state.db, user_id, &name, &email, &password_hash, &neighborhood, &now)?;

    let token = create_token(&state.jwt_secret, user_id, &name)?;
    info!("registered user {} ({})", name, user_id);

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

/// Inserts the user. Losing a race with a concurrent registration of the
/// same email hits the UNIQUE index and is reported as a conflict.
fn insert_user(
    db: &Database,
    user_id: Uuid,
    name: &str,
    email: &str,
    password_hash: &str,
    neighborhood: &str,
    now: &str,
) -> Result<(), ApiError> {
    db.create_user(&user_id.to_string(), name, email, password_hash, neighborhood, now)
        .map_err(|e| {
            if mercat_db::is_unique_violation(&e) {
                ApiError::Conflict("email already registered".into())
            } else {
                e.into()
            }
        })
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let invalid = || ApiError::Unauthorized("invalid email or password".into());

    let user = state.db.get_user_by_email(req.email.trim())?.ok_or_else(invalid)?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Internal(format!("stored password hash is unreadable: {}", e)))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| invalid())?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|_| ApiError::Internal(format!("corrupt user id '{}'", user.id)))?;

    let token = create_token(&state.jwt_secret, user_id, &user.name)?;

    Ok(Json(LoginResponse {
        user_id,
        name: user.name,
        token,
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, name: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        name: name.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| ApiError::Internal(format!("token signing failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_insert_is_a_conflict() {
        let db = Database::open_in_memory().unwrap();
        let now = format_ts(chrono::Utc::now());
        insert_user(&db, Uuid::new_v4(), "Núria", "nuria@example.com", "h", "Centre", &now).unwrap();

        let err = insert_user(&db, Uuid::new_v4(), "Otra", "Nuria@Example.com", "h", "Centre", &now).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_code(), "ALREADY_EXISTS");
    }
}
