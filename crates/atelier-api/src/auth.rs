use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use atelier_db::queries::user_from_row;
use atelier_db::{Database, models::UserRow};
use atelier_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};
use atelier_types::models::Role;

use crate::error::{ApiError, ApiResult, blocking};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    /// Shared with the gateway, which persists messages on its own tasks.
    pub db: Arc<Database>,
    pub jwt_secret: String,
}

/// Argon2id hash of a plaintext password, used at registration and when
/// seeding the default admin.
pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hash failed: {e}")))?
        .to_string())
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::validation("name", "Name is required"));
    }
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ApiError::validation("email", "Email is not valid"));
    }
    if req.password.len() < 6 {
        return Err(ApiError::validation(
            "password",
            "Password must be at least 6 characters",
        ));
    }

    // Hash before touching storage.
    let password_hash = hash_password(&req.password)?;

    let user_id = Uuid::new_v4();

    let row = {
        let state = state.clone();
        let email = email.clone();
        blocking(move || {
            if state.db.get_user_by_email(&email)?.is_some() {
                return Err(ApiError::Conflict("Email is already registered".into()));
            }
            state
                .db
                .create_user(&user_id.to_string(), &name, &email, &password_hash, "user")?;
            let row = state
                .db
                .get_user_by_id(&user_id.to_string())?
                .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("user vanished after insert")))?;
            Ok(row)
        })
        .await?
    };

    let token = create_token(&state.jwt_secret, &row)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            token,
            user: user_from_row(row),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let email = req.email.trim().to_lowercase();

    let row = {
        let state = state.clone();
        blocking(move || {
            state
                .db
                .get_user_by_email(&email)?
                .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".into()))
        })
        .await?
    };

    let parsed_hash = PasswordHash::new(&row.password)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("stored hash unreadable: {e}")))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized("Invalid credentials".into()))?;

    let token = create_token(&state.jwt_secret, &row)?;

    Ok(Json(AuthResponse {
        success: true,
        token,
        user: user_from_row(row),
    }))
}

pub fn create_token(secret: &str, user: &UserRow) -> ApiResult<String> {
    let sub: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt user id '{}': {e}", user.id)))?;

    let claims = Claims {
        sub,
        name: user.name.clone(),
        role: Role::parse(&user.role),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("token encode failed: {e}")))
}
