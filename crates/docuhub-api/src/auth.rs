use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Extension, Json, extract::State};
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, warn};

use docuhub_db::Database;
use docuhub_db::models::NewUser;
use docuhub_pipeline::Pipeline;
use docuhub_types::api::{LoginRequest, MessageResponse, SignupRequest};
use docuhub_types::models::{Role, User};

use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::middleware::Principal;
use crate::session::{self, SessionSettings};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub pipeline: Pipeline,
    pub sessions: SessionSettings,
}

/// Argon2id with a fresh random salt, PHC string output.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

/// A mismatch is `InvalidCredentials`; an unparseable stored hash is internal.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<(), ApiError> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| anyhow::anyhow!("stored password hash is corrupt: {}", e))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| ApiError::InvalidCredentials)
}

/// Make sure an admin account exists under `username`. Returns true if it
/// had to be created. An existing non-admin account is left alone.
pub fn ensure_admin(db: &Database, username: &str, password: &str) -> anyhow::Result<bool> {
    if let Some(existing) = db.get_user_by_username(username)? {
        if existing.role != Role::Admin {
            warn!("Seed admin '{}' exists without the admin role; leaving it unchanged", username);
        }
        return Ok(false);
    }

    let password_hash = hash_password(password)?;
    let created = db.create_user(&NewUser {
        username,
        password_hash: &password_hash,
        name: "Administrator",
        email: "admin@localhost",
        role: Role::Admin,
    })?;

    if created.is_some() {
        info!("Seeded admin account '{}'", username);
    }
    Ok(created.is_some())
}

/// POST /api/auth/signup
///
/// Anonymous callers always get the `user` role and are logged in as the new
/// account. An admin (the user-management screen) may pick the role and
/// keeps their own session.
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidJson(req): ValidJson<SignupRequest>,
) -> Result<(CookieJar, Json<User>), ApiError> {
    let caller = session::resolve(&state, &jar)?;
    let created_by_admin = caller.as_ref().is_some_and(Principal::is_admin);

    let role = match (created_by_admin, req.role) {
        (true, role) => role.unwrap_or_default(),
        (false, Some(Role::Admin)) => {
            warn!("Anonymous signup for '{}' asked for admin role; downgraded", req.username);
            Role::User
        }
        (false, _) => Role::User,
    };

    let password_hash = hash_password(&req.password)?;
    let user = state
        .db
        .create_user(&NewUser {
            username: &req.username,
            password_hash: &password_hash,
            name: &req.name,
            email: &req.email,
            role,
        })?
        .ok_or_else(|| ApiError::field("username", "Username already exists"))?;

    info!("User {} ({}) signed up as {}", user.username, user.id, user.role);

    let jar = if created_by_admin {
        jar
    } else {
        session::start(&state, jar, user.id)?
    };
    Ok((jar, Json(user)))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidJson(req): ValidJson<LoginRequest>,
) -> Result<(CookieJar, Json<User>), ApiError> {
    let row = state
        .db
        .get_user_by_username(&req.username)?
        .ok_or(ApiError::InvalidCredentials)?;

    verify_password(&req.password, &row.password_hash)?;

    let user = User::from(row);
    let jar = session::start(&state, jar, user.id)?;

    info!("User {} ({}) logged in", user.username, user.id);
    Ok((jar, Json(user)))
}

/// POST /api/auth/logout
///
/// Idempotent: succeeds without a session too.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), ApiError> {
    let jar = session::end(&state, jar)?;
    Ok((jar, Json(MessageResponse::new("Logged out successfully"))))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<User>, ApiError> {
    let user = state
        .db
        .get_user(principal.id)?
        .ok_or_else(|| ApiError::not_found("User"))?;
    Ok(Json(user))
}
