use axum::{
    Extension,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use docuhub_types::models::{Role, User};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::session;

/// The authenticated caller, resolved once per request from the session
/// cookie and the user's current record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Forbidden".into()))
        }
    }

    /// Ownership gate: admins may act on anything, everyone else only on
    /// records they own.
    pub fn can_access(&self, owner_id: i64) -> bool {
        self.is_admin() || self.id == owner_id
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
        }
    }
}

/// Reject requests without a live session; otherwise attach the `Principal`.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = session::resolve(&state, &jar)?.ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Must be layered inside `require_auth`.
pub async fn require_admin(
    Extension(principal): Extension<Principal>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    principal.require_admin()?;
    Ok(next.run(req).await)
}
