//! Server-side sessions behind an opaque cookie.
//!
//! The cookie only carries a random token; the user it belongs to and its
//! expiry live in the store. Every authenticated request pushes the expiry
//! forward by the configured TTL.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{TimeDelta, Utc};
use rand::RngCore;
use tracing::debug;

use crate::auth::AppStateInner;
use crate::error::ApiError;
use crate::middleware::Principal;

pub const SESSION_COOKIE: &str = "docuhub.sid";

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Sliding lifetime of a session.
    pub ttl: TimeDelta,
    /// Mark the cookie `Secure` (HTTPS deployments).
    pub cookie_secure: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl: TimeDelta::days(7),
            cookie_secure: false,
        }
    }
}

/// 256 random bits, base64url.
pub fn new_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

/// Open a session for `user_id` and attach its cookie. Any session the
/// request already carried is dropped first.
pub fn start(state: &AppStateInner, jar: CookieJar, user_id: i64) -> Result<CookieJar, ApiError> {
    if let Some(previous) = jar.get(SESSION_COOKIE) {
        state.db.delete_session(previous.value())?;
    }

    let token = new_token();
    let expires_at = (Utc::now() + state.sessions.ttl).timestamp();
    state.db.create_session(&token, user_id, expires_at)?;

    debug!("Session opened for user {}", user_id);
    Ok(jar.add(session_cookie(token, state.sessions.cookie_secure)))
}

/// Destroy the request's session, if any, and clear the cookie.
pub fn end(state: &AppStateInner, jar: CookieJar) -> Result<CookieJar, ApiError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.db.delete_session(cookie.value())?;
    }
    Ok(jar.remove(Cookie::build(SESSION_COOKIE).path("/")))
}

/// Resolve the caller from the session cookie. `None` for a missing,
/// unknown or expired session. The role is read from the user's current
/// record, so a promotion or demotion applies on the very next request.
pub fn resolve(state: &AppStateInner, jar: &CookieJar) -> Result<Option<Principal>, ApiError> {
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return Ok(None);
    };
    let token = cookie.value();
    let now = Utc::now();

    let Some(session) = state.db.get_session(token, now.timestamp())? else {
        return Ok(None);
    };
    // Sessions cascade away with their user, but a delete may land between
    // the two reads.
    let Some(user) = state.db.get_user(session.user_id)? else {
        state.db.delete_session(token)?;
        return Ok(None);
    };

    state.db.touch_session(token, (now + state.sessions.ttl).timestamp())?;
    Ok(Some(Principal::from(&user)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = new_token();
        let b = new_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn cookie_flags() {
        let cookie = session_cookie("tok".into(), true);
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
    }
}
