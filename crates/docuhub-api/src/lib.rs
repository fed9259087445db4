pub mod activities;
pub mod auth;
pub mod documents;
pub mod error;
pub mod extract;
pub mod ingestions;
pub mod middleware;
pub mod qa;
pub mod routes;
pub mod session;
pub mod users;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
pub use routes::router;
