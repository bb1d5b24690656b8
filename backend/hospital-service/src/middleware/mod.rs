pub mod auth;

pub use auth::{bearer_token, require_role, AuthUser, JwtAuthMiddleware};
