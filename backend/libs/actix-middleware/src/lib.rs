//! # Actix Middleware Library
//!
//! Middleware shared by chat services
//!
//! ## Modules
//! - `jwt_auth`: bearer token authentication resolving an [`Identity`]
//! - `request_id`: X-Request-ID propagation

pub mod jwt_auth;
pub mod request_id;

pub use jwt_auth::{Identity, JwtAuth};
pub use request_id::{RequestId, RequestIdValue};
