//! Request-processing layers.
//!
//! Applied outermost first: security headers, rate limiting, CSRF, request
//! validation. The admin routes additionally sit behind [`auth`].

pub mod auth;
pub mod blacklist;
pub mod csrf;
pub mod ip;
pub mod rate_limit;
pub mod security_headers;
pub mod validation;

pub use auth::admin_auth_middleware;
pub use csrf::csrf_protection_middleware;
pub use rate_limit::{rate_limit_middleware, spawn_cleanup_task};
pub use security_headers::security_headers_middleware;
pub use validation::validate_request_middleware;
