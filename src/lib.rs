//! # Wachposten
//!
//! Security middleware core for axum services: layered rate limiting with an
//! escalating IP blacklist, stateless HMAC-signed CSRF tokens, heuristic input
//! threat analysis, a bounded security audit log and response security headers.
//!
//! ## Core Components
//!
//! - [`audit`]: Security event recording, querying and statistics
//! - [`clock`]: Injectable time source for every time-dependent store
//! - [`config`]: Layered configuration (defaults, files, environment)
//! - [`error`]: Centralized error handling and HTTP error responses
//! - [`metrics`]: Counters for rejected and checked requests
//! - [`middleware`]: Identity extraction, rate limiting, blacklist, CSRF,
//!   threat analysis, security headers and admin authentication
//! - [`routes`]: Health, metrics, CSRF token and admin security endpoints
//! - [`state`]: The explicitly constructed [`state::SecurityState`]
//! - [`types`]: Request and response DTOs
//!
//! All stores are in-memory and per process. The security checks never block
//! on I/O; each one runs to completion under a short-lived lock.

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod lock_utils;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;
