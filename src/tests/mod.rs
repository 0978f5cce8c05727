//! Cross-module and HTTP tests.
//!
//! ## Test Modules
//!
//! - **api_tests**: The full middleware stack driven through the router
//! - **health_api_tests**: Health, version and metrics endpoints
//! - **config_tests**: Configuration loading and validation
//! - **error_tests**: Error variants and their HTTP responses
//!
//! Individual test modules can be run with:
//! ```bash
//! cargo test api_tests
//! ```

pub mod config_tests;
pub mod error_tests;
