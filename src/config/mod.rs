//! Optional config file loading.
//!
//! A `review-pulse.toml` (or `.yaml`) in the working directory may set the
//! output directory, the ranking size, and excluded logins. Precedence is
//! CLI flags over file values over built-in defaults; merging happens at
//! the CLI layer.

pub mod loader;

pub use loader::{load_config, split_logins, FileConfig};
