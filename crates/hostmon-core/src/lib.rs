//! hostmon-core: host sampling primitives shared by the hostmon binaries.
//!
//! Provides:
//! - `collector`: the host probe capability (procfs readers, filesystem abstraction)
//! - `model`: canonical CPU/memory sample types and reading normalization
//! - `fmt`: byte formatting for display-ready values
//!
//! With `api` feature:
//! - OpenAPI schemas (`utoipa::ToSchema`) on the sample types

pub mod collector;
pub mod fmt;
pub mod model;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
