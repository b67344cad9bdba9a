//! Remote catalog discovery.
//!
//! This module lists the repositories of a workspace project through the
//! paginated repository API and resolves their HTTPS clone endpoints.

pub mod client;

pub use client::{CatalogClient, CatalogError, PageFetcher, PageResponse};
