//! Storecrawl Client - HTTP clients for external APIs
//!
//! This crate provides HTTP clients for interacting with:
//!
//! - [`storefront`] - storefront `products.json` catalog endpoints
//! - [`huggingface`] - Hugging Face Inference feature-extraction API
//!
//! # Overview
//!
//! The clients handle request building, response parsing, and mapping of
//! HTTP failures onto [`storecrawl_core::AppError`]. Each implements the
//! matching trait from `storecrawl_core::traits`.

pub mod huggingface;
pub mod storefront;

// Re-export main client types
pub use huggingface::HuggingFaceClient;
pub use storefront::StorefrontClient;
