//! Kapcha: self-hostable CAPTCHA recognition service.
//!
//! The crate is organized around a recognition core and a thin HTTP surface:
//!
//! - [`engine`] orchestrates each request: validation, preprocessing,
//!   fingerprinting, cache lookup, and single-flight dispatch to a processor.
//! - [`preprocess`] is the deterministic image pipeline feeding the
//!   classifier.
//! - [`cache`] memoizes results by content fingerprint.
//! - [`processors`] hold the type-specific decoding strategies behind a
//!   registry.
//! - [`classifier`] is the pluggable OCR capability (Tesseract, vision API,
//!   or unavailable).
//! - [`api`] exposes the axum routes; [`config`], [`error`] and [`monitor`]
//!   carry the ambient concerns.

pub mod api;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod preprocess;
pub mod processors;
