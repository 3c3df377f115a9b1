//! OCR Classification Module
//!
//! The opaque text-classification capability the recognition engine consumes:
//! image bytes in, recognized string out. Processors never know which backend
//! produced the text.
//!
//! # Architecture
//!
//! - [`Classifier`] is the capability seam; the engine and the auto-type
//!   detector hold it as a trait object so tests can substitute scripted
//!   implementations.
//! - [`ClassifierProvider`] is the production implementation with three
//!   backends: in-process Tesseract, an OpenAI-compatible vision API, and an
//!   explicit Unavailable state for graceful degradation.
//!
//! # Configuration
//!
//! Backend selection is driven by `ClassifierConfig` (see `config.rs`):
//! - `model`: Provider/model selection (e.g., "local/tesseract", "openai/gpt-4o-mini")
//! - `api_key`: Authentication for cloud providers
//! - `base_url`: Custom endpoint for self-hosted or proxy setups
//! - `languages`: Comma-separated ISO 639-2 language codes for Tesseract
//! - `timeout_secs`: Per-call ceiling, enforced for every backend
//! - `max_retries`: Bounded retry on 429/5xx, API backend only

mod api;
mod provider;

pub use api::VisionApiClient;
pub use provider::ClassifierProvider;

use async_trait::async_trait;

use crate::error::Result;

/// `classify(image_bytes) -> string`: deterministic for identical bytes on a
/// fixed model version, and allowed to fail generically. Callers classify
/// the failure; implementations never panic across this boundary.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image_bytes: &[u8]) -> Result<String>;

    /// False when the backend could not be constructed; `classify` then
    /// fails with the recorded reason instead of the process refusing to
    /// start.
    fn is_available(&self) -> bool;

    /// Short backend label for health reporting and logs.
    fn backend_name(&self) -> &str;
}
