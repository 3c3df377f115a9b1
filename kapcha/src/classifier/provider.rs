use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leptess::LepTess;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{parse_provider_model, ClassifierConfig};
use crate::error::{KapchaError, Result};

use super::api::VisionApiClient;
use super::Classifier;

enum ClassifierBackend {
    Tesseract { engine: Arc<Mutex<LepTess>> },
    Api { client: VisionApiClient },
    Unavailable { reason: String },
}

/// Production [`Classifier`]: backend chosen from `ClassifierConfig.model`.
///
/// Construction never fails the process; a backend that cannot start is
/// recorded as Unavailable and every classify call reports the reason.
pub struct ClassifierProvider {
    backend: ClassifierBackend,
    config: ClassifierConfig,
}

fn create_tesseract(languages: &str) -> std::result::Result<LepTess, String> {
    LepTess::new(None, languages).map_err(|e| e.to_string())
}

impl ClassifierProvider {
    pub fn new(config: &ClassifierConfig) -> Self {
        let (provider, model) = parse_provider_model(&config.model);
        let provider = provider.to_lowercase();

        let backend = match provider.as_str() {
            "openai" | "openrouter" | "ollama" | "lmstudio" => {
                match VisionApiClient::new(config, &provider, model) {
                    Ok(client) => {
                        info!(provider = %provider, model = %model, "Vision API classifier initialized");
                        ClassifierBackend::Api { client }
                    }
                    Err(e) => {
                        let reason = format!("Vision API classifier unavailable: {e}");
                        warn!("{}", reason);
                        ClassifierBackend::Unavailable { reason }
                    }
                }
            }
            _ => match create_tesseract(&config.languages) {
                Ok(lt) => {
                    info!(languages = %config.languages, "Tesseract classifier initialized");
                    ClassifierBackend::Tesseract {
                        engine: Arc::new(Mutex::new(lt)),
                    }
                }
                Err(e) => {
                    let reason = format!("Tesseract not available: {e}");
                    warn!("{}", reason);
                    ClassifierBackend::Unavailable { reason }
                }
            },
        };

        Self {
            backend,
            config: config.clone(),
        }
    }

    #[cfg(test)]
    fn unavailable(reason: &str, config: &ClassifierConfig) -> Self {
        Self {
            backend: ClassifierBackend::Unavailable {
                reason: reason.to_string(),
            },
            config: config.clone(),
        }
    }

    async fn classify_internal(&self, image_bytes: &[u8]) -> Result<String> {
        match &self.backend {
            ClassifierBackend::Tesseract { engine } => {
                let bytes = image_bytes.to_vec();
                let engine = Arc::clone(engine);

                let text = tokio::task::spawn_blocking(move || {
                    let mut lt = engine.blocking_lock();
                    lt.set_image_from_mem(&bytes).map_err(|e| {
                        KapchaError::UpstreamFailure(format!("Failed to set image: {e}"))
                    })?;
                    lt.get_utf8_text().map_err(|e| {
                        KapchaError::UpstreamFailure(format!("Failed to extract text: {e}"))
                    })
                })
                .await
                .map_err(|e| {
                    KapchaError::InternalError(format!("Classification task panicked: {e}"))
                })??;

                Ok(text.trim().to_string())
            }
            ClassifierBackend::Api { client } => client.classify(image_bytes).await,
            ClassifierBackend::Unavailable { reason } => {
                Err(KapchaError::UpstreamFailure(reason.clone()))
            }
        }
    }
}

#[async_trait]
impl Classifier for ClassifierProvider {
    async fn classify(&self, image_bytes: &[u8]) -> Result<String> {
        let timeout_duration = Duration::from_secs(self.config.timeout_secs);

        let result =
            tokio::time::timeout(timeout_duration, self.classify_internal(image_bytes)).await;

        match result {
            Ok(inner_result) => inner_result,
            Err(_) => Err(KapchaError::UpstreamFailure(format!(
                "Classification timed out after {} seconds",
                self.config.timeout_secs
            ))),
        }
    }

    fn is_available(&self) -> bool {
        !matches!(self.backend, ClassifierBackend::Unavailable { .. })
    }

    fn backend_name(&self) -> &str {
        match &self.backend {
            ClassifierBackend::Tesseract { .. } => "tesseract",
            ClassifierBackend::Api { .. } => "vision-api",
            ClassifierBackend::Unavailable { .. } => "unavailable",
        }
    }
}

impl Clone for ClassifierProvider {
    fn clone(&self) -> Self {
        match &self.backend {
            ClassifierBackend::Tesseract { engine } => Self {
                backend: ClassifierBackend::Tesseract {
                    engine: Arc::clone(engine),
                },
                config: self.config.clone(),
            },
            ClassifierBackend::Api { client } => Self {
                backend: ClassifierBackend::Api {
                    client: client.clone(),
                },
                config: self.config.clone(),
            },
            ClassifierBackend::Unavailable { reason } => Self {
                backend: ClassifierBackend::Unavailable {
                    reason: reason.clone(),
                },
                config: self.config.clone(),
            },
        }
    }
}
