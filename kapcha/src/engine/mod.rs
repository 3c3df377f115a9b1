//! Recognition Engine Module
//!
//! Orchestrates a recognition request end to end: validate the declared type
//! and options, preprocess, fingerprint, consult the result cache, then
//! dispatch to the matching processor under single-flight so concurrent
//! requests for the same fingerprint share one classification.
//!
//! All collaborators are injected at construction and shared behind `Arc`;
//! the engine itself holds no per-request state.

mod detect;
mod flight;

pub use detect::{CharsetDetector, TypeDetector};
pub use flight::FlightGroup;

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::cache::{CacheStats, CachedRecognition, Fingerprint, ResultCache};
use crate::classifier::Classifier;
use crate::config::{Config, PreprocessConfig};
use crate::error::{ErrorKind, KapchaError, Result};
use crate::monitor::{OpStats, PerformanceMonitor};
use crate::preprocess::{effective_options, preprocess_image, PreprocessOptions};
use crate::processors::{CaptchaType, FinalValue, OutputOptions, ProcessorRegistry};

/// One recognition job: raw image bytes plus how to decode them.
#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    pub image: Vec<u8>,
    /// Requested captcha type label; kept as a string so unknown labels can
    /// be rejected with the supported set instead of failing to parse.
    pub declared_type: String,
    /// Explicit preprocessing options; `None` lets the quality gate or the
    /// defaults decide.
    pub preprocess: Option<PreprocessOptions>,
    pub output: OutputOptions,
}

impl RecognitionRequest {
    pub fn new(image: Vec<u8>, declared_type: impl Into<String>) -> Self {
        Self {
            image,
            declared_type: declared_type.into(),
            preprocess: None,
            output: OutputOptions::default(),
        }
    }
}

/// A packaged recognition outcome.
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionResult {
    pub raw_text: String,
    pub value: FinalValue,
    pub captcha_type: CaptchaType,
    pub confidence: Option<f32>,
    /// Wall-clock time from request receipt to packaging, in milliseconds.
    pub elapsed_ms: f64,
    /// Whether the value was served from the result cache.
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub status: &'static str,
    pub backend: String,
    pub available: bool,
    pub supported_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub cache: Option<CacheStats>,
    pub inflight: usize,
    pub operations: Vec<OpStats>,
}

pub struct RecognitionEngine {
    registry: Arc<ProcessorRegistry>,
    classifier: Arc<dyn Classifier>,
    detector: Arc<dyn TypeDetector>,
    cache: Option<ResultCache>,
    flights: Arc<FlightGroup>,
    monitor: Arc<PerformanceMonitor>,
    preprocess_config: PreprocessConfig,
}

impl RecognitionEngine {
    /// Build an engine with the standard processor set and the charset-voting
    /// detector, both driven by the given classifier.
    pub fn new(config: &Config, classifier: Arc<dyn Classifier>) -> Self {
        let cache = if config.cache.enabled {
            Some(ResultCache::from_config(&config.cache))
        } else {
            None
        };
        Self {
            registry: Arc::new(ProcessorRegistry::standard(Arc::clone(&classifier))),
            detector: Arc::new(CharsetDetector::new(Arc::clone(&classifier))),
            classifier,
            cache,
            flights: Arc::new(FlightGroup::new()),
            monitor: Arc::new(PerformanceMonitor::new(config.monitor.window)),
            preprocess_config: config.preprocess.clone(),
        }
    }

    /// Replace the auto-type detector.
    pub fn with_detector(mut self, detector: Arc<dyn TypeDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Replace the processor registry. This is the extension point for new
    /// captcha types.
    pub fn with_registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Recognize one captcha image.
    pub async fn recognize(&self, request: RecognitionRequest) -> Result<RecognitionResult> {
        let started = Instant::now();
        let op = match request.declared_type.parse::<CaptchaType>() {
            Ok(t) => format!("recognize.{t}"),
            Err(_) => "recognize.invalid".to_string(),
        };

        let outcome = self.execute(request).await;
        let elapsed = started.elapsed();
        self.monitor.record(&op, elapsed, outcome.is_ok());

        match outcome {
            Ok((value, cached)) => Ok(RecognitionResult {
                raw_text: value.raw_text,
                value: value.value,
                captcha_type: value.captcha_type,
                confidence: value.confidence,
                elapsed_ms: elapsed.as_secs_f64() * 1000.0,
                cached,
            }),
            Err(e) => {
                match e.kind() {
                    ErrorKind::InternalError => error!(error = %e, "Recognition failed internally"),
                    ErrorKind::UpstreamFailure => warn!(error = %e, "Classifier failure"),
                    _ => debug!(error = %e, "Recognition rejected"),
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, request: RecognitionRequest) -> Result<(CachedRecognition, bool)> {
        // Validation first: nothing below runs for a request that could never
        // succeed, and the classifier is never invoked.
        let declared = self.resolve_declared(&request.declared_type)?;
        request.output.validate()?;

        let preprocess_started = Instant::now();
        let options = effective_options(request.preprocess, &request.image, &self.preprocess_config)?;
        let processed = preprocess_image(&request.image, &options, &self.preprocess_config)?;
        self.monitor
            .record("preprocess", preprocess_started.elapsed(), true);

        // Keyed on the declared type, so concurrent `auto` requests for the
        // same bytes collapse into one detection+recognition flight.
        let fingerprint = Fingerprint::compute(
            &request.image,
            declared.as_str(),
            &options.canonical(),
            &request.output.canonical(),
        );

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&fingerprint) {
                debug!(fingerprint = %fingerprint, "Cache hit");
                return Ok((hit, true));
            }
        }

        let registry = Arc::clone(&self.registry);
        let detector = Arc::clone(&self.detector);
        let monitor = Arc::clone(&self.monitor);
        let cache = self.cache.clone();
        let output = request.output.clone();
        let key = fingerprint.clone();

        let value = self
            .flights
            .run(fingerprint, move || async move {
                let resolved = if declared == CaptchaType::Auto {
                    detector.detect(&processed).await?
                } else {
                    declared
                };
                let processor = registry.get(resolved).ok_or_else(|| {
                    KapchaError::RecognitionFailed(format!(
                        "auto-detected type '{resolved}' has no registered processor"
                    ))
                })?;

                let inference_started = Instant::now();
                let produced = processor.process(&processed, &output).await;
                monitor.record(
                    &format!("inference.{resolved}"),
                    inference_started.elapsed(),
                    produced.is_ok(),
                );
                let produced = produced?;

                let value = CachedRecognition {
                    raw_text: produced.raw_text,
                    value: produced.value,
                    captcha_type: resolved,
                    confidence: produced.confidence,
                };
                if let Some(cache) = cache {
                    cache.put(key, value.clone());
                }
                Ok(value)
            })
            .await?;

        Ok((value, false))
    }

    fn resolve_declared(&self, declared: &str) -> Result<CaptchaType> {
        let unsupported = || KapchaError::UnsupportedCaptchaType {
            requested: declared.to_string(),
            supported: self.supported_types(),
        };
        let parsed: CaptchaType = declared.parse().map_err(|_| unsupported())?;
        if parsed != CaptchaType::Auto && !self.registry.contains(parsed) {
            return Err(unsupported());
        }
        Ok(parsed)
    }

    /// Registered type labels plus `auto`, sorted.
    pub fn supported_types(&self) -> Vec<String> {
        let mut types = self.registry.supported_types();
        types.push(CaptchaType::Auto.as_str().to_string());
        types.sort();
        types
    }

    pub fn health(&self) -> EngineHealth {
        let available = self.classifier.is_available();
        EngineHealth {
            status: if available { "healthy" } else { "degraded" },
            backend: self.classifier.backend_name().to_string(),
            available,
            supported_types: self.supported_types(),
        }
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            cache: self.cache.as_ref().map(|c| c.stats()),
            inflight: self.flights.len(),
            operations: self.monitor.snapshot(),
        }
    }

    /// Drop expired cache entries. Returns how many were removed; no-op when
    /// the cache is disabled.
    pub fn sweep_cache(&self) -> usize {
        self.cache.as_ref().map(|c| c.sweep()).unwrap_or(0)
    }
}
