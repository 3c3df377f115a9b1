use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use kapcha::api::AppState;
use kapcha::classifier::Classifier;
use kapcha::config::{
    CacheConfig, ClassifierConfig, Config, MonitorConfig, PreprocessConfig, ServerConfig,
};
use kapcha::engine::RecognitionEngine;
use kapcha::error::{KapchaError, Result};

/// Deterministic classifier for integration tests: replays queued replies in
/// order (the last one repeats forever), optionally sleeping per call to make
/// concurrency observable, and counts every invocation.
pub struct StubClassifier {
    replies: Mutex<Vec<Result<String>>>,
    delay: Duration,
    available: bool,
    calls: AtomicUsize,
}

impl StubClassifier {
    pub fn new(mut replies: Vec<Result<String>>) -> Arc<Self> {
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            delay: Duration::ZERO,
            available: true,
            calls: AtomicUsize::new(0),
        })
    }

    /// A classifier that answers `text` to every call.
    pub fn always(text: &str) -> Arc<Self> {
        Self::new(vec![Ok(text.to_string())])
    }

    /// Like [`StubClassifier::always`] but each call takes `delay` before
    /// answering.
    pub fn slow(text: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(vec![Ok(text.to_string())]),
            delay,
            available: true,
            calls: AtomicUsize::new(0),
        })
    }

    /// A classifier whose backend never came up: `is_available` is false and
    /// every call fails with the recorded reason.
    pub fn unavailable(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(vec![Err(KapchaError::UpstreamFailure(reason.to_string()))]),
            delay: Duration::ZERO,
            available: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for StubClassifier {
    async fn classify(&self, _image_bytes: &[u8]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut replies = self.replies.lock().unwrap();
        match replies.len() {
            0 => Err(KapchaError::UpstreamFailure("script exhausted".to_string())),
            // The last remaining reply repeats forever.
            1 => replies[0].clone(),
            _ => replies
                .pop()
                .unwrap_or_else(|| Err(KapchaError::UpstreamFailure("script exhausted".to_string()))),
        }
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn backend_name(&self) -> &str {
        "stub"
    }
}

/// Fixed configuration decoupled from the process environment.
pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        classifier: ClassifierConfig {
            model: "local/tesseract".to_string(),
            api_key: None,
            base_url: None,
            languages: "eng".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        },
        preprocess: PreprocessConfig {
            max_image_bytes: 16 * 1024 * 1024,
            min_dimension: 8,
            max_dimension: 4096,
            quality_gate: false,
            quality_threshold: 0.45,
        },
        cache: CacheConfig {
            enabled: true,
            max_entries: 100,
            ttl_secs: 3600,
            sweep_interval_secs: 300,
        },
        monitor: MonitorConfig { window: 50 },
    }
}

/// Encode a small synthetic captcha-sized PNG. Different seeds yield
/// different pixel data, and therefore different cache fingerprints.
pub fn captcha_png(seed: u32) -> Vec<u8> {
    let img = image::GrayImage::from_fn(64, 24, move |x, y| {
        image::Luma([((x * 7 + y * 13 + seed.wrapping_mul(31)) % 256) as u8])
    });
    let mut bytes = Vec::new();
    image::DynamicImage::ImageLuma8(img)
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .expect("encode PNG fixture");
    bytes
}

/// [`captcha_png`] as plain base64, ready for a recognize request body.
pub fn captcha_base64(seed: u32) -> String {
    STANDARD.encode(captcha_png(seed))
}

/// Application state wired to the given stub classifier.
pub fn test_state(config: Config, classifier: Arc<StubClassifier>) -> AppState {
    let engine = RecognitionEngine::new(&config, classifier as Arc<dyn Classifier>);
    AppState::new(config, engine).expect("build app state")
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("parse response JSON")
}
