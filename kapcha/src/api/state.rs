use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::engine::RecognitionEngine;
use crate::error::{KapchaError, Result};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<RecognitionEngine>,
    /// Client for fetching captcha images from caller-supplied URLs.
    pub http: reqwest::Client,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, engine: RecognitionEngine) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| KapchaError::InternalError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            http,
            started_at: Instant::now(),
        })
    }
}
