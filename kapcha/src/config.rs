use serde::Deserialize;
use std::env;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub classifier: ClassifierConfig,
    pub preprocess: PreprocessConfig,
    pub cache: CacheConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Settings for the OCR classification backend. `model` selects the backend
/// via a `provider/model` string, e.g. `local/tesseract` or
/// `openai/gpt-4o-mini`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub languages: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// Limits and heuristics for image ingestion and preprocessing. Per-request
/// preprocessing option values live on the request itself; this section only
/// bounds them.
#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessConfig {
    pub max_image_bytes: usize,
    pub min_dimension: u32,
    pub max_dimension: u32,
    /// When set, requests without explicit preprocessing options pick an
    /// aggressive or light preset from the image quality score.
    pub quality_gate: bool,
    pub quality_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Number of recent durations retained per operation for windowed stats.
    pub window: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env::var("KAPCHA_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env_or("KAPCHA_PORT", 8320),
            },
            classifier: ClassifierConfig {
                model: env::var("KAPCHA_CLASSIFIER_MODEL")
                    .unwrap_or_else(|_| "local/tesseract".to_string()),
                api_key: env::var("KAPCHA_CLASSIFIER_API_KEY").ok(),
                base_url: env::var("KAPCHA_CLASSIFIER_BASE_URL").ok(),
                languages: env::var("KAPCHA_CLASSIFIER_LANGUAGES")
                    .unwrap_or_else(|_| "eng".to_string()),
                timeout_secs: parse_env_or("KAPCHA_CLASSIFIER_TIMEOUT_SECS", 30),
                max_retries: parse_env_or("KAPCHA_CLASSIFIER_MAX_RETRIES", 3),
            },
            preprocess: PreprocessConfig {
                max_image_bytes: parse_env_or("KAPCHA_MAX_IMAGE_BYTES", 16 * 1024 * 1024),
                min_dimension: parse_env_or("KAPCHA_MIN_IMAGE_DIMENSION", 8),
                max_dimension: parse_env_or("KAPCHA_MAX_IMAGE_DIMENSION", 4096),
                quality_gate: parse_env_or("KAPCHA_QUALITY_GATE", false),
                quality_threshold: parse_env_or("KAPCHA_QUALITY_THRESHOLD", 0.45),
            },
            cache: CacheConfig {
                enabled: parse_env_or("KAPCHA_CACHE_ENABLED", true),
                max_entries: parse_env_or("KAPCHA_CACHE_MAX_ENTRIES", 1000),
                ttl_secs: parse_env_or("KAPCHA_CACHE_TTL_SECS", 3600),
                sweep_interval_secs: parse_env_or("KAPCHA_CACHE_SWEEP_INTERVAL_SECS", 300),
            },
            monitor: MonitorConfig {
                window: parse_env_or("KAPCHA_MONITOR_WINDOW", 100),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// Known remote providers that speak an OpenAI-compatible chat API.
const KNOWN_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio", "local"];

/// Parse a model name into (provider, model) tuple.
pub fn parse_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    // Default to local provider
    ("local", model)
}
