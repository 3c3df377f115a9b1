//! v1 wire types. Field names serialize as camelCase; conversions from the
//! engine's result types live here so the core stays wire-agnostic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::cache::CacheStats;
use crate::engine::RecognitionResult;
use crate::monitor::OpStats;
use crate::preprocess::PreprocessOptions;
use crate::processors::{CaptchaType, FinalValue, OutputOptions};

/// Per-request knobs accepted by every recognize route.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    /// Explicit preprocessing steps; omitted means server defaults (or the
    /// quality gate when enabled).
    #[serde(default)]
    pub preprocess: Option<PreprocessOptions>,
    #[serde(default)]
    pub output: OutputOptions,
}

/// `POST /api/v1/recognize/{captchaType}` body.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognizeBody {
    /// Base64-encoded image bytes. A `data:image/...;base64,` prefix is
    /// accepted and stripped.
    pub image: String,
    #[serde(default)]
    pub options: Option<RequestOptions>,
}

/// `POST /api/v1/recognize/{captchaType}/url` body.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecognizeUrlBody {
    #[validate(url(message = "must be a well-formed URL"))]
    pub url: String,
    #[serde(default)]
    pub options: Option<RequestOptions>,
}

/// Recognition payload returned inside the v1 envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResponse {
    /// Classifier output before post-processing.
    pub raw_text: String,
    /// Final decoded value: a JSON number for evaluated calculations, a
    /// string otherwise.
    pub value: FinalValue,
    pub captcha_type: CaptchaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub elapsed_ms: f64,
    pub cached: bool,
}

impl From<RecognitionResult> for RecognitionResponse {
    fn from(result: RecognitionResult) -> Self {
        Self {
            raw_text: result.raw_text,
            value: result.value,
            captcha_type: result.captcha_type,
            confidence: result.confidence,
            elapsed_ms: result.elapsed_ms,
            cached: result.cached,
        }
    }
}

/// Health data returned inside the v1 envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthData {
    pub status: String,
    pub version: String,
    pub classifier: ClassifierStatus,
    pub supported_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifierStatus {
    pub status: String,
    pub backend: String,
    pub model: String,
}

/// Stats snapshot returned inside the v1 envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsData {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    pub inflight: usize,
    pub operations: Vec<OpStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognize_body_deserializes_with_options() {
        let body: RecognizeBody = serde_json::from_str(
            r#"{
                "image": "aGVsbG8=",
                "options": {
                    "preprocess": { "grayscale": true, "contrast": 1.5 },
                    "output": { "removeSpaces": false, "toUppercase": true }
                }
            }"#,
        )
        .expect("deserialize");

        let options = body.options.expect("options");
        let preprocess = options.preprocess.expect("preprocess");
        assert!((preprocess.contrast - 1.5).abs() < f32::EPSILON);
        assert!(!options.output.remove_spaces);
        assert!(options.output.to_uppercase);
    }

    #[test]
    fn recognize_body_options_are_optional() {
        let body: RecognizeBody =
            serde_json::from_str(r#"{ "image": "aGVsbG8=" }"#).expect("deserialize");
        assert!(body.options.is_none());
    }

    #[test]
    fn url_body_validation() {
        let ok = RecognizeUrlBody {
            url: "https://example.com/captcha.png".to_string(),
            options: None,
        };
        assert!(ok.validate().is_ok());

        let bad = RecognizeUrlBody {
            url: "not a url".to_string(),
            options: None,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn recognition_response_serializes_camel_case() {
        let response = RecognitionResponse {
            raw_text: "3+4=?".to_string(),
            value: FinalValue::Integer(7),
            captcha_type: CaptchaType::Calculation,
            confidence: None,
            elapsed_ms: 12.5,
            cached: true,
        };
        let json = serde_json::to_value(&response).expect("serialize");
        assert_eq!(json["rawText"], "3+4=?");
        assert_eq!(json["value"], 7);
        assert_eq!(json["captchaType"], "calculation");
        assert_eq!(json["elapsedMs"], 12.5);
        assert_eq!(json["cached"], true);
        assert!(json.get("confidence").is_none());
    }
}
