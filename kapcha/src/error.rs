use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Failure taxonomy for the recognition core. Every error that crosses the
/// engine's public contract is one of these kinds; raw classifier or decoder
/// errors are reclassified before they surface.
#[derive(Error, Debug, Clone)]
pub enum KapchaError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported captcha type '{requested}' (supported: {})", .supported.join(", "))]
    UnsupportedCaptchaType {
        requested: String,
        supported: Vec<String>,
    },

    #[error("Recognition failed: {0}")]
    RecognitionFailed(String),

    #[error("Upstream classifier failure: {0}")]
    UpstreamFailure(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Discriminant for [`KapchaError`], used for metrics labels, API error codes
/// and carrying failures across task boundaries without the full payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidImage,
    InvalidParameter,
    UnsupportedCaptchaType,
    RecognitionFailed,
    UpstreamFailure,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidImage => "invalid_image",
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::UnsupportedCaptchaType => "unsupported_captcha_type",
            ErrorKind::RecognitionFailed => "recognition_failed",
            ErrorKind::UpstreamFailure => "upstream_failure",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl KapchaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KapchaError::InvalidImage(_) => ErrorKind::InvalidImage,
            KapchaError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            KapchaError::UnsupportedCaptchaType { .. } => ErrorKind::UnsupportedCaptchaType,
            KapchaError::RecognitionFailed(_) => ErrorKind::RecognitionFailed,
            KapchaError::UpstreamFailure(_) => ErrorKind::UpstreamFailure,
            KapchaError::InternalError(_) => ErrorKind::InternalError,
        }
    }
}

impl IntoResponse for KapchaError {
    fn into_response(self) -> Response {
        let status = match &self {
            KapchaError::InvalidImage(_)
            | KapchaError::InvalidParameter(_)
            | KapchaError::UnsupportedCaptchaType { .. } => StatusCode::BAD_REQUEST,
            KapchaError::RecognitionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            KapchaError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            KapchaError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, KapchaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_type_lists_supported() {
        let err = KapchaError::UnsupportedCaptchaType {
            requested: "qrcode".to_string(),
            supported: vec!["text".to_string(), "calculation".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("qrcode"));
        assert!(msg.contains("text, calculation"));
    }

    #[test]
    fn test_kind_roundtrip_codes() {
        let cases = [
            (
                KapchaError::InvalidImage("bad".into()),
                "invalid_image",
            ),
            (
                KapchaError::InvalidParameter("bad".into()),
                "invalid_parameter",
            ),
            (
                KapchaError::RecognitionFailed("bad".into()),
                "recognition_failed",
            ),
            (
                KapchaError::UpstreamFailure("bad".into()),
                "upstream_failure",
            ),
            (KapchaError::InternalError("bad".into()), "internal_error"),
        ];
        for (err, code) in cases {
            assert_eq!(err.kind().as_str(), code);
        }
    }

    #[test]
    fn test_status_mapping() {
        use axum::http::StatusCode;

        let resp = KapchaError::RecognitionFailed("unparseable".into()).into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = KapchaError::UpstreamFailure("timeout".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let resp = KapchaError::InvalidParameter("contrast".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
