//! # V1 API Response Envelope & Error Contract
//!
//! Defines the canonical wire format for all v1 API responses. Every endpoint
//! returns an [`ApiResponse<T>`] envelope:
//!
//! ```json
//! {
//!   "data": { ... },       // present on success, absent on error
//!   "error": { "code": "recognition_failed", "message": "..." }  // on error
//! }
//! ```
//!
//! Error codes are the snake_case names of the engine's failure taxonomy;
//! each maps to a fixed HTTP status via [`ErrorCode::status`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::KapchaError;

/// Machine-readable error code included in every error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The supplied bytes are not a decodable raster image. HTTP 400.
    InvalidImage,
    /// A preprocessing or output option is out of range or malformed.
    /// HTTP 400.
    InvalidParameter,
    /// The requested captcha type has no registered processor. HTTP 400.
    UnsupportedCaptchaType,
    /// The processors ran but could not produce a usable result. HTTP 422.
    RecognitionFailed,
    /// The OCR backend errored or timed out. HTTP 502.
    UpstreamFailure,
    /// An unexpected server-side error. Internal details are never leaked
    /// to the client. HTTP 500.
    InternalError,
}

impl ErrorCode {
    /// The HTTP status code corresponding to this error code.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidImage | Self::InvalidParameter | Self::UnsupportedCaptchaType => {
                StatusCode::BAD_REQUEST
            }
            Self::RecognitionFailed => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UpstreamFailure => StatusCode::BAD_GATEWAY,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidImage => write!(f, "invalid_image"),
            Self::InvalidParameter => write!(f, "invalid_parameter"),
            Self::UnsupportedCaptchaType => write!(f, "unsupported_captcha_type"),
            Self::RecognitionFailed => write!(f, "recognition_failed"),
            Self::UpstreamFailure => write!(f, "upstream_failure"),
            Self::InternalError => write!(f, "internal_error"),
        }
    }
}

/// Structured error payload within the API envelope.
///
/// ```json
/// { "code": "unsupported_captcha_type", "message": "..." }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable error classification.
    pub code: ErrorCode,
    /// Human-readable description safe to display to end users.
    pub message: String,
}

/// Canonical v1 API response envelope.
///
/// On success, `data` is present and `error` is absent; on error the
/// reverse. The HTTP status is derived from the error code on error and is
/// 200 on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,

    /// HTTP status to use in the response. Not serialized on the wire.
    #[serde(skip)]
    status: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    /// Success response with data (HTTP 200).
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            status: StatusCode::OK,
        }
    }

    /// Error response. HTTP status is derived from the [`ErrorCode`].
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(ApiError {
                code,
                message: message.into(),
            }),
            status: code.status(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = self.status;
        match serde_json::to_value(&self) {
            Ok(body) => (status, Json(body)).into_response(),
            Err(_) => {
                let body = serde_json::json!({
                    "error": {
                        "code": "internal_error",
                        "message": "An internal error occurred"
                    }
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

impl<T: Serialize> From<KapchaError> for ApiResponse<T> {
    /// Convert a [`KapchaError`] into a v1 [`ApiResponse`].
    ///
    /// Internal error details are **never** leaked to the client: an
    /// `internal_error` response carries a generic message and the real error
    /// is logged via `tracing::error!`.
    fn from(err: KapchaError) -> Self {
        match err {
            KapchaError::InvalidImage(ref msg) => {
                ApiResponse::error(ErrorCode::InvalidImage, msg.clone())
            }
            KapchaError::InvalidParameter(ref msg) => {
                ApiResponse::error(ErrorCode::InvalidParameter, msg.clone())
            }
            KapchaError::UnsupportedCaptchaType { .. } => {
                ApiResponse::error(ErrorCode::UnsupportedCaptchaType, err.to_string())
            }
            KapchaError::RecognitionFailed(ref msg) => {
                ApiResponse::error(ErrorCode::RecognitionFailed, msg.clone())
            }
            KapchaError::UpstreamFailure(ref msg) => {
                ApiResponse::error(ErrorCode::UpstreamFailure, msg.clone())
            }
            ref internal @ KapchaError::InternalError(_) => {
                tracing::error!(error = %internal, "Internal error mapped to v1 response");
                ApiResponse::error(ErrorCode::InternalError, "An internal error occurred")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_serializes_without_error() {
        let resp = ApiResponse::success("hello");
        let json = serde_json::to_value(&resp).expect("serialize");
        assert_eq!(json["data"], "hello");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_response_serializes_without_data() {
        let resp = ApiResponse::<()>::error(ErrorCode::RecognitionFailed, "unparseable");
        let json = serde_json::to_value(&resp).expect("serialize");
        assert!(json.get("data").is_none());
        assert_eq!(json["error"]["code"], "recognition_failed");
        assert_eq!(json["error"]["message"], "unparseable");
    }

    #[test]
    fn error_code_status_mapping() {
        assert_eq!(ErrorCode::InvalidImage.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::InvalidParameter.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorCode::UnsupportedCaptchaType.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorCode::RecognitionFailed.status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ErrorCode::UpstreamFailure.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ErrorCode::InternalError.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn error_code_serializes_snake_case() {
        let json = serde_json::to_value(ErrorCode::UnsupportedCaptchaType).expect("serialize");
        assert_eq!(json, "unsupported_captcha_type");

        let json = serde_json::to_value(ErrorCode::UpstreamFailure).expect("serialize");
        assert_eq!(json, "upstream_failure");
    }

    #[test]
    fn kapcha_error_maps_with_message() {
        let resp: ApiResponse<()> =
            KapchaError::RecognitionFailed("division by zero".into()).into();
        let err = resp.error.as_ref().expect("error");
        assert_eq!(err.code, ErrorCode::RecognitionFailed);
        assert!(err.message.contains("zero"));
    }

    #[test]
    fn unsupported_type_message_lists_supported() {
        let resp: ApiResponse<()> = KapchaError::UnsupportedCaptchaType {
            requested: "qrcode".into(),
            supported: vec!["text".into(), "auto".into()],
        }
        .into();
        let err = resp.error.as_ref().expect("error");
        assert_eq!(err.code, ErrorCode::UnsupportedCaptchaType);
        assert!(err.message.contains("qrcode"));
        assert!(err.message.contains("text"));
    }

    #[test]
    fn internal_error_does_not_leak() {
        let resp: ApiResponse<()> = KapchaError::InternalError("secret debug info".into()).into();
        let err = resp.error.as_ref().expect("error");
        assert_eq!(err.code, ErrorCode::InternalError);
        assert_eq!(err.message, "An internal error occurred");
    }
}
