//! v1 recognition handlers: base64 body, URL fetch, and multipart upload.
//! All three converge on the engine; they differ only in how the image
//! bytes arrive.

use axum::extract::{Multipart, Path, State};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use url::Url;
use validator::Validate;

use crate::api::v1::dto::{RecognitionResponse, RecognizeBody, RecognizeUrlBody, RequestOptions};
use crate::api::v1::response::{ApiResponse, ErrorCode};
use crate::api::AppState;
use crate::engine::RecognitionRequest;
use crate::error::KapchaError;

/// `POST /api/v1/recognize/{captchaType}`
///
/// Body carries the image as base64 plus optional preprocessing/output
/// options.
pub async fn recognize_base64(
    State(state): State<AppState>,
    Path(captcha_type): Path<String>,
    axum::Json(body): axum::Json<RecognizeBody>,
) -> ApiResponse<RecognitionResponse> {
    let image = match decode_base64_image(&body.image) {
        Ok(bytes) => bytes,
        Err(msg) => return ApiResponse::error(ErrorCode::InvalidImage, msg),
    };
    run_recognition(&state, captcha_type, image, body.options).await
}

/// `POST /api/v1/recognize/{captchaType}/url`
///
/// The server fetches the image from the given http(s) URL, capped at the
/// configured maximum image size, then recognizes it.
pub async fn recognize_url(
    State(state): State<AppState>,
    Path(captcha_type): Path<String>,
    axum::Json(body): axum::Json<RecognizeUrlBody>,
) -> ApiResponse<RecognitionResponse> {
    if let Err(e) = body.validate() {
        return ApiResponse::error(ErrorCode::InvalidParameter, format!("Invalid url: {e}"));
    }
    let url = match Url::parse(&body.url) {
        Ok(url) => url,
        Err(e) => {
            return ApiResponse::error(ErrorCode::InvalidParameter, format!("Invalid url: {e}"))
        }
    };
    if !matches!(url.scheme(), "http" | "https") {
        return ApiResponse::error(
            ErrorCode::InvalidParameter,
            "Image URLs must use http or https",
        );
    }

    let image = match fetch_image(&state, url).await {
        Ok(bytes) => bytes,
        Err(e) => return e.into(),
    };
    run_recognition(&state, captcha_type, image, body.options).await
}

/// `POST /api/v1/recognize/{captchaType}/upload`
///
/// Multipart form with a `file` field and an optional `options` field
/// holding the options JSON.
pub async fn recognize_upload(
    State(state): State<AppState>,
    Path(captcha_type): Path<String>,
    mut multipart: Multipart,
) -> ApiResponse<RecognitionResponse> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut options: Option<RequestOptions> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" | "image" => {
                let bytes = match field.bytes().await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        return ApiResponse::error(
                            ErrorCode::InvalidImage,
                            format!("Failed to read file: {e}"),
                        );
                    }
                };
                let max_bytes = state.config.preprocess.max_image_bytes;
                if bytes.len() > max_bytes {
                    return ApiResponse::error(
                        ErrorCode::InvalidImage,
                        format!(
                            "File too large: {} bytes (max {max_bytes} bytes)",
                            bytes.len()
                        ),
                    );
                }
                file_bytes = Some(bytes.to_vec());
            }
            "options" => {
                let raw = match field.text().await {
                    Ok(text) => text,
                    Err(e) => {
                        return ApiResponse::error(
                            ErrorCode::InvalidParameter,
                            format!("Invalid options field: {e}"),
                        );
                    }
                };
                options = match serde_json::from_str(&raw) {
                    Ok(parsed) => Some(parsed),
                    Err(e) => {
                        return ApiResponse::error(
                            ErrorCode::InvalidParameter,
                            format!("Invalid options JSON: {e}"),
                        );
                    }
                };
            }
            _ => {}
        }
    }

    let image = match file_bytes {
        Some(bytes) => bytes,
        None => {
            return ApiResponse::error(ErrorCode::InvalidParameter, "Missing required 'file' field")
        }
    };
    run_recognition(&state, captcha_type, image, options).await
}

async fn run_recognition(
    state: &AppState,
    captcha_type: String,
    image: Vec<u8>,
    options: Option<RequestOptions>,
) -> ApiResponse<RecognitionResponse> {
    let options = options.unwrap_or_default();
    let request = RecognitionRequest {
        image,
        declared_type: captcha_type,
        preprocess: options.preprocess,
        output: options.output,
    };
    match state.engine.recognize(request).await {
        Ok(result) => ApiResponse::success(result.into()),
        Err(e) => e.into(),
    }
}

/// Decode a base64 image payload, tolerating `data:` URL prefixes and
/// embedded whitespace.
fn decode_base64_image(encoded: &str) -> Result<Vec<u8>, String> {
    let trimmed = encoded.trim();
    let payload = match trimmed.find("base64,") {
        Some(idx) => &trimmed[idx + "base64,".len()..],
        None => trimmed,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| format!("invalid base64 image data: {e}"))
}

async fn fetch_image(state: &AppState, url: Url) -> crate::error::Result<Vec<u8>> {
    let max_bytes = state.config.preprocess.max_image_bytes;

    let response = state
        .http
        .get(url)
        .send()
        .await
        .map_err(|e| KapchaError::InvalidImage(format!("failed to fetch image URL: {e}")))?;
    if !response.status().is_success() {
        return Err(KapchaError::InvalidImage(format!(
            "image URL returned HTTP {}",
            response.status().as_u16()
        )));
    }
    if let Some(length) = response.content_length() {
        if length as usize > max_bytes {
            return Err(KapchaError::InvalidImage(format!(
                "image at URL is {length} bytes (max {max_bytes})"
            )));
        }
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| KapchaError::InvalidImage(format!("failed to read image body: {e}")))?;
    if bytes.len() > max_bytes {
        return Err(KapchaError::InvalidImage(format!(
            "image at URL is {} bytes (max {max_bytes})",
            bytes.len()
        )));
    }
    // Reject content positively identified as something other than an image;
    // unknown formats fall through to the decoder.
    if let Some(kind) = infer::get(&bytes) {
        if kind.matcher_type() != infer::MatcherType::Image {
            return Err(KapchaError::InvalidImage(format!(
                "URL yielded {} content, not an image",
                kind.mime_type()
            )));
        }
    }
    Ok(bytes.to_vec())
}
