pub mod dto;
pub mod handlers;
pub mod response;
pub mod router;

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::api::routes::create_router;
    use crate::api::state::AppState;
    use crate::classifier::Classifier;
    use crate::config::{
        CacheConfig, ClassifierConfig, Config, MonitorConfig, PreprocessConfig, ServerConfig,
    };
    use crate::engine::RecognitionEngine;
    use crate::processors::testing::ScriptedClassifier;

    fn test_config() -> Config {
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

    fn test_state(reply: &str) -> AppState {
        let config = test_config();
        let classifier = ScriptedClassifier::always(reply);
        let engine = RecognitionEngine::new(&config, classifier as Arc<dyn Classifier>);
        AppState::new(config, engine).unwrap()
    }

    fn captcha_base64() -> String {
        let img = image::GrayImage::from_fn(64, 24, |x, y| image::Luma([((x * 3 + y * 5) % 256) as u8]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageLuma8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .unwrap();
        STANDARD.encode(bytes)
    }

    fn recognize_request(captcha_type: &str, image_b64: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/api/v1/recognize/{captcha_type}"))
            .header("content-type", "application/json")
            .body(Body::from(format!(r#"{{"image":"{image_b64}"}}"#)))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok_envelope() {
        let app = create_router(test_state("AB12"));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["status"], "healthy");
        assert_eq!(json["data"]["classifier"]["backend"], "scripted");
        assert!(json["data"]["supportedTypes"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!("auto")));
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn recognize_success_envelope_has_data_no_error() {
        let app = create_router(test_state("AB12"));

        let response = app
            .oneshot(recognize_request("text", &captcha_base64()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["value"], "AB12");
        assert_eq!(json["data"]["captchaType"], "text");
        assert_eq!(json["data"]["cached"], false);
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn recognize_calculation_returns_number() {
        let app = create_router(test_state("3×4=?"));

        let response = app
            .oneshot(recognize_request("calculation", &captcha_base64()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["value"], 12);
        assert_eq!(json["data"]["rawText"], "3×4=?");
    }

    #[tokio::test]
    async fn unsupported_type_is_bad_request_envelope() {
        let app = create_router(test_state("AB12"));

        let response = app
            .oneshot(recognize_request("qrcode", &captcha_base64()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "unsupported_captcha_type");
        assert!(
            json["error"]["message"]
                .as_str()
                .unwrap()
                .contains("qrcode"),
            "message should echo the requested type"
        );
        assert!(json.get("data").is_none());
    }

    #[tokio::test]
    async fn invalid_base64_is_invalid_image() {
        let app = create_router(test_state("AB12"));

        let response = app
            .oneshot(recognize_request("text", "!!definitely not base64!!"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "invalid_image");
    }

    #[tokio::test]
    async fn unparseable_expression_is_unprocessable() {
        let app = create_router(test_state("hello world"));

        let response = app
            .oneshot(recognize_request("calculation", &captcha_base64()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "recognition_failed");
    }

    #[tokio::test]
    async fn stats_reports_uptime_and_operations() {
        let app = create_router(test_state("AB12"));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["data"]["uptimeSecs"].is_number());
        assert!(json["data"]["cache"]["capacity"].is_number());
        assert!(json["data"]["operations"].is_array());
    }
}
