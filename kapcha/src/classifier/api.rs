use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ClassifierConfig;
use crate::error::{KapchaError, Result};

const CAPTCHA_PROMPT: &str = "Read the characters shown in this CAPTCHA image. \
Respond with only the characters, no explanations, no formatting.";

/// Chat-completions vision client for remote classification.
///
/// One client covers every OpenAI-compatible provider; only the default base
/// URL and the credential requirement differ per provider.
#[derive(Clone, Debug)]
pub struct VisionApiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    max_retries: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: String,
}

fn default_base_url(provider: &str) -> &'static str {
    match provider {
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        "lmstudio" => "http://localhost:1234/v1",
        _ => "https://api.openai.com/v1",
    }
}

/// Hosted providers reject unauthenticated requests, so a missing key is a
/// constructor error; local gateways run without one.
fn requires_api_key(provider: &str) -> bool {
    matches!(provider, "openai" | "openrouter")
}

impl VisionApiClient {
    pub fn new(config: &ClassifierConfig, provider: &str, model: &str) -> Result<Self> {
        let api_key = if requires_api_key(provider) {
            Some(config.api_key.clone().ok_or_else(|| {
                KapchaError::UpstreamFailure(format!(
                    "API key required for {provider} classification"
                ))
            })?)
        } else {
            config.api_key.clone()
        };

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                KapchaError::UpstreamFailure(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            api_key,
            base_url,
            model: model.to_string(),
            max_retries: config.max_retries.max(1),
        })
    }

    pub async fn classify(&self, image_bytes: &[u8]) -> Result<String> {
        let base64_image = STANDARD.encode(image_bytes);
        let data_url = format!("data:image/png;base64,{base64_image}");

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: CAPTCHA_PROMPT.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            // Captcha answers are a handful of characters.
            max_tokens: 64,
        };

        self.make_request(&request).await
    }

    async fn make_request(&self, request: &ChatRequest) -> Result<String> {
        let mut retries = 0;
        let max_retries = self.max_retries;

        loop {
            let mut builder = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .header("Content-Type", "application/json")
                .json(request);
            if let Some(key) = &self.api_key {
                builder = builder.header("Authorization", format!("Bearer {key}"));
            }
            let response = builder.send().await;

            match response {
                Ok(resp) => {
                    if resp.status().is_success() {
                        let chat_response: ChatResponse = resp.json().await.map_err(|e| {
                            KapchaError::UpstreamFailure(format!("Failed to parse response: {e}"))
                        })?;

                        return chat_response
                            .choices
                            .first()
                            .map(|c| c.message.content.clone())
                            .ok_or_else(|| {
                                KapchaError::UpstreamFailure(
                                    "No response from classification API".to_string(),
                                )
                            });
                    } else if resp.status().as_u16() == 429 || resp.status().is_server_error() {
                        retries += 1;
                        if retries >= max_retries {
                            return Err(KapchaError::UpstreamFailure(format!(
                                "API request failed after {} retries: {}",
                                max_retries,
                                resp.status()
                            )));
                        }
                        let delay = Duration::from_millis(100 * (2_u64.pow(retries)));
                        tokio::time::sleep(delay).await;
                        continue;
                    } else {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        return Err(KapchaError::UpstreamFailure(format!(
                            "API request failed: {status} - {body}"
                        )));
                    }
                }
                Err(e) => {
                    retries += 1;
                    if retries >= max_retries {
                        return Err(KapchaError::UpstreamFailure(format!(
                            "API request failed after {max_retries} retries: {e}"
                        )));
                    }
                    let delay = Duration::from_millis(100 * (2_u64.pow(retries)));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
