use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::classifier::Classifier;
use crate::error::{KapchaError, Result};
use crate::processors::CaptchaType;

/// Resolves an `auto` request to a concrete captcha type. Pluggable so a
/// dedicated classifier model can replace the built-in heuristic.
#[async_trait]
pub trait TypeDetector: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Result<CaptchaType>;
}

/// Default detector: runs one classification pass over the preprocessed image
/// and votes on the character set of the returned text.
pub struct CharsetDetector {
    classifier: Arc<dyn Classifier>,
}

impl CharsetDetector {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    fn vote(text: &str) -> Result<CaptchaType> {
        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        if chars.is_empty() {
            return Err(KapchaError::RecognitionFailed(
                "classifier returned no text to detect a captcha type from".to_string(),
            ));
        }

        if looks_like_arithmetic(&chars) {
            return Ok(CaptchaType::Calculation);
        }
        if chars.iter().all(|c| c.is_ascii_digit()) {
            return Ok(CaptchaType::Digit);
        }
        if chars.iter().all(|c| c.is_ascii_alphabetic()) {
            return Ok(CaptchaType::Letter);
        }
        if chars.iter().all(|c| c.is_ascii_alphanumeric()) {
            return Ok(CaptchaType::Mixed);
        }
        Ok(CaptchaType::Text)
    }
}

fn looks_like_arithmetic(chars: &[char]) -> bool {
    if chars
        .iter()
        .any(|c| matches!(c, '+' | '-' | '−' | '*' | '/' | '×' | '÷' | '='))
    {
        return true;
    }
    // 'x' only counts as multiply when wedged between digits.
    chars.windows(3).any(|w| {
        matches!(w[1], 'x' | 'X') && w[0].is_ascii_digit() && w[2].is_ascii_digit()
    })
}

#[async_trait]
impl TypeDetector for CharsetDetector {
    async fn detect(&self, image: &[u8]) -> Result<CaptchaType> {
        let text = self.classifier.classify(image).await?;
        let detected = Self::vote(&text)?;
        debug!(text = %text.trim(), detected = %detected, "Auto-detected captcha type");
        Ok(detected)
    }
}
