use async_trait::async_trait;
use std::sync::Arc;

use crate::classifier::Classifier;
use crate::error::{KapchaError, Result};

use super::{CaptchaProcessor, FinalValue, OutputOptions, ProcessorOutput};

/// Character set a text-family processor accepts in its final value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Any,
    Digits,
    Letters,
    Alphanumeric,
}

impl Charset {
    fn matches(&self, c: char) -> bool {
        match self {
            Charset::Any => true,
            Charset::Digits => c.is_ascii_digit(),
            Charset::Letters => c.is_ascii_alphabetic(),
            Charset::Alphanumeric => c.is_ascii_alphanumeric(),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Charset::Any => "any characters",
            Charset::Digits => "digits only",
            Charset::Letters => "letters only",
            Charset::Alphanumeric => "letters and digits only",
        }
    }
}

/// Processor for the text-family captcha types. The charset decides which
/// type label it serves: unrestricted text, digits, letters, or mixed
/// alphanumeric.
pub struct TextProcessor {
    classifier: Arc<dyn Classifier>,
    charset: Charset,
}

impl TextProcessor {
    pub fn new(classifier: Arc<dyn Classifier>, charset: Charset) -> Self {
        Self {
            classifier,
            charset,
        }
    }

    /// Cleanup applied to the classifier text before validation. Interior
    /// whitespace runs collapse to a single space first so that
    /// `remove_spaces=false` still yields a tidy value.
    fn clean(&self, raw: &str, options: &OutputOptions) -> String {
        let mut text: String = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if options.remove_spaces {
            text.retain(|c| !c.is_whitespace());
        }
        if options.to_lowercase {
            text = text.to_lowercase();
        } else if options.to_uppercase {
            text = text.to_uppercase();
        }
        text
    }

    fn validate_charset(&self, text: &str) -> Result<()> {
        if let Some(bad) = text.chars().find(|c| !self.charset.matches(*c)) {
            return Err(KapchaError::RecognitionFailed(format!(
                "recognized text contains '{}' but this captcha type allows {}",
                bad,
                self.charset.describe()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CaptchaProcessor for TextProcessor {
    fn name(&self) -> &'static str {
        match self.charset {
            Charset::Any => "text",
            Charset::Digits => "digit",
            Charset::Letters => "letter",
            Charset::Alphanumeric => "mixed",
        }
    }

    async fn process(&self, image: &[u8], options: &OutputOptions) -> Result<ProcessorOutput> {
        let raw_text = self.classifier.classify(image).await?;
        let cleaned = self.clean(&raw_text, options);

        if cleaned.is_empty() {
            return Err(KapchaError::RecognitionFailed(
                "classifier returned no usable text".to_string(),
            ));
        }
        // Charset runs after cleanup so stripped spaces never count against it.
        self.validate_charset(&cleaned)?;

        Ok(ProcessorOutput {
            raw_text,
            value: FinalValue::Text(cleaned),
            confidence: None,
        })
    }
}
