//! Recognition Processors Module
//!
//! Type-specific decoding strategies sitting between the raw classifier output
//! and the final result. The engine never branches on captcha types itself;
//! it looks the processor up in [`ProcessorRegistry`] and dispatches through
//! the [`CaptchaProcessor`] trait. New captcha types are added by registering
//! a new processor, nothing else.

mod calculation;
mod text;

pub use calculation::CalculationProcessor;
pub use text::{Charset, TextProcessor};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::classifier::Classifier;
use crate::error::{KapchaError, Result};

/// Captcha categories the engine can dispatch on. `Auto` is resolved to a
/// concrete type before registry lookup and never has a processor of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptchaType {
    Text,
    Digit,
    Letter,
    Mixed,
    Calculation,
    Auto,
}

impl CaptchaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptchaType::Text => "text",
            CaptchaType::Digit => "digit",
            CaptchaType::Letter => "letter",
            CaptchaType::Mixed => "mixed",
            CaptchaType::Calculation => "calculation",
            CaptchaType::Auto => "auto",
        }
    }
}

impl fmt::Display for CaptchaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptchaType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(CaptchaType::Text),
            "digit" => Ok(CaptchaType::Digit),
            "letter" => Ok(CaptchaType::Letter),
            "mixed" => Ok(CaptchaType::Mixed),
            "calculation" => Ok(CaptchaType::Calculation),
            "auto" => Ok(CaptchaType::Auto),
            _ => Err(()),
        }
    }
}

/// Options shaping the final value a processor emits.
///
/// Field names serialize as camelCase on the wire (`returnExpression`,
/// `asInt`, `removeSpaces`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutputOptions {
    /// Calculation only: return the normalized expression string instead of
    /// evaluating it.
    pub return_expression: bool,
    /// Calculation only: collapse an integral quotient to an integer.
    pub as_int: bool,
    /// Text types: strip every whitespace character from the result.
    pub remove_spaces: bool,
    pub to_lowercase: bool,
    pub to_uppercase: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            return_expression: false,
            as_int: true,
            remove_spaces: true,
            to_lowercase: false,
            to_uppercase: false,
        }
    }
}

impl OutputOptions {
    pub fn validate(&self) -> Result<()> {
        if self.to_lowercase && self.to_uppercase {
            return Err(KapchaError::InvalidParameter(
                "to_lowercase and to_uppercase are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    /// Stable textual form used inside cache fingerprints.
    pub fn canonical(&self) -> String {
        format!(
            "expr={};int={};despace={};lower={};upper={}",
            self.return_expression,
            self.as_int,
            self.remove_spaces,
            self.to_lowercase,
            self.to_uppercase,
        )
    }
}

/// Final recognition value: a number for evaluated calculations, text
/// otherwise. Serialized untagged, so callers see a plain JSON number or
/// string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FinalValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for FinalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalValue::Integer(v) => write!(f, "{v}"),
            FinalValue::Float(v) => write!(f, "{v}"),
            FinalValue::Text(v) => f.write_str(v),
        }
    }
}

/// What a processor hands back to the engine: the untouched classifier text
/// plus the decoded value.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorOutput {
    pub raw_text: String,
    pub value: FinalValue,
    pub confidence: Option<f32>,
}

/// One decoding strategy: invoke the classifier over the preprocessed image
/// and turn its raw text into a final value.
#[async_trait]
pub trait CaptchaProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, image: &[u8], options: &OutputOptions) -> Result<ProcessorOutput>;
}

/// Dispatch table from captcha type to processor. Built once at startup and
/// read-only afterwards; the engine shares it behind an `Arc`.
pub struct ProcessorRegistry {
    processors: HashMap<CaptchaType, Arc<dyn CaptchaProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// The built-in processor set: charset-restricted text decoding for
    /// text/digit/letter/mixed and arithmetic decoding for calculation.
    pub fn standard(classifier: Arc<dyn Classifier>) -> Self {
        let mut registry = Self::new();
        registry.register(
            CaptchaType::Text,
            Arc::new(TextProcessor::new(Arc::clone(&classifier), Charset::Any)),
        );
        registry.register(
            CaptchaType::Digit,
            Arc::new(TextProcessor::new(Arc::clone(&classifier), Charset::Digits)),
        );
        registry.register(
            CaptchaType::Letter,
            Arc::new(TextProcessor::new(
                Arc::clone(&classifier),
                Charset::Letters,
            )),
        );
        registry.register(
            CaptchaType::Mixed,
            Arc::new(TextProcessor::new(
                Arc::clone(&classifier),
                Charset::Alphanumeric,
            )),
        );
        registry.register(
            CaptchaType::Calculation,
            Arc::new(CalculationProcessor::new(classifier)),
        );
        registry
    }

    pub fn register(&mut self, captcha_type: CaptchaType, processor: Arc<dyn CaptchaProcessor>) {
        self.processors.insert(captcha_type, processor);
    }

    pub fn get(&self, captcha_type: CaptchaType) -> Option<Arc<dyn CaptchaProcessor>> {
        self.processors.get(&captcha_type).cloned()
    }

    pub fn contains(&self, captcha_type: CaptchaType) -> bool {
        self.processors.contains_key(&captcha_type)
    }

    /// Registered type labels, sorted for stable error messages and health
    /// payloads.
    pub fn supported_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .processors
            .keys()
            .map(|t| t.as_str().to_string())
            .collect();
        types.sort();
        types
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedClassifier;
    use super::*;

    #[test]
    fn test_captcha_type_parsing() {
        assert_eq!("text".parse::<CaptchaType>(), Ok(CaptchaType::Text));
        assert_eq!("DIGIT".parse::<CaptchaType>(), Ok(CaptchaType::Digit));
        assert_eq!(
            "calculation".parse::<CaptchaType>(),
            Ok(CaptchaType::Calculation)
        );
        assert_eq!("auto".parse::<CaptchaType>(), Ok(CaptchaType::Auto));
        assert!("qrcode".parse::<CaptchaType>().is_err());
    }

    #[test]
    fn test_output_options_case_conflict() {
        let options = OutputOptions {
            to_lowercase: true,
            to_uppercase: true,
            ..Default::default()
        };
        let err = options.validate().unwrap_err();
        assert!(matches!(err, KapchaError::InvalidParameter(_)));
    }

    #[test]
    fn test_output_options_canonical_is_sensitive() {
        let a = OutputOptions::default();
        let b = OutputOptions {
            return_expression: true,
            ..Default::default()
        };
        assert_ne!(a.canonical(), b.canonical());
        assert_eq!(a.canonical(), OutputOptions::default().canonical());
    }

    #[test]
    fn test_final_value_serializes_untagged() {
        assert_eq!(
            serde_json::to_string(&FinalValue::Integer(12)).unwrap(),
            "12"
        );
        assert_eq!(
            serde_json::to_string(&FinalValue::Float(3.5)).unwrap(),
            "3.5"
        );
        assert_eq!(
            serde_json::to_string(&FinalValue::Text("AB12".to_string())).unwrap(),
            "\"AB12\""
        );
    }

    #[test]
    fn test_standard_registry_contents() {
        let registry = ProcessorRegistry::standard(ScriptedClassifier::always("x"));
        assert_eq!(
            registry.supported_types(),
            vec!["calculation", "digit", "letter", "mixed", "text"]
        );
        assert!(registry.contains(CaptchaType::Text));
        assert!(!registry.contains(CaptchaType::Auto));
    }

    #[test]
    fn test_registry_lookup_and_extension() {
        let classifier = ScriptedClassifier::always("x");
        let mut registry = ProcessorRegistry::new();
        assert!(registry.get(CaptchaType::Text).is_none());

        registry.register(
            CaptchaType::Text,
            Arc::new(TextProcessor::new(classifier, Charset::Any)),
        );
        let processor = registry.get(CaptchaType::Text).unwrap();
        assert_eq!(processor.name(), "text");
    }
}
