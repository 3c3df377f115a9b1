use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

use crate::classifier::Classifier;
use crate::error::{KapchaError, Result};

use super::{CaptchaProcessor, FinalValue, OutputOptions, ProcessorOutput};

/// Processor for arithmetic captchas ("3+4=?"). Repairs common OCR
/// confusions, normalizes operator glyphs, then parses with a restricted
/// grammar: two integer operands and one binary operator. OCR output is
/// untrusted text and never reaches a general expression evaluator.
pub struct CalculationProcessor {
    classifier: Arc<dyn Classifier>,
    expression: Regex,
}

impl CalculationProcessor {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            // Literal pattern, compile cannot fail.
            expression: Regex::new(r"(\d+)([+\-*/])(\d+)").expect("valid expression pattern"),
        }
    }

    /// Character-level cleanup of the raw OCR string: drop whitespace and
    /// question marks, repair digit lookalikes, map operator glyph variants
    /// onto `+ - * /`, then trim any trailing `=`.
    fn normalize(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        for c in raw.chars() {
            if c.is_whitespace() || c == '?' {
                continue;
            }
            out.push(match c {
                'O' | 'o' => '0',
                'l' | 'I' => '1',
                'Z' => '2',
                'S' => '5',
                'B' => '8',
                'x' | 'X' | '×' => '*',
                '÷' => '/',
                '−' => '-',
                other => other,
            });
        }
        out.trim_end_matches('=').to_string()
    }

    fn parse(&self, normalized: &str) -> Result<(i64, char, i64)> {
        let caps = self.expression.captures(normalized).ok_or_else(|| {
            KapchaError::RecognitionFailed(format!(
                "no arithmetic expression found in '{normalized}'"
            ))
        })?;

        let lhs = parse_operand(&caps[1])?;
        let rhs = parse_operand(&caps[3])?;
        // The operator group is a single ASCII char by construction.
        let op = caps[2].chars().next().ok_or_else(|| {
            KapchaError::InternalError("expression match without operator".to_string())
        })?;
        Ok((lhs, op, rhs))
    }

    fn evaluate(&self, lhs: i64, op: char, rhs: i64, options: &OutputOptions) -> Result<FinalValue> {
        let overflow = || KapchaError::RecognitionFailed(format!("'{lhs}{op}{rhs}' overflows"));
        match op {
            '+' => lhs.checked_add(rhs).map(FinalValue::Integer).ok_or_else(overflow),
            '-' => lhs.checked_sub(rhs).map(FinalValue::Integer).ok_or_else(overflow),
            '*' => lhs.checked_mul(rhs).map(FinalValue::Integer).ok_or_else(overflow),
            '/' => {
                if rhs == 0 {
                    return Err(KapchaError::RecognitionFailed(
                        "division by zero".to_string(),
                    ));
                }
                if options.as_int && lhs % rhs == 0 {
                    Ok(FinalValue::Integer(lhs / rhs))
                } else {
                    Ok(FinalValue::Float(lhs as f64 / rhs as f64))
                }
            }
            other => Err(KapchaError::InternalError(format!(
                "unreachable operator '{other}'"
            ))),
        }
    }
}

fn parse_operand(digits: &str) -> Result<i64> {
    digits.parse::<i64>().map_err(|_| {
        KapchaError::RecognitionFailed(format!("operand '{digits}' is out of range"))
    })
}

#[async_trait]
impl CaptchaProcessor for CalculationProcessor {
    fn name(&self) -> &'static str {
        "calculation"
    }

    async fn process(&self, image: &[u8], options: &OutputOptions) -> Result<ProcessorOutput> {
        let raw_text = self.classifier.classify(image).await?;
        let normalized = self.normalize(&raw_text);
        let (lhs, op, rhs) = self.parse(&normalized)?;

        let value = if options.return_expression {
            FinalValue::Text(format!("{lhs}{op}{rhs}"))
        } else {
            self.evaluate(lhs, op, rhs, options)?
        };

        Ok(ProcessorOutput {
            raw_text,
            value,
            confidence: None,
        })
    }
}
