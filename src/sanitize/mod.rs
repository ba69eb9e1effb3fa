//! Input sanitization for free-text request fields.
//!
//! Each field class runs the same all-or-nothing pipeline:
//!
//! 1. reject empty or whitespace-only input
//! 2. NFKC-normalize, strip NUL bytes, trim
//! 3. enforce the field's maximum length (in characters)
//! 4. reject prompt-injection and SQL-injection patterns
//! 5. `email` and `name` must also match their allowed grammar
//! 6. HTML-escape the result
//!
//! A detector match rejects the whole input rather than stripping the match.
//! [`escape_for_prompt`] is the one transform-only utility, for text that
//! has already been validated and must reach a prompt intact.

mod patterns;

use std::fmt;

use serde::Serialize;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::telemetry;

/// Free-text field classes, each with its own maximum length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldClass {
    Topic,
    Feedback,
    Email,
    Name,
}

impl FieldClass {
    /// Maximum length in characters, after normalization and trimming.
    pub fn max_len(&self) -> usize {
        match self {
            FieldClass::Topic => 500,
            FieldClass::Feedback => 2000,
            FieldClass::Email => 254,
            FieldClass::Name => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldClass::Topic => "topic",
            FieldClass::Feedback => "feedback",
            FieldClass::Email => "email",
            FieldClass::Name => "name",
        }
    }
}

impl fmt::Display for FieldClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a field was rejected. `Display` is safe to show to end users.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SanitizeError {
    #[error("{field} must not be empty")]
    Empty { field: FieldClass },

    #[error("{field} exceeds maximum length of {max} characters")]
    TooLong {
        field: FieldClass,
        max: usize,
        actual: usize,
    },

    #[error("malicious content detected in {field}: prompt injection")]
    PromptInjection { field: FieldClass },

    #[error("malicious content detected in {field}: SQL injection")]
    SqlInjection { field: FieldClass },

    #[error("invalid {field} format")]
    InvalidFormat { field: FieldClass },
}

impl SanitizeError {
    /// Stable machine-readable reason: `empty`, `length`, `injection` or `format`.
    pub fn code(&self) -> &'static str {
        match self {
            SanitizeError::Empty { .. } => "empty",
            SanitizeError::TooLong { .. } => "length",
            SanitizeError::PromptInjection { .. } | SanitizeError::SqlInjection { .. } => {
                "injection"
            }
            SanitizeError::InvalidFormat { .. } => "format",
        }
    }

    pub fn field(&self) -> FieldClass {
        match self {
            SanitizeError::Empty { field }
            | SanitizeError::TooLong { field, .. }
            | SanitizeError::PromptInjection { field }
            | SanitizeError::SqlInjection { field }
            | SanitizeError::InvalidFormat { field } => *field,
        }
    }
}

/// Validate and clean `input` as a field of class `field`.
pub fn validate(field: FieldClass, input: &str) -> Result<String, SanitizeError> {
    let result = match field {
        FieldClass::Topic | FieldClass::Feedback => free_text(field, input),
        FieldClass::Email => email(input),
        FieldClass::Name => name(input),
    };

    if let Err(e) = &result {
        metrics::counter!(
            telemetry::SANITIZER_REJECTIONS_TOTAL,
            "field" => field.as_str(),
            "reason" => e.code()
        )
        .increment(1);
        debug!(field = field.as_str(), reason = e.code(), "input rejected");
    }
    result
}

pub fn sanitize_topic(input: &str) -> Result<String, SanitizeError> {
    validate(FieldClass::Topic, input)
}

pub fn sanitize_feedback(input: &str) -> Result<String, SanitizeError> {
    validate(FieldClass::Feedback, input)
}

/// Validate an email address. The result is lower-cased.
pub fn sanitize_email(input: &str) -> Result<String, SanitizeError> {
    validate(FieldClass::Email, input)
}

pub fn sanitize_name(input: &str) -> Result<String, SanitizeError> {
    validate(FieldClass::Name, input)
}

fn free_text(field: FieldClass, input: &str) -> Result<String, SanitizeError> {
    let text = normalize(field, input)?;
    detect_injection(field, &text)?;
    Ok(html_escape(&text))
}

fn email(input: &str) -> Result<String, SanitizeError> {
    let field = FieldClass::Email;
    let text = normalize(field, input)?;
    detect_injection(field, &text)?;
    if !patterns::email().is_match(&text) {
        return Err(SanitizeError::InvalidFormat { field });
    }
    Ok(html_escape(&text.to_lowercase()))
}

fn name(input: &str) -> Result<String, SanitizeError> {
    let field = FieldClass::Name;
    let text = normalize(field, input)?;
    detect_injection(field, &text)?;
    if !patterns::name().is_match(&text) {
        return Err(SanitizeError::InvalidFormat { field });
    }
    Ok(html_escape(&text))
}

/// Steps 1-3 of the pipeline.
fn normalize(field: FieldClass, input: &str) -> Result<String, SanitizeError> {
    if input.trim().is_empty() {
        return Err(SanitizeError::Empty { field });
    }

    let normalized = normalize_text(input);
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        return Err(SanitizeError::Empty { field });
    }

    let actual = trimmed.chars().count();
    if actual > field.max_len() {
        return Err(SanitizeError::TooLong {
            field,
            max: field.max_len(),
            actual,
        });
    }
    Ok(trimmed.to_string())
}

/// NFKC-normalize `text` and strip NUL bytes.
///
/// Fullwidth and other compatibility forms fold to their plain letters,
/// which is what every detector in this crate matches against.
pub fn normalize_text(text: &str) -> String {
    text.nfkc().filter(|c| *c != '\0').collect()
}

fn detect_injection(field: FieldClass, text: &str) -> Result<(), SanitizeError> {
    if patterns::prompt_injection().is_match(text) {
        return Err(SanitizeError::PromptInjection { field });
    }
    if patterns::sql_injection().is_match(text) {
        return Err(SanitizeError::SqlInjection { field });
    }
    Ok(())
}

/// Escape `& < > " '` for safe inclusion in HTML.
pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Control tokens neutralized by [`escape_for_prompt`], with their replacements.
const PROMPT_TOKENS: &[(&str, &str)] = &[
    ("```", "'''"),
    ("<|", "< |"),
    ("|>", "| >"),
    ("[INST]", "[ INST ]"),
    ("[/INST]", "[ /INST ]"),
    ("<<SYS>>", "< <SYS> >"),
    ("<</SYS>>", "< </SYS> >"),
    ("{{", "{ {"),
    ("}}", "} }"),
    ("###", "# # #"),
];

/// Neutralize prompt control sequences without rejecting anything.
///
/// Meant for already-validated text that must reach a prompt verbatim.
/// Everything other than the listed tokens (and NUL bytes) is left as is.
pub fn escape_for_prompt(text: &str) -> String {
    let mut out: String = text.chars().filter(|c| *c != '\0').collect();
    for (token, replacement) in PROMPT_TOKENS {
        // Runs like "{{{" re-form the token after one pass.
        while out.contains(token) {
            out = out.replace(token, replacement);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_applies_nfkc_and_strips_nul() {
        // U+FB01 (fi ligature) folds to "fi" under NFKC.
        assert_eq!(
            normalize(FieldClass::Topic, "  \u{FB01}le\0 ").unwrap(),
            "file"
        );
    }

    #[test]
    fn nul_only_input_is_empty() {
        assert_eq!(
            normalize(FieldClass::Topic, "\0\0"),
            Err(SanitizeError::Empty {
                field: FieldClass::Topic
            })
        );
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let text = "é".repeat(FieldClass::Name.max_len());
        assert!(normalize(FieldClass::Name, &text).is_ok());
    }

    #[test]
    fn html_escape_covers_five_characters() {
        assert_eq!(
            html_escape(r#"<a href="x">Tom & Jerry's</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#x27;s&lt;/a&gt;"
        );
    }

    #[test]
    fn escape_for_prompt_neutralizes_nested_runs() {
        let escaped = escape_for_prompt("{{{name}}} ```code``` <|im_end|>");
        assert!(!escaped.contains("{{"));
        assert!(!escaped.contains("}}"));
        assert!(!escaped.contains("```"));
        assert!(!escaped.contains("<|"));
        assert!(escaped.contains("name"));
    }

    #[test]
    fn error_codes() {
        let field = FieldClass::Feedback;
        assert_eq!(SanitizeError::Empty { field }.code(), "empty");
        assert_eq!(
            SanitizeError::TooLong {
                field,
                max: 1,
                actual: 2
            }
            .code(),
            "length"
        );
        assert_eq!(SanitizeError::SqlInjection { field }.code(), "injection");
        assert_eq!(SanitizeError::InvalidFormat { field }.field(), field);
    }
}
