//! Input validation: bounds and sanitizes raw query text.

use std::sync::LazyLock;

use ragchat_config::SecurityConfig;
use ragchat_core::error::ValidationError;
use regex_lite::Regex;
use tracing::warn;

/// Markup and URI patterns that are never forwarded to the model.
static DANGEROUS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?is)<script.*?>.*?</script\s*>",
        r"(?i)javascript:",
        r"(?i)vbscript:",
        r"(?i)data:text/html",
        r"(?i)\bon\w+\s*=",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("built-in pattern compiles"))
    .collect()
});

/// Validates raw queries against configured length bounds and a fixed
/// set of unsafe patterns.
///
/// Pure and deterministic. Output is whitespace-collapsed, so validating an
/// accepted query again returns it unchanged.
#[derive(Debug, Clone)]
pub struct InputValidator {
    min_len: usize,
    max_len: usize,
}

impl InputValidator {
    pub fn new(min_len: usize, max_len: usize) -> Self {
        Self { min_len, max_len }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(config.min_query_length, config.max_query_length)
    }

    /// Return the sanitized query or the reason it was refused.
    ///
    /// Lengths are counted in characters. The upper bound applies to the
    /// trimmed input, so padding inside a query still counts against it. The
    /// lower bound applies to the collapsed text, which keeps an accepted
    /// query valid when it is validated again.
    pub fn validate(&self, raw: &str) -> Result<String, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyInput);
        }
        if trimmed.chars().count() > self.max_len {
            return Err(ValidationError::TooLong { max: self.max_len });
        }

        let normalized = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.chars().count() < self.min_len {
            return Err(ValidationError::TooShort { min: self.min_len });
        }

        if DANGEROUS_PATTERNS.iter().any(|p| p.is_match(&normalized)) {
            let preview: String = normalized.chars().take(50).collect();
            warn!(target: "audit", preview = %preview, "Rejected query with unsafe content");
            return Err(ValidationError::UnsafeContent);
        }

        Ok(normalized)
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::from_config(&SecurityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> InputValidator {
        InputValidator::default()
    }

    #[test]
    fn valid_query_passes_unchanged() {
        let q = "What is the company vacation policy?";
        assert_eq!(validator().validate(q).unwrap(), q);
    }

    #[test]
    fn empty_and_whitespace_only_rejected() {
        assert_eq!(validator().validate(""), Err(ValidationError::EmptyInput));
        assert_eq!(validator().validate("   \n\t   "), Err(ValidationError::EmptyInput));
    }

    #[test]
    fn length_bounds_enforced() {
        assert_eq!(validator().validate("a"), Err(ValidationError::TooShort { min: 2 }));
        assert_eq!(
            validator().validate(&"a".repeat(2001)),
            Err(ValidationError::TooLong { max: 2000 })
        );
        assert!(validator().validate(&"a".repeat(2000)).is_ok());
    }

    #[test]
    fn inner_whitespace_counts_toward_max_length() {
        let padded = format!("x{}y", " ".repeat(2100));
        assert_eq!(validator().validate(&padded), Err(ValidationError::TooLong { max: 2000 }));

        // Surrounding whitespace is trimmed before counting.
        let surrounded = format!("{}{}{}", " ".repeat(50), "a".repeat(2000), "\n".repeat(50));
        assert!(validator().validate(&surrounded).is_ok());
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let v = InputValidator::new(2, 10);
        assert!(v.validate("ééééééééé").is_ok());
    }

    #[test]
    fn script_tags_rejected_in_any_case() {
        for q in [
            "What is <script>alert('xss')</script> the policy?",
            "<SCRIPT type=\"text/javascript\">x</ScRiPt>",
            "before <script>\nmulti\nline\n</script> after",
        ] {
            assert_eq!(validator().validate(q), Err(ValidationError::UnsafeContent), "{q}");
        }
    }

    #[test]
    fn uri_schemes_rejected() {
        for q in ["javascript:alert('xss')", "open VBScript:msgbox", "see data:text/html;base64,AAA"] {
            assert_eq!(validator().validate(q), Err(ValidationError::UnsafeContent), "{q}");
        }
    }

    #[test]
    fn event_handler_attributes_rejected() {
        assert_eq!(
            validator().validate("<img src=x onerror=alert(1)>"),
            Err(ValidationError::UnsafeContent)
        );
        assert_eq!(
            validator().validate("click ONCLICK = run()"),
            Err(ValidationError::UnsafeContent)
        );
    }

    #[test]
    fn words_containing_on_are_not_handlers() {
        assert!(validator().validate("Is the condition=met for overtime?").is_ok());
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(
            validator().validate("  What   is \n\n the    policy?  ").unwrap(),
            "What is the policy?"
        );
    }

    #[test]
    fn validation_is_idempotent() {
        for q in ["What   is the\tpolicy?", "hi  there", "  a b  ", "Remote work\n\nrules?"] {
            let once = validator().validate(q).unwrap();
            assert_eq!(validator().validate(&once).unwrap(), once);
        }
    }
}
