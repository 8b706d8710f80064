// Match types: how a single field value is compared against a trigger.
//
// A match type is compiled once per trigger when the rule set is built. The
// resulting `ValueMatcher` holds everything the comparison needs (the
// expected text, compiled regular expressions) so matching during a save
// does no parsing and cannot fail.
//
// Built-in types:
//   exact            ordinal equality with option `value`
//   caseInsensitive  equality after lowercase folding
//   regex            any pattern in option `regexes` finds a match;
//                    option `case_insensitive` applies to every pattern

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::host::FieldValue;
use crate::override_chain::MatchOptions;

pub const EXACT_MATCH: &str = "exact";
pub const CASE_INSENSITIVE_MATCH: &str = "caseInsensitive";
pub const REGEX_MATCH: &str = "regex";

/// Why a match type could not compile a trigger's options.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MatchOptionsError {
    #[error("option `{option}` is required by match type {match_type}")]
    MissingOption { match_type: String, option: String },

    #[error("option `{option}` of match type {match_type} must be {expected}")]
    InvalidOption {
        match_type: String,
        option: String,
        expected: String,
    },

    #[error("invalid regular expression \"{pattern}\": {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// A compiled comparison for one trigger.
pub trait ValueMatcher: Send + Sync + fmt::Debug {
    fn matches(&self, value: &FieldValue) -> bool;
}

/// A named comparison strategy.
pub trait MatchType: Send + Sync + fmt::Debug {
    /// Name the configuration refers to this match type by.
    fn name(&self) -> &str;

    /// Builds a matcher from the trigger's resolved options.
    fn compile(&self, options: &MatchOptions<'_>) -> Result<Box<dyn ValueMatcher>, MatchOptionsError>;
}

/// Text of the `value` option. Scalars are accepted and stringified.
fn expected_value(match_type: &str, options: &MatchOptions<'_>) -> Result<String, MatchOptionsError> {
    let value = options.get("value").ok_or_else(|| MatchOptionsError::MissingOption {
        match_type: match_type.to_string(),
        option: "value".to_string(),
    })?;
    FieldValue::from_json(value)
        .map(|v| v.as_match_text())
        .ok_or_else(|| MatchOptionsError::InvalidOption {
            match_type: match_type.to_string(),
            option: "value".to_string(),
            expected: "a string or number".to_string(),
        })
}

// ============================================================================
// EXACT
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

#[derive(Debug, Clone)]
pub struct ExactMatcher {
    expected: String,
}

impl ExactMatcher {
    pub fn new(expected: impl Into<String>) -> Self {
        ExactMatcher {
            expected: expected.into(),
        }
    }
}

impl ValueMatcher for ExactMatcher {
    fn matches(&self, value: &FieldValue) -> bool {
        value.as_match_text() == self.expected
    }
}

impl MatchType for ExactMatch {
    fn name(&self) -> &str {
        EXACT_MATCH
    }

    fn compile(&self, options: &MatchOptions<'_>) -> Result<Box<dyn ValueMatcher>, MatchOptionsError> {
        Ok(Box::new(ExactMatcher::new(expected_value(EXACT_MATCH, options)?)))
    }
}

// ============================================================================
// CASE INSENSITIVE
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct CaseInsensitiveMatch;

#[derive(Debug, Clone)]
pub struct CaseInsensitiveMatcher {
    /// Expected text, already folded.
    folded: String,
}

impl CaseInsensitiveMatcher {
    pub fn new(expected: &str) -> Self {
        CaseInsensitiveMatcher {
            folded: expected.to_lowercase(),
        }
    }
}

impl ValueMatcher for CaseInsensitiveMatcher {
    fn matches(&self, value: &FieldValue) -> bool {
        value.as_match_text().to_lowercase() == self.folded
    }
}

impl MatchType for CaseInsensitiveMatch {
    fn name(&self) -> &str {
        CASE_INSENSITIVE_MATCH
    }

    fn compile(&self, options: &MatchOptions<'_>) -> Result<Box<dyn ValueMatcher>, MatchOptionsError> {
        let expected = expected_value(CASE_INSENSITIVE_MATCH, options)?;
        Ok(Box::new(CaseInsensitiveMatcher::new(&expected)))
    }
}

// ============================================================================
// REGEX
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct RegexMatch;

/// Matches when any of its patterns matches. No patterns never matches.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    patterns: Vec<Regex>,
}

impl RegexMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S], case_insensitive: bool) -> Result<Self, MatchOptionsError> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern.as_ref())
                    .case_insensitive(case_insensitive)
                    .build()
                    .map_err(|e| MatchOptionsError::InvalidPattern {
                        pattern: pattern.as_ref().to_string(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RegexMatcher { patterns })
    }
}

impl ValueMatcher for RegexMatcher {
    fn matches(&self, value: &FieldValue) -> bool {
        let text = value.as_match_text();
        self.patterns.iter().any(|pattern| pattern.is_match(&text))
    }
}

impl MatchType for RegexMatch {
    fn name(&self) -> &str {
        REGEX_MATCH
    }

    fn compile(&self, options: &MatchOptions<'_>) -> Result<Box<dyn ValueMatcher>, MatchOptionsError> {
        let invalid = || MatchOptionsError::InvalidOption {
            match_type: REGEX_MATCH.to_string(),
            option: "regexes".to_string(),
            expected: "a pattern or a list of patterns".to_string(),
        };

        let patterns: Vec<&str> = match options.get("regexes") {
            Some(Value::String(pattern)) => vec![pattern.as_str()],
            Some(Value::Array(list)) => list
                .iter()
                .map(|p| p.as_str().ok_or_else(invalid))
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(invalid()),
            None => {
                return Err(MatchOptionsError::MissingOption {
                    match_type: REGEX_MATCH.to_string(),
                    option: "regexes".to_string(),
                })
            }
        };

        let matcher = RegexMatcher::new(&patterns, options.get_flag("case_insensitive"))?;
        Ok(Box::new(matcher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn options(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn compile(match_type: &dyn MatchType, value: Value) -> Result<Box<dyn ValueMatcher>, MatchOptionsError> {
        let map = options(value);
        match_type.compile(&MatchOptions::single(&map))
    }

    #[test]
    fn test_exact_is_ordinal() {
        let matcher = compile(&ExactMatch, json!({"value": "Australia"})).unwrap();
        assert!(matcher.matches(&"Australia".into()));
        assert!(!matcher.matches(&"australia".into()));
        assert!(!matcher.matches(&"Australia ".into()));
    }

    #[test]
    fn test_exact_numeric_value() {
        let matcher = compile(&ExactMatch, json!({"value": 1788})).unwrap();
        assert!(matcher.matches(&FieldValue::Integer(1788)));
        assert!(matcher.matches(&"1788".into()));
    }

    #[test]
    fn test_exact_requires_value() {
        let err = compile(&ExactMatch, json!({})).unwrap_err();
        assert_eq!(
            err,
            MatchOptionsError::MissingOption {
                match_type: "exact".into(),
                option: "value".into()
            }
        );
        assert!(compile(&ExactMatch, json!({"value": ["a"]})).is_err());
    }

    #[test]
    fn test_case_insensitive() {
        let matcher = compile(&CaseInsensitiveMatch, json!({"value": "New Zealand"})).unwrap();
        assert!(matcher.matches(&"new zealand".into()));
        assert!(matcher.matches(&"NEW ZEALAND".into()));
        assert!(!matcher.matches(&"NewZealand".into()));
    }

    #[test]
    fn test_regex_any_pattern() {
        let matcher = compile(&RegexMatch, json!({"regexes": ["^Aus", "land$"]})).unwrap();
        assert!(matcher.matches(&"Australia".into()));
        assert!(matcher.matches(&"New Zealand".into()));
        assert!(!matcher.matches(&"Fiji".into()));
        assert!(!matcher.matches(&"australia".into()));
    }

    #[test]
    fn test_regex_case_insensitive_flag() {
        let matcher = compile(
            &RegexMatch,
            json!({"regexes": ["^aus"], "case_insensitive": true}),
        )
        .unwrap();
        assert!(matcher.matches(&"AUSTRALIA".into()));
    }

    #[test]
    fn test_regex_slash_needs_no_escaping() {
        let matcher = compile(&RegexMatch, json!({"regexes": ["^a/b$"]})).unwrap();
        assert!(matcher.matches(&"a/b".into()));
    }

    #[test]
    fn test_regex_single_pattern_and_empty_list() {
        let single = compile(&RegexMatch, json!({"regexes": "\\d{4}"})).unwrap();
        assert!(single.matches(&"circa 1788".into()));

        let none = compile(&RegexMatch, json!({"regexes": []})).unwrap();
        assert!(!none.matches(&"anything".into()));
    }

    #[test]
    fn test_regex_option_errors() {
        assert!(matches!(
            compile(&RegexMatch, json!({})).unwrap_err(),
            MatchOptionsError::MissingOption { .. }
        ));
        assert!(matches!(
            compile(&RegexMatch, json!({"regexes": [1]})).unwrap_err(),
            MatchOptionsError::InvalidOption { .. }
        ));
        assert!(matches!(
            compile(&RegexMatch, json!({"regexes": ["(unclosed"]})).unwrap_err(),
            MatchOptionsError::InvalidPattern { .. }
        ));
    }
}
