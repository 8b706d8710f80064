// Validation of a relationship generator configuration document.
//
// Each section of the document (the top level, every rule and every trigger)
// is checked against a table of requirements:
//   - required: the key must be present and non-null
//   - kind:     when present, the value must have this type
//   - call:     when present, the value must name a registered operator or
//               match type
// Validation never mutates the document and never fails; it collects
// human-readable errors. Whether the generator is available depends only on
// the `enabled` flag, not on the number of errors.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::config::{lookup, read_flag, rule_entries};
use crate::match_type::MatchOptionsError;
use crate::registry::StrategyRegistry;

// ============================================================================
// REQUIREMENTS
// ============================================================================

/// Type of a configuration value, named as the configuration language names
/// them. Lists and maps are both `array`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    String,
    Integer,
    Double,
    Boolean,
    Array,
    Null,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => ValueKind::String,
            Value::Number(n) if n.is_i64() || n.is_u64() => ValueKind::Integer,
            Value::Number(_) => ValueKind::Double,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Array(_) | Value::Object(_) => ValueKind::Array,
            Value::Null => ValueKind::Null,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Integer => "integer",
            ValueKind::Double => "double",
            ValueKind::Boolean => "boolean",
            ValueKind::Array => "array",
            ValueKind::Null => "NULL",
        }
    }
}

/// Registry a configuration value must name an entry of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    Operator,
    MatchType,
}

impl NameKind {
    pub fn name(&self) -> &'static str {
        match self {
            NameKind::Operator => "operator",
            NameKind::MatchType => "match type",
        }
    }

    fn resolves(&self, registry: &StrategyRegistry, name: &str) -> bool {
        match self {
            NameKind::Operator => registry.has_operator(name),
            NameKind::MatchType => registry.has_match_type(name),
        }
    }
}

/// Requirement on one configuration key.
#[derive(Debug, Clone, Copy)]
pub struct Requirement {
    pub key: &'static str,
    pub required: bool,
    pub kind: Option<ValueKind>,
    pub call: Option<NameKind>,
}

const fn requirement(
    key: &'static str,
    required: bool,
    kind: Option<ValueKind>,
    call: Option<NameKind>,
) -> Requirement {
    Requirement {
        key,
        required,
        kind,
        call,
    }
}

pub const TOP_LEVEL_REQUIREMENTS: &[Requirement] = &[
    requirement("default_field_combination_operator", true, Some(ValueKind::String), Some(NameKind::Operator)),
    requirement("default_value_combination_operator", true, Some(ValueKind::String), Some(NameKind::Operator)),
    requirement("default_match_type", true, Some(ValueKind::String), Some(NameKind::MatchType)),
    requirement("default_match_options", true, Some(ValueKind::Array), None),
    requirement("rules", true, Some(ValueKind::Array), None),
];

pub const RULE_REQUIREMENTS: &[Requirement] = &[
    requirement("source_tables", true, Some(ValueKind::Array), None),
    requirement("triggers", true, Some(ValueKind::Array), None),
    requirement("related_table", true, Some(ValueKind::String), None),
    requirement("related_record", true, None, None),
    requirement("relationship_type", true, Some(ValueKind::String), None),
    requirement("field_combination_operator", false, Some(ValueKind::String), Some(NameKind::Operator)),
    requirement("value_combination_operator", false, Some(ValueKind::String), Some(NameKind::Operator)),
    requirement("match_type", false, Some(ValueKind::String), Some(NameKind::MatchType)),
];

pub const TRIGGER_REQUIREMENTS: &[Requirement] = &[
    requirement("value_combination_operator", false, Some(ValueKind::String), Some(NameKind::Operator)),
    requirement("match_type", false, Some(ValueKind::String), Some(NameKind::MatchType)),
];

// ============================================================================
// RESULTS
// ============================================================================

/// Configuration problems. Reported, never thrown.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Required configuration item `{key}` missing from {section}")]
    MissingItem { key: String, section: String },

    #[error("Configuration item `{key}` in {section} has incorrect type {found}, expected {expected}")]
    IncorrectType {
        key: String,
        section: String,
        found: String,
        expected: String,
    },

    #[error("Configuration item `{key}` in {section} has value \"{value}\", which is an invalid {kind}")]
    InvalidName {
        key: String,
        section: String,
        value: String,
        kind: String,
    },

    #[error("Trigger field {field} on rule {rule} has unusable match options: {reason}")]
    InvalidMatchOptions {
        rule: String,
        field: String,
        reason: MatchOptionsError,
    },

    #[error("Configuration item `triggers` in rule {rule} must map field names to triggers")]
    InvalidTriggers { rule: String },

    #[error("Trigger field {field} on rule {rule} must be a map of trigger settings")]
    InvalidTrigger { rule: String, field: String },

    #[error("Configuration item `related_record` in rule {rule} must be an id, an idno or a filter map")]
    InvalidRelatedRecord { rule: String },

    #[error("Configuration item `source_tables` in rule {rule} must only contain table names")]
    InvalidSourceTables { rule: String },
}

/// Configuration warnings. None are currently produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationWarning {
    pub message: String,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Outcome of validating a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    /// Mirrors the `enabled` flag.
    pub available: bool,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            available: false,
        }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::valid()
    }
}

// ============================================================================
// VALIDATOR
// ============================================================================

/// Checks configuration documents against the requirement tables.
pub struct ConfigValidator<'r> {
    registry: &'r StrategyRegistry,
}

impl<'r> ConfigValidator<'r> {
    pub fn new(registry: &'r StrategyRegistry) -> Self {
        Self { registry }
    }

    pub fn validate(&self, document: &Value) -> ValidationResult {
        let mut result = ValidationResult::valid();

        self.test_section("top level", TOP_LEVEL_REQUIREMENTS, document, &mut result);

        for (label, rule) in rule_entries(document) {
            self.test_section(&format!("rule {}", label), RULE_REQUIREMENTS, rule, &mut result);

            if let Some(Value::Object(triggers)) = lookup(rule, "triggers") {
                for (field, trigger) in triggers {
                    self.test_section(
                        &format!("trigger field {} on rule {}", field, label),
                        TRIGGER_REQUIREMENTS,
                        trigger,
                        &mut result,
                    );
                }
            }
        }

        result.available = read_flag(lookup(document, "enabled"));
        result
    }

    /// Tests one section against its requirements. A section that is not a
    /// map has no keys, so every required key is reported missing.
    fn test_section(
        &self,
        section: &str,
        requirements: &[Requirement],
        values: &Value,
        result: &mut ValidationResult,
    ) {
        for requirement in requirements {
            let value = lookup(values, requirement.key);

            let Some(value) = value else {
                if requirement.required {
                    result.add_error(ValidationError::MissingItem {
                        key: requirement.key.to_string(),
                        section: section.to_string(),
                    });
                }
                continue;
            };

            if let Some(expected) = requirement.kind {
                let found = ValueKind::of(value);
                if found != expected {
                    result.add_error(ValidationError::IncorrectType {
                        key: requirement.key.to_string(),
                        section: section.to_string(),
                        found: found.name().to_string(),
                        expected: expected.name().to_string(),
                    });
                }
            }

            if let (Some(call), Some(name)) = (requirement.call, value.as_str()) {
                if !call.resolves(self.registry, name) {
                    result.add_error(ValidationError::InvalidName {
                        key: requirement.key.to_string(),
                        section: section.to_string(),
                        value: name.to_string(),
                        kind: call.name().to_string(),
                    });
                }
            }
        }
    }
}
