// Configuration loading for the relationship generator.
//
// The configuration is a JSON document with the key layout of the plugin's
// configuration file: global toggles, global defaults and an ordered list
// (or keyed map) of rules, each with a map of triggers keyed by field name.
//
// Loading is lenient. Only an unreadable file or a syntax error
// aborts a load; everything else becomes a `ValidationError` in the returned
// `LoadedConfig`, and the engine still runs the rules that compile.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use thiserror::Error;
use log::{debug, warn};

use crate::host::{RelatedRecordSpec, TableName};
use crate::registry::StrategyRegistry;
use crate::validation::{ConfigValidator, ValidationError, ValidationResult};

/// Errors that prevent a configuration from being loaded at all.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Configuration root must be a map, found {0}")]
    NotAnObject(String),
}

/// Reads a boolean toggle the way the configuration language writes them:
/// `true`/`false`, `1`/`0`, or the strings "1", "true", "yes", "on".
/// Anything else, including an absent key, is false.
pub fn read_flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        _ => false,
    }
}

/// Non-null value of `key` in `section`.
pub(crate) fn lookup<'a>(section: &'a Value, key: &str) -> Option<&'a Value> {
    section.get(key).filter(|v| !v.is_null())
}

/// Rule entries with their labels. A list labels rules by position, a map
/// by key.
pub(crate) fn rule_entries(document: &Value) -> Vec<(String, &Value)> {
    match lookup(document, "rules") {
        Some(Value::Array(rules)) => rules
            .iter()
            .enumerate()
            .map(|(index, rule)| (index.to_string(), rule))
            .collect(),
        Some(Value::Object(rules)) => rules.iter().map(|(key, rule)| (key.clone(), rule)).collect(),
        _ => Vec::new(),
    }
}

fn string_of(section: &Value, key: &str) -> Option<String> {
    lookup(section, key).and_then(Value::as_str).map(str::to_string)
}

/// Strategy name settings of `section` that are set to something other than
/// a string. Validation reports these as incorrect types.
fn mistyped_names(section: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .filter(|key| {
            section
                .get(**key)
                .map_or(false, |value| !value.is_null() && !value.is_string())
        })
        .map(|key| key.to_string())
        .collect()
}

/// Table names of a `source_tables` list or map. Any entry that is not a
/// string makes the whole setting unusable.
fn table_names<'a>(
    label: &str,
    entries: impl Iterator<Item = &'a Value>,
    defects: &mut Vec<ValidationError>,
) -> Option<Vec<TableName>> {
    let names: Option<Vec<TableName>> = entries
        .map(|entry| entry.as_str().map(TableName::from))
        .collect();
    if names.is_none() {
        defects.push(ValidationError::InvalidSourceTables {
            rule: label.to_string(),
        });
    }
    names
}

// ============================================================================
// TYPED VIEW
// ============================================================================

/// One trigger: a field-level match condition within a rule.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerConfig {
    /// Field the trigger reads.
    pub field: String,
    pub match_type: Option<String>,
    pub value_combination_operator: Option<String>,
    /// Every key of the trigger, including match-type-specific options.
    pub options: Map<String, Value>,
    /// Name settings written as something other than a string. A trigger
    /// with any is never compiled.
    pub mistyped: Vec<String>,
}

impl TriggerConfig {
    fn from_map(field: &str, map: &Map<String, Value>) -> Self {
        let get = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
        TriggerConfig {
            field: field.to_string(),
            match_type: get("match_type"),
            value_combination_operator: get("value_combination_operator"),
            options: map.clone(),
            mistyped: mistyped_names(map, &["match_type", "value_combination_operator"]),
        }
    }
}

/// One rule as written. Mandatory settings are optional here; a rule
/// missing any of them is reported by validation and never compiled.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleConfig {
    /// Position or key of the rule in `rules`.
    pub label: String,
    pub source_tables: Option<Vec<TableName>>,
    /// Triggers in configuration order.
    pub triggers: Option<Vec<TriggerConfig>>,
    pub related_table: Option<TableName>,
    pub related_record: Option<RelatedRecordSpec>,
    pub relationship_type: Option<String>,
    pub field_combination_operator: Option<String>,
    pub value_combination_operator: Option<String>,
    pub match_type: Option<String>,
    /// Rule-level match option defaults.
    pub match_options: Option<Map<String, Value>>,
    pub add_relationship_notification: Option<String>,
    pub remove_relationship_notification: Option<String>,
    /// Name settings written as something other than a string. A rule with
    /// any is never compiled.
    pub mistyped: Vec<String>,
}

impl RuleConfig {
    /// Reads one rule. Shape problems that validation does not already cover
    /// are appended to `defects`.
    fn from_value(label: &str, rule: &Value, defects: &mut Vec<ValidationError>) -> Self {
        let source_tables = match lookup(rule, "source_tables") {
            Some(Value::Array(tables)) => table_names(label, tables.iter(), defects),
            Some(Value::Object(tables)) => table_names(label, tables.values(), defects),
            _ => None,
        };

        let triggers = match lookup(rule, "triggers") {
            Some(Value::Object(map)) => {
                let mut triggers = Vec::with_capacity(map.len());
                let mut well_formed = true;
                for (field, trigger) in map {
                    match trigger {
                        Value::Object(settings) => {
                            triggers.push(TriggerConfig::from_map(field, settings))
                        }
                        Value::Array(list) if list.is_empty() => {
                            triggers.push(TriggerConfig::from_map(field, &Map::new()))
                        }
                        _ => {
                            well_formed = false;
                            defects.push(ValidationError::InvalidTrigger {
                                rule: label.to_string(),
                                field: field.clone(),
                            });
                        }
                    }
                }
                well_formed.then_some(triggers)
            }
            Some(Value::Array(list)) if list.is_empty() => Some(Vec::new()),
            Some(Value::Array(_)) => {
                defects.push(ValidationError::InvalidTriggers {
                    rule: label.to_string(),
                });
                None
            }
            _ => None,
        };

        let related_record = match lookup(rule, "related_record") {
            Some(value) => {
                let spec = RelatedRecordSpec::from_config(value);
                if spec.is_none() {
                    defects.push(ValidationError::InvalidRelatedRecord {
                        rule: label.to_string(),
                    });
                }
                spec
            }
            None => None,
        };

        RuleConfig {
            label: label.to_string(),
            source_tables,
            triggers,
            related_table: string_of(rule, "related_table").map(TableName::from),
            related_record,
            relationship_type: string_of(rule, "relationship_type"),
            field_combination_operator: string_of(rule, "field_combination_operator"),
            value_combination_operator: string_of(rule, "value_combination_operator"),
            match_type: string_of(rule, "match_type"),
            match_options: lookup(rule, "match_options").and_then(Value::as_object).cloned(),
            add_relationship_notification: string_of(rule, "add_relationship_notification"),
            remove_relationship_notification: string_of(rule, "remove_relationship_notification"),
            mistyped: rule
                .as_object()
                .map(|map| {
                    mistyped_names(
                        map,
                        &["field_combination_operator", "value_combination_operator", "match_type"],
                    )
                })
                .unwrap_or_default(),
        }
    }
}

/// Typed view of the whole configuration document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeneratorConfig {
    pub enabled: bool,
    pub process_on_insert: bool,
    pub process_on_update: bool,
    pub add_matched: bool,
    pub remove_unmatched: bool,
    pub notify: bool,
    pub default_field_combination_operator: Option<String>,
    pub default_value_combination_operator: Option<String>,
    pub default_match_type: Option<String>,
    pub default_match_options: Map<String, Value>,
    pub default_add_relationship_notification: Option<String>,
    pub default_remove_relationship_notification: Option<String>,
    pub rules: Vec<RuleConfig>,
}

impl GeneratorConfig {
    /// Builds the typed view, returning shape defects validation does not
    /// report itself.
    pub fn from_document(document: &Value) -> (Self, Vec<ValidationError>) {
        let mut defects = Vec::new();
        let rules = rule_entries(document)
            .into_iter()
            .map(|(label, rule)| RuleConfig::from_value(&label, rule, &mut defects))
            .collect();
        let flag = |key: &str| read_flag(lookup(document, key));

        let config = GeneratorConfig {
            enabled: flag("enabled"),
            process_on_insert: flag("process_on_insert"),
            process_on_update: flag("process_on_update"),
            add_matched: flag("add_matched"),
            remove_unmatched: flag("remove_unmatched"),
            notify: flag("notify"),
            default_field_combination_operator: string_of(document, "default_field_combination_operator"),
            default_value_combination_operator: string_of(document, "default_value_combination_operator"),
            default_match_type: string_of(document, "default_match_type"),
            default_match_options: lookup(document, "default_match_options")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            default_add_relationship_notification: string_of(document, "default_add_relationship_notification"),
            default_remove_relationship_notification: string_of(document, "default_remove_relationship_notification"),
            rules,
        };
        (config, defects)
    }
}

// ============================================================================
// LOADER
// ============================================================================

/// A parsed configuration with its validation outcome.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The document as written.
    pub document: Value,
    pub config: GeneratorConfig,
    pub validation: ValidationResult,
    /// Hex SHA-256 of the source bytes.
    pub digest: String,
}

/// Reads and validates configuration documents.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the configuration file at `path`.
    pub fn load(
        path: impl AsRef<Path>,
        registry: &StrategyRegistry,
    ) -> Result<LoadedConfig, ConfigError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!("Loading relationship generator configuration from {}", path.display());
        Self::from_slice(&bytes, registry)
    }

    /// Parses configuration from JSON text.
    pub fn from_json(json: &str, registry: &StrategyRegistry) -> Result<LoadedConfig, ConfigError> {
        Self::from_slice(json.as_bytes(), registry)
    }

    /// Parses configuration from JSON bytes.
    pub fn from_slice(bytes: &[u8], registry: &StrategyRegistry) -> Result<LoadedConfig, ConfigError> {
        let document: Value = serde_json::from_slice(bytes)?;
        Self::build(document, digest_of(bytes), registry)
    }

    /// Uses an already parsed document. The digest covers its serialized form.
    pub fn from_value(document: Value, registry: &StrategyRegistry) -> Result<LoadedConfig, ConfigError> {
        let bytes = serde_json::to_vec(&document)?;
        Self::build(document, digest_of(&bytes), registry)
    }

    fn build(
        document: Value,
        digest: String,
        registry: &StrategyRegistry,
    ) -> Result<LoadedConfig, ConfigError> {
        if !document.is_object() {
            return Err(ConfigError::NotAnObject(
                crate::validation::ValueKind::of(&document).name().to_string(),
            ));
        }

        let mut validation = ConfigValidator::new(registry).validate(&document);
        let (config, defects) = GeneratorConfig::from_document(&document);
        for defect in defects {
            validation.add_error(defect);
        }

        if !validation.errors.is_empty() {
            warn!(
                "Relationship generator configuration has {} error(s)",
                validation.errors.len()
            );
            for error in &validation.errors {
                warn!("{}", error);
            }
        }

        Ok(LoadedConfig {
            document,
            config,
            validation,
            digest,
        })
    }
}

fn digest_of(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
