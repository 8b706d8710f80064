// Compiled, immutable rule sets.
//
// A `RuleSet` is built once from a loaded configuration. Every operator and
// match type name is resolved against the registry and every trigger's
// options are compiled into a matcher, so evaluating a rule during a save
// never looks anything up by name. Rules that cannot be compiled are left
// out; the reason is already in (or added to) the validation result, and the
// remaining rules still run.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use log::{info, warn};

use crate::config::{ConfigError, ConfigLoader, GeneratorConfig, LoadedConfig, RuleConfig};
use crate::host::{FieldValue, RelatedRecordSpec, TableName};
use crate::match_type::ValueMatcher;
use crate::notifier::{DEFAULT_ADD_NOTIFICATION, DEFAULT_REMOVE_NOTIFICATION};
use crate::operator::CombinationOperator;
use crate::override_chain::{match_options, resolve_field_operator, resolve_match_type, resolve_value_operator};
use crate::registry::StrategyRegistry;
use crate::validation::{ValidationError, ValidationResult};

/// Global toggles and notification defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSettings {
    pub enabled: bool,
    pub process_on_insert: bool,
    pub process_on_update: bool,
    pub add_matched: bool,
    pub remove_unmatched: bool,
    pub notify: bool,
    pub add_notification: String,
    pub remove_notification: String,
}

impl GlobalSettings {
    fn from_config(config: &GeneratorConfig) -> Self {
        GlobalSettings {
            enabled: config.enabled,
            process_on_insert: config.process_on_insert,
            process_on_update: config.process_on_update,
            add_matched: config.add_matched,
            remove_unmatched: config.remove_unmatched,
            notify: config.notify,
            add_notification: config
                .default_add_relationship_notification
                .clone()
                .unwrap_or_else(|| DEFAULT_ADD_NOTIFICATION.to_string()),
            remove_notification: config
                .default_remove_relationship_notification
                .clone()
                .unwrap_or_else(|| DEFAULT_REMOVE_NOTIFICATION.to_string()),
        }
    }
}

/// A trigger with its operator and matcher resolved.
pub struct CompiledTrigger {
    pub field: String,
    /// Resolved match type name.
    pub match_type: String,
    matcher: Box<dyn ValueMatcher>,
    value_operator: Arc<dyn CombinationOperator>,
}

impl CompiledTrigger {
    pub fn new(
        field: impl Into<String>,
        match_type: impl Into<String>,
        matcher: Box<dyn ValueMatcher>,
        value_operator: Arc<dyn CombinationOperator>,
    ) -> Self {
        CompiledTrigger {
            field: field.into(),
            match_type: match_type.into(),
            matcher,
            value_operator,
        }
    }

    /// Whether one field value satisfies this trigger.
    pub fn matches(&self, value: &FieldValue) -> bool {
        self.matcher.matches(value)
    }

    pub fn value_operator(&self) -> &dyn CombinationOperator {
        self.value_operator.as_ref()
    }
}

impl fmt::Debug for CompiledTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTrigger")
            .field("field", &self.field)
            .field("match_type", &self.match_type)
            .field("value_operator", &self.value_operator.name())
            .finish()
    }
}

/// A rule ready for evaluation.
pub struct CompiledRule {
    /// Position or key of the rule in the configuration.
    pub label: String,
    pub source_tables: HashSet<TableName>,
    pub triggers: Vec<CompiledTrigger>,
    pub related_table: TableName,
    pub related_record: RelatedRecordSpec,
    pub relationship_type: String,
    field_operator: Arc<dyn CombinationOperator>,
    add_notification: Option<String>,
    remove_notification: Option<String>,
}

impl CompiledRule {
    pub fn applies_to(&self, table: &TableName) -> bool {
        self.source_tables.contains(table)
    }

    pub fn field_operator(&self) -> &dyn CombinationOperator {
        self.field_operator.as_ref()
    }

    /// Rule template, else the global default.
    pub fn add_notification<'a>(&'a self, settings: &'a GlobalSettings) -> &'a str {
        self.add_notification
            .as_deref()
            .unwrap_or(&settings.add_notification)
    }

    /// Rule template, else the global default.
    pub fn remove_notification<'a>(&'a self, settings: &'a GlobalSettings) -> &'a str {
        self.remove_notification
            .as_deref()
            .unwrap_or(&settings.remove_notification)
    }
}

impl fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRule")
            .field("label", &self.label)
            .field("source_tables", &self.source_tables)
            .field("triggers", &self.triggers)
            .field("related_table", &self.related_table)
            .field("related_record", &self.related_record)
            .field("relationship_type", &self.relationship_type)
            .field("field_operator", &self.field_operator.name())
            .finish()
    }
}

/// The active rules and settings. Read-only once built.
#[derive(Debug)]
pub struct RuleSet {
    settings: GlobalSettings,
    rules: Vec<CompiledRule>,
    validation: ValidationResult,
    digest: String,
}

impl RuleSet {
    /// Loads and compiles the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>, registry: &StrategyRegistry) -> Result<Self, ConfigError> {
        let loaded = ConfigLoader::load(path, registry)?;
        Ok(Self::compile(loaded, registry))
    }

    /// Parses and compiles configuration JSON.
    pub fn from_json(json: &str, registry: &StrategyRegistry) -> Result<Self, ConfigError> {
        let loaded = ConfigLoader::from_json(json, registry)?;
        Ok(Self::compile(loaded, registry))
    }

    /// Compiles every rule that can be compiled.
    pub fn compile(loaded: LoadedConfig, registry: &StrategyRegistry) -> Self {
        let LoadedConfig {
            config,
            mut validation,
            digest,
            ..
        } = loaded;

        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let mut errors = Vec::new();
            match compile_rule(rule, &config, registry, &mut errors) {
                Some(compiled) => rules.push(compiled),
                None => warn!("Rule {} is not active: configuration is incomplete", rule.label),
            }
            for error in errors {
                warn!("{}", error);
                validation.add_error(error);
            }
        }

        info!(
            "Compiled {} of {} relationship rule(s)",
            rules.len(),
            config.rules.len()
        );

        RuleSet {
            settings: GlobalSettings::from_config(&config),
            rules,
            validation,
            digest,
        }
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.settings
    }

    /// Compiled rules in configuration order.
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn validation(&self) -> &ValidationResult {
        &self.validation
    }

    /// Hex SHA-256 of the configuration this set was built from.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn is_available(&self) -> bool {
        self.validation.available
    }
}

/// Compiles one rule. Returns `None` when a mandatory setting is missing, a
/// strategy name is not a string or does not resolve (validation reports
/// those), or when a trigger's options do not compile (reported through
/// `errors`).
fn compile_rule(
    rule: &RuleConfig,
    config: &GeneratorConfig,
    registry: &StrategyRegistry,
    errors: &mut Vec<ValidationError>,
) -> Option<CompiledRule> {
    if !rule.mistyped.is_empty() {
        return None;
    }
    let source_tables = rule.source_tables.as_ref()?;
    let trigger_configs = rule.triggers.as_ref()?;
    let related_table = rule.related_table.clone()?;
    let related_record = rule.related_record.clone()?;
    let relationship_type = rule.relationship_type.clone()?;
    let field_operator = resolve_field_operator(rule, config).and_then(|name| registry.operator(name))?;

    let mut triggers = Vec::with_capacity(trigger_configs.len());
    let mut complete = true;
    for trigger in trigger_configs {
        if !trigger.mistyped.is_empty() {
            complete = false;
            continue;
        }
        let value_operator = resolve_value_operator(trigger, rule, config).and_then(|name| registry.operator(name));
        let match_type_name = resolve_match_type(trigger, rule, config);
        let match_type = match_type_name.and_then(|name| registry.match_type(name));

        let (Some(value_operator), Some(match_type_name), Some(match_type)) =
            (value_operator, match_type_name, match_type)
        else {
            complete = false;
            continue;
        };

        match match_type.compile(&match_options(trigger, rule, config)) {
            Ok(matcher) => triggers.push(CompiledTrigger::new(
                trigger.field.clone(),
                match_type_name,
                matcher,
                value_operator,
            )),
            Err(reason) => {
                complete = false;
                errors.push(ValidationError::InvalidMatchOptions {
                    rule: rule.label.clone(),
                    field: trigger.field.clone(),
                    reason,
                });
            }
        }
    }

    if !complete {
        return None;
    }

    Some(CompiledRule {
        label: rule.label.clone(),
        source_tables: source_tables.iter().cloned().collect(),
        triggers,
        related_table,
        related_record,
        relationship_type,
        field_operator,
        add_notification: rule.add_relationship_notification.clone(),
        remove_notification: rule.remove_relationship_notification.clone(),
    })
}
