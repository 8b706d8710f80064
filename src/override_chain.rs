// Layered lookup of rule settings.
//
// Every setting a trigger uses is resolved through an explicit chain instead
// of merging configuration maps:
//
//   match_type, value_combination_operator : trigger -> rule -> global default
//   field_combination_operator             : rule -> global default
//   match option `key`                     : trigger -> rule match_options
//                                            -> global default_match_options
//
// Each setting and each option key is resolved on its own, so a trigger can
// override its match type while inheriting its value operator from the rule.

use serde_json::{Map, Value};

use crate::config::{read_flag, GeneratorConfig, RuleConfig, TriggerConfig};

/// First layer that sets a value wins.
fn first_set<'a>(layers: &[Option<&'a String>]) -> Option<&'a str> {
    layers.iter().flatten().next().map(|s| s.as_str())
}

/// Match type for a trigger.
pub fn resolve_match_type<'a>(
    trigger: &'a TriggerConfig,
    rule: &'a RuleConfig,
    config: &'a GeneratorConfig,
) -> Option<&'a str> {
    first_set(&[
        trigger.match_type.as_ref(),
        rule.match_type.as_ref(),
        config.default_match_type.as_ref(),
    ])
}

/// Operator folding the values of one trigger field.
pub fn resolve_value_operator<'a>(
    trigger: &'a TriggerConfig,
    rule: &'a RuleConfig,
    config: &'a GeneratorConfig,
) -> Option<&'a str> {
    first_set(&[
        trigger.value_combination_operator.as_ref(),
        rule.value_combination_operator.as_ref(),
        config.default_value_combination_operator.as_ref(),
    ])
}

/// Operator folding the trigger results of one rule.
pub fn resolve_field_operator<'a>(
    rule: &'a RuleConfig,
    config: &'a GeneratorConfig,
) -> Option<&'a str> {
    first_set(&[
        rule.field_combination_operator.as_ref(),
        config.default_field_combination_operator.as_ref(),
    ])
}

/// Match options visible to a trigger's match type.
pub fn match_options<'a>(
    trigger: &'a TriggerConfig,
    rule: &'a RuleConfig,
    config: &'a GeneratorConfig,
) -> MatchOptions<'a> {
    MatchOptions {
        trigger: &trigger.options,
        rule: rule.match_options.as_ref(),
        global: &config.default_match_options,
    }
}

/// Read-only layered view over trigger, rule and global match options.
///
/// `null` counts as unset at every layer.
#[derive(Debug, Clone, Copy)]
pub struct MatchOptions<'a> {
    trigger: &'a Map<String, Value>,
    rule: Option<&'a Map<String, Value>>,
    global: &'a Map<String, Value>,
}

impl<'a> MatchOptions<'a> {
    /// View with a single layer, used when compiling options directly.
    pub fn single(options: &'a Map<String, Value>) -> Self {
        MatchOptions {
            trigger: options,
            rule: None,
            global: options,
        }
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        let lookup = |layer: &'a Map<String, Value>| layer.get(key).filter(|v| !v.is_null());
        lookup(self.trigger)
            .or_else(|| self.rule.and_then(lookup))
            .or_else(|| lookup(self.global))
    }

    /// Boolean option. Unset reads as false.
    pub fn get_flag(&self, key: &str) -> bool {
        read_flag(self.get(key))
    }
}
