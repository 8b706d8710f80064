// Rule evaluation: the two combination layers.
//
//   trigger result = fold(value operator, matches(v) for v in field values)
//   rule result    = fold(field operator, trigger results in trigger order)
//
// Every trigger is evaluated even when the outcome is already decided, so
// host reads happen in a fixed order for a given rule.

use log::debug;

use crate::extractor::ValueExtractor;
use crate::host::{HostError, RecordRef};
use crate::operator::fold;
use crate::rule_set::{CompiledRule, CompiledTrigger};

/// Folds the trigger's matcher over every value of its field on `record`.
pub fn evaluate_trigger(
    trigger: &CompiledTrigger,
    record: &RecordRef,
    extractor: &ValueExtractor<'_>,
) -> Result<bool, HostError> {
    let values = extractor.values(record, &trigger.field)?;
    let matched = fold(
        trigger.value_operator(),
        values.iter().map(|value| trigger.matches(value)),
    );
    debug!(
        "Trigger {} ({}) on {}: {} value(s), matched={}",
        trigger.field,
        trigger.match_type,
        record,
        values.len(),
        matched
    );
    Ok(matched)
}

/// Whether `record` satisfies `rule`. Records outside the rule's source
/// tables never match.
pub fn evaluate_rule(
    rule: &CompiledRule,
    record: &RecordRef,
    extractor: &ValueExtractor<'_>,
) -> Result<bool, HostError> {
    if !rule.applies_to(&record.table) {
        return Ok(false);
    }

    let mut results = Vec::with_capacity(rule.triggers.len());
    for trigger in &rule.triggers {
        results.push(evaluate_trigger(trigger, record, extractor)?);
    }
    Ok(fold(rule.field_operator(), results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_host::InMemoryHost;
    use crate::registry::StrategyRegistry;
    use crate::rule_set::RuleSet;
    use serde_json::{json, Value};

    fn rule_set(field_operator: &str, value_operator: &str, triggers: Value) -> RuleSet {
        let document = json!({
            "enabled": true,
            "default_field_combination_operator": field_operator,
            "default_value_combination_operator": value_operator,
            "default_match_type": "exact",
            "default_match_options": {},
            "rules": [{
                "source_tables": ["ca_objects"],
                "triggers": triggers,
                "related_table": "ca_collections",
                "related_record": 1,
                "relationship_type": "part_of"
            }]
        });
        RuleSet::from_json(&document.to_string(), &StrategyRegistry::with_builtins()).unwrap()
    }

    fn host_with(values: &[(&str, Vec<&str>)]) -> (InMemoryHost, RecordRef) {
        let host = InMemoryHost::new();
        let object = RecordRef::new("ca_objects", 10);
        host.insert_record(object.clone(), "object", "Specimen");
        for (field, field_values) in values {
            host.set_values(&object, field, field_values.iter().map(|v| (*v).into()).collect());
        }
        (host, object)
    }

    #[test]
    fn test_zero_triggers() {
        let (host, object) = host_with(&[]);
        let extractor = ValueExtractor::new(&host);

        let and_rules = rule_set("and", "and", json!({}));
        assert!(evaluate_rule(&and_rules.rules()[0], &object, &extractor).unwrap());

        let or_rules = rule_set("or", "and", json!({}));
        assert!(!evaluate_rule(&or_rules.rules()[0], &object, &extractor).unwrap());
    }

    #[test]
    fn test_and_values_require_every_value() {
        let rules = rule_set("and", "and", json!({"country": {"value": "Australia"}}));
        let rule = &rules.rules()[0];

        let (host, object) = host_with(&[("country", vec!["Australia", "Australia"])]);
        assert!(evaluate_rule(rule, &object, &ValueExtractor::new(&host)).unwrap());

        let (host, object) = host_with(&[("country", vec!["Australia", "Fiji"])]);
        assert!(!evaluate_rule(rule, &object, &ValueExtractor::new(&host)).unwrap());
    }

    #[test]
    fn test_empty_field_does_not_veto_and() {
        let rules = rule_set("and", "and", json!({"country": {"value": "Australia"}}));
        let (host, object) = host_with(&[]);
        assert!(evaluate_rule(&rules.rules()[0], &object, &ValueExtractor::new(&host)).unwrap());
    }

    #[test]
    fn test_or_values_need_one_value() {
        let rules = rule_set("and", "or", json!({"country": {"value": "Australia"}}));
        let rule = &rules.rules()[0];

        let (host, object) = host_with(&[("country", vec!["Fiji", "Australia"])]);
        assert!(evaluate_rule(rule, &object, &ValueExtractor::new(&host)).unwrap());

        let (host, object) = host_with(&[]);
        assert!(!evaluate_rule(rule, &object, &ValueExtractor::new(&host)).unwrap());
    }

    #[test]
    fn test_field_combination() {
        let triggers = json!({
            "country": {"value": "Australia"},
            "state": {"value": "Tasmania"}
        });
        let (host, object) = host_with(&[("country", vec!["Australia"]), ("state", vec!["Victoria"])]);
        let extractor = ValueExtractor::new(&host);

        let all = rule_set("and", "or", triggers.clone());
        assert!(!evaluate_rule(&all.rules()[0], &object, &extractor).unwrap());

        let any = rule_set("or", "or", triggers);
        assert!(evaluate_rule(&any.rules()[0], &object, &extractor).unwrap());
    }

    #[test]
    fn test_other_tables_never_match() {
        let rules = rule_set("and", "and", json!({}));
        let host = InMemoryHost::new();
        let entity = RecordRef::new("ca_entities", 3);
        host.insert_record(entity.clone(), "person", "Someone");
        assert!(!evaluate_rule(&rules.rules()[0], &entity, &ValueExtractor::new(&host)).unwrap());
    }

    #[test]
    fn test_trigger_evaluation_reports_value_fold() {
        let rules = rule_set("and", "and", json!({"country": {"value": "Australia"}}));
        let trigger = &rules.rules()[0].triggers[0];
        let (host, object) = host_with(&[("country", vec!["Australia"])]);
        assert!(evaluate_trigger(trigger, &object, &ValueExtractor::new(&host)).unwrap());
    }
}
