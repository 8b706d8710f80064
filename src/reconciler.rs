// Relationship reconciliation for a saved record.
//
// For each rule, in configuration order:
//   1. resolve the related record; if it does not exist the rule is skipped
//      entirely (no lookup, no evaluation, no change, no notification)
//   2. look up an existing relationship of the rule's type to it
//   3. evaluate the rule against the saved record
//   4. apply the decision table
//
//   existing | matches | add_matched | remove_unmatched | decision
//   ---------+---------+-------------+------------------+-----------------
//   none     | true    | on          |                  | add
//   none     | true    | off         |                  | keep
//   none     | false   |             |                  | keep
//   some     | false   |             | on               | remove
//   some     | false   |             | off              | keep
//   some     | true    |             |                  | keep
//
// Only the first relationship the host returns is compared. When the host
// holds several relationships of the same type to the same record, one is
// removed per save and the others stay until later saves.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use log::{debug, info};

use crate::evaluator::evaluate_rule;
use crate::extractor::ValueExtractor;
use crate::host::{HostContext, HostError, RecordRef, RelatedItemsQuery, RelationshipId};
use crate::notifier::Notifier;
use crate::rule_set::{CompiledRule, RuleSet};

/// Why a rule left relationships as they were.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepReason {
    /// Matched and already related.
    AlreadyRelated,
    /// Not matched and not related.
    NotMatched,
    /// Matched but `add_matched` is off.
    AddDisabled,
    /// Not matched but `remove_unmatched` is off.
    RemoveDisabled,
}

/// What to do with one rule's relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Add,
    Remove(RelationshipId),
    Keep(KeepReason),
}

/// The decision table.
pub fn decide(
    existing: Option<RelationshipId>,
    matched: bool,
    add_matched: bool,
    remove_unmatched: bool,
) -> Decision {
    match (existing, matched) {
        (None, true) if add_matched => Decision::Add,
        (None, true) => Decision::Keep(KeepReason::AddDisabled),
        (None, false) => Decision::Keep(KeepReason::NotMatched),
        (Some(id), false) if remove_unmatched => Decision::Remove(id),
        (Some(_), false) => Decision::Keep(KeepReason::RemoveDisabled),
        (Some(_), true) => Decision::Keep(KeepReason::AlreadyRelated),
    }
}

// ============================================================================
// REPORTS
// ============================================================================

/// What happened for one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RuleAction {
    Added { relationship_id: RelationshipId },
    Removed { relationship_id: RelationshipId },
    Unchanged { reason: KeepReason },
    /// The related record does not exist.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleOutcome {
    /// Rule label from the configuration.
    pub rule: String,
    /// The resolved related record, when there is one.
    pub related: Option<RecordRef>,
    /// Rule match, when the rule was evaluated.
    pub matched: Option<bool>,
    pub action: RuleAction,
}

/// Result of reconciling one saved record against a rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub evaluation_id: Uuid,
    pub evaluated_at: DateTime<Utc>,
    pub record: RecordRef,
    pub outcomes: Vec<RuleOutcome>,
}

impl ReconcileReport {
    pub fn added(&self) -> usize {
        self.count(|a| matches!(a, RuleAction::Added { .. }))
    }

    pub fn removed(&self) -> usize {
        self.count(|a| matches!(a, RuleAction::Removed { .. }))
    }

    /// True when no relationship was added or removed.
    pub fn is_noop(&self) -> bool {
        self.added() == 0 && self.removed() == 0
    }

    fn count(&self, pred: impl Fn(&RuleAction) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.action)).count()
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

/// Reconciles one record against a rule set through the host.
pub struct Reconciler<'a> {
    rule_set: &'a RuleSet,
    host: HostContext<'a>,
    notifier: Option<&'a Notifier>,
}

impl<'a> Reconciler<'a> {
    pub fn new(rule_set: &'a RuleSet, host: HostContext<'a>, notifier: Option<&'a Notifier>) -> Self {
        Reconciler {
            rule_set,
            host,
            notifier,
        }
    }

    /// Runs every rule for `source`. Host failures abort and propagate.
    pub fn reconcile(&self, source: &RecordRef) -> Result<ReconcileReport, HostError> {
        let mut report = ReconcileReport {
            evaluation_id: Uuid::new_v4(),
            evaluated_at: Utc::now(),
            record: source.clone(),
            outcomes: Vec::with_capacity(self.rule_set.rules().len()),
        };

        for rule in self.rule_set.rules() {
            report.outcomes.push(self.reconcile_rule(rule, source)?);
        }

        debug!(
            "Reconciled {} against {} rule(s): {} added, {} removed",
            source,
            report.outcomes.len(),
            report.added(),
            report.removed()
        );
        Ok(report)
    }

    fn reconcile_rule(&self, rule: &CompiledRule, source: &RecordRef) -> Result<RuleOutcome, HostError> {
        let Some(related) = self.host.store.resolve(&rule.related_table, &rule.related_record)? else {
            debug!(
                "Rule {}: related record {} in {} not found, skipping",
                rule.label,
                rule.related_record,
                rule.related_table
            );
            return Ok(RuleOutcome {
                rule: rule.label.clone(),
                related: None,
                matched: None,
                action: RuleAction::Skipped,
            });
        };

        let query = RelatedItemsQuery {
            relationship_types: vec![rule.relationship_type.clone()],
            filter: rule.related_record.to_filter(),
        };
        let existing = self
            .host
            .relationships
            .related_items(source, &rule.related_table, &query)?
            .into_iter()
            .map(|item| item.relationship_id)
            .next();

        let matched = evaluate_rule(rule, source, &ValueExtractor::new(self.host.store))?;
        let settings = self.rule_set.settings();

        let action = match decide(existing, matched, settings.add_matched, settings.remove_unmatched) {
            Decision::Add => {
                let relationship_id = self.host.relationships.add_relationship(
                    source,
                    &related.record,
                    &rule.relationship_type,
                )?;
                info!(
                    "Rule {}: added {} relationship {} from {} to {}",
                    rule.label,
                    rule.relationship_type,
                    relationship_id,
                    source,
                    related.record
                );
                if let Some(notifier) = self.notifier {
                    notifier.relationship_added(rule.add_notification(settings), &related);
                }
                RuleAction::Added { relationship_id }
            }
            Decision::Remove(relationship_id) => {
                self.host
                    .relationships
                    .remove_relationship(source, &rule.related_table, relationship_id)?;
                info!(
                    "Rule {}: removed {} relationship {} from {} to {}",
                    rule.label,
                    rule.relationship_type,
                    relationship_id,
                    source,
                    related.record
                );
                if let Some(notifier) = self.notifier {
                    notifier.relationship_removed(rule.remove_notification(settings), &related);
                }
                RuleAction::Removed { relationship_id }
            }
            Decision::Keep(reason) => {
                debug!("Rule {}: no change for {} ({:?})", rule.label, source, reason);
                RuleAction::Unchanged { reason }
            }
        };

        Ok(RuleOutcome {
            rule: rule.label.clone(),
            related: Some(related.record),
            matched: Some(matched),
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{FieldValue, Severity};
    use crate::memory_host::InMemoryHost;
    use crate::registry::StrategyRegistry;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn document() -> Value {
        json!({
            "enabled": true,
            "process_on_insert": true,
            "process_on_update": true,
            "add_matched": true,
            "remove_unmatched": true,
            "notify": true,
            "default_field_combination_operator": "and",
            "default_value_combination_operator": "or",
            "default_match_type": "exact",
            "default_match_options": {},
            "rules": [{
                "source_tables": ["ca_objects"],
                "triggers": {"country": {"match_type": "exact", "value": "Australia"}},
                "field_combination_operator": "and",
                "related_table": "ca_collections",
                "related_record": "AUS",
                "relationship_type": "part_of"
            }]
        })
    }

    fn rule_set(document: Value) -> RuleSet {
        RuleSet::from_json(&document.to_string(), &StrategyRegistry::with_builtins()).unwrap()
    }

    struct Fixture {
        host: InMemoryHost,
        object: RecordRef,
        collection: RecordRef,
    }

    fn fixture(country: &str) -> Fixture {
        let host = InMemoryHost::new();
        let object = RecordRef::new("ca_objects", 100);
        let collection = RecordRef::new("ca_collections", 7);
        host.insert_record(object.clone(), "specimen", "Specimen 100");
        host.insert_record(collection.clone(), "collection", "Australian specimens");
        host.set_values(&collection, "idno", vec!["AUS".into()]);
        host.set_values(&object, "country", vec![FieldValue::from(country)]);
        Fixture {
            host,
            object,
            collection,
        }
    }

    fn reconcile(rule_set: &RuleSet, f: &Fixture, notifier: Option<&Notifier>) -> ReconcileReport {
        Reconciler::new(rule_set, HostContext::new(&f.host, &f.host), notifier)
            .reconcile(&f.object)
            .unwrap()
    }

    #[test]
    fn test_decision_table() {
        let id = RelationshipId(1);
        assert_eq!(decide(None, true, true, true), Decision::Add);
        assert_eq!(decide(None, true, false, true), Decision::Keep(KeepReason::AddDisabled));
        assert_eq!(decide(None, false, true, true), Decision::Keep(KeepReason::NotMatched));
        assert_eq!(decide(None, false, false, false), Decision::Keep(KeepReason::NotMatched));
        assert_eq!(decide(Some(id), false, true, true), Decision::Remove(id));
        assert_eq!(decide(Some(id), false, true, false), Decision::Keep(KeepReason::RemoveDisabled));
        assert_eq!(decide(Some(id), true, true, true), Decision::Keep(KeepReason::AlreadyRelated));
        assert_eq!(decide(Some(id), true, false, false), Decision::Keep(KeepReason::AlreadyRelated));
    }

    #[test]
    fn test_match_adds_one_relationship() {
        let rules = rule_set(document());
        let f = fixture("Australia");

        let report = reconcile(&rules, &f, None);
        assert_eq!(report.added(), 1);
        assert_eq!(f.host.calls().adds, 1);
        assert_eq!(f.host.calls().removes, 0);
        assert_eq!(
            f.host.relationships_between(&f.object, &f.collection, "part_of").len(),
            1
        );
        assert_eq!(report.outcomes[0].matched, Some(true));
        assert_eq!(report.outcomes[0].related, Some(f.collection.clone()));
    }

    #[test]
    fn test_second_run_is_noop() {
        let rules = rule_set(document());
        let f = fixture("Australia");

        reconcile(&rules, &f, None);
        let second = reconcile(&rules, &f, None);
        assert!(second.is_noop());
        assert_eq!(
            second.outcomes[0].action,
            RuleAction::Unchanged {
                reason: KeepReason::AlreadyRelated
            }
        );
        assert_eq!(f.host.calls().adds, 1);
    }

    #[test]
    fn test_unmatched_removes_existing_relationship() {
        let rules = rule_set(document());
        let f = fixture("NewZealand");
        let existing = f.host.relate(&f.object, &f.collection, "part_of");

        let report = reconcile(&rules, &f, None);
        assert_eq!(
            report.outcomes[0].action,
            RuleAction::Removed {
                relationship_id: existing
            }
        );
        assert_eq!(f.host.calls().removes, 1);
        assert!(f
            .host
            .relationships_between(&f.object, &f.collection, "part_of")
            .is_empty());

        assert!(reconcile(&rules, &f, None).is_noop());
    }

    #[test]
    fn test_duplicate_relationships_removed_one_per_save() {
        let rules = rule_set(document());
        let f = fixture("NewZealand");
        let first = f.host.relate(&f.object, &f.collection, "part_of");
        let second = f.host.relate(&f.object, &f.collection, "part_of");

        let report = reconcile(&rules, &f, None);
        assert_eq!(
            report.outcomes[0].action,
            RuleAction::Removed {
                relationship_id: first
            }
        );
        assert_eq!(
            f.host.relationships_between(&f.object, &f.collection, "part_of"),
            vec![second]
        );

        let report = reconcile(&rules, &f, None);
        assert_eq!(
            report.outcomes[0].action,
            RuleAction::Removed {
                relationship_id: second
            }
        );
        assert!(f
            .host
            .relationships_between(&f.object, &f.collection, "part_of")
            .is_empty());
        assert_eq!(f.host.calls().removes, 2);
        assert!(reconcile(&rules, &f, None).is_noop());
    }

    #[test]
    fn test_other_relationship_types_are_ignored() {
        let rules = rule_set(document());
        let f = fixture("NewZealand");
        f.host.relate(&f.object, &f.collection, "donated_by");

        let report = reconcile(&rules, &f, None);
        assert!(report.is_noop());
        assert_eq!(f.host.relationships_between(&f.object, &f.collection, "donated_by").len(), 1);
    }

    #[test]
    fn test_unresolved_natural_key_is_inert() {
        let mut doc = document();
        doc["rules"][0]["related_record"] = json!("MISSING");
        let rules = rule_set(doc);
        let f = fixture("Australia");

        let report = reconcile(&rules, &f, None);
        assert_eq!(report.outcomes[0].action, RuleAction::Skipped);
        assert_eq!(report.outcomes[0].matched, None);
        assert_eq!(f.host.calls().adds, 0);
        assert_eq!(f.host.calls().removes, 0);
        assert_eq!(f.host.calls().related_item_lookups, 0);
    }

    #[test]
    fn test_toggles_disable_changes() {
        let mut doc = document();
        doc["add_matched"] = json!(false);
        doc["remove_unmatched"] = json!(false);
        let rules = rule_set(doc);

        let f = fixture("Australia");
        let report = reconcile(&rules, &f, None);
        assert_eq!(
            report.outcomes[0].action,
            RuleAction::Unchanged {
                reason: KeepReason::AddDisabled
            }
        );

        let f = fixture("NewZealand");
        f.host.relate(&f.object, &f.collection, "part_of");
        let report = reconcile(&rules, &f, None);
        assert_eq!(
            report.outcomes[0].action,
            RuleAction::Unchanged {
                reason: KeepReason::RemoveDisabled
            }
        );
        assert_eq!(f.host.calls().removes, 0);
    }

    #[test]
    fn test_record_outside_source_tables_loses_relationship() {
        let rules = rule_set(document());
        let f = fixture("Australia");
        let entity = RecordRef::new("ca_entities", 5);
        f.host.insert_record(entity.clone(), "person", "Collector");
        f.host.set_values(&entity, "country", vec!["Australia".into()]);
        f.host.relate(&entity, &f.collection, "part_of");

        let report = Reconciler::new(&rules, HostContext::new(&f.host, &f.host), None)
            .reconcile(&entity)
            .unwrap();
        assert_eq!(report.outcomes[0].matched, Some(false));
        assert_eq!(report.removed(), 1);
    }

    #[test]
    fn test_notifications_sent_on_change() {
        let mut doc = document();
        doc["rules"][0]["add_relationship_notification"] = json!("Added to %1 %2");
        let rules = rule_set(doc);
        let f = fixture("Australia");
        let notifier = Notifier::new(Arc::new(f.host.clone()));

        reconcile(&rules, &f, Some(&notifier));
        f.host.set_values(&f.object, "country", vec!["Fiji".into()]);
        reconcile(&rules, &f, Some(&notifier));

        assert_eq!(
            f.host.notifications(),
            vec![
                ("Added to collection Australian specimens".to_string(), Severity::Info),
                (
                    "Removed relationship to collection \"Australian specimens\"".to_string(),
                    Severity::Info
                ),
            ]
        );
    }

    #[test]
    fn test_no_notifications_without_changes() {
        let rules = rule_set(document());
        let f = fixture("Fiji");
        let notifier = Notifier::new(Arc::new(f.host.clone()));
        reconcile(&rules, &f, Some(&notifier));
        assert!(f.host.notifications().is_empty());
    }

    #[test]
    fn test_host_write_failure_propagates() {
        let rules = rule_set(document());
        let f = fixture("Australia");
        f.host.fail_relationship_writes(true);

        let err = Reconciler::new(&rules, HostContext::new(&f.host, &f.host), None)
            .reconcile(&f.object)
            .unwrap_err();
        assert!(matches!(err, HostError::Relationship(_)));
    }

    #[test]
    fn test_filter_map_related_record() {
        let mut doc = document();
        doc["rules"][0]["related_record"] = json!({"idno": "AUS"});
        let rules = rule_set(doc);
        let f = fixture("Australia");
        assert_eq!(reconcile(&rules, &f, None).added(), 1);
        assert!(reconcile(&rules, &f, None).is_noop());
    }

    #[test]
    fn test_numeric_related_record() {
        let mut doc = document();
        doc["rules"][0]["related_record"] = json!(7);
        let rules = rule_set(doc);
        let f = fixture("Australia");
        assert_eq!(reconcile(&rules, &f, None).added(), 1);
        assert!(reconcile(&rules, &f, None).is_noop());
    }

    #[test]
    fn test_report_serializes() {
        let rules = rule_set(document());
        let f = fixture("Australia");
        let report = reconcile(&rules, &f, None);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["outcomes"][0]["action"]["action"], json!("added"));
        assert_eq!(value["record"]["table"], json!("ca_objects"));
    }
}
