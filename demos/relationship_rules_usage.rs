// demos/relationship_rules_usage.rs
//
// Walks through loading relationship rules, running them against records
// held by the in-memory host, and reading the reports the generator returns.
//
// Run with: cargo run --example relationship_rules_usage

use relationship_generator::*;
use std::sync::Arc;

fn main() {
    println!("=== Relationship Generator - Usage Examples ===\n");

    let registry = StrategyRegistry::with_builtins();

    // ========================================================================
    // Example 1: Load and validate the sample configuration
    // ========================================================================
    println!("Example 1: Loading rules");
    println!("------------------------");

    let config_path = concat!(env!("CARGO_MANIFEST_DIR"), "/conf/relationship_generator.json");
    let host = InMemoryHost::new();
    let generator = match RelationshipGenerator::from_path(config_path, &registry, Some(Arc::new(host.clone()))) {
        Ok(generator) => generator,
        Err(e) => {
            println!("Could not load {}: {}", config_path, e);
            return;
        }
    };

    let status = generator.check_status();
    println!("Description: {}", status.description);
    println!("Available: {}", status.available);
    println!("Active rules: {}", status.rule_count);
    println!("Config digest: {}", status.config_digest);
    for error in &status.errors {
        println!("  Error: {}", error);
    }
    println!();

    // ========================================================================
    // Example 2: A matching object is added to its collection
    // ========================================================================
    println!("Example 2: Insert a matching object");
    println!("-----------------------------------");

    let australia = RecordRef::new("ca_collections", 1);
    host.insert_record(australia.clone(), "collection", "Australian specimens");
    host.set_values(&australia, "idno", vec!["AUS".into()]);

    let maps = RecordRef::new("ca_collections", 2);
    host.insert_record(maps.clone(), "collection", "New Zealand maps");
    host.set_values(&maps, "idno", vec!["NZ.MAPS".into()]);

    let object = RecordRef::new("ca_objects", 100);
    host.insert_record(object.clone(), "specimen", "Banksia serrata");
    host.set_values(&object, "country", vec!["Australia".into()]);
    host.set_values(&object, "title", vec!["Banksia serrata".into()]);

    let change = RecordChange::bundlable("ca_objects", 100);
    let context = HostContext::new(&host, &host);
    print_report(generator.on_after_insert(&change, context));
    println!();

    // ========================================================================
    // Example 3: Saving again changes nothing
    // ========================================================================
    println!("Example 3: Update without changes");
    println!("---------------------------------");

    print_report(generator.on_after_update(&change, context));
    println!("Host calls so far: {:?}", host.calls());
    println!();

    // ========================================================================
    // Example 4: The object no longer matches and leaves the collection
    // ========================================================================
    println!("Example 4: Update to a different country");
    println!("----------------------------------------");

    host.set_values(&object, "country", vec!["New Zealand".into()]);
    host.set_values(&object, "title", vec!["Map of the Southern Alps".into()]);
    print_report(generator.on_after_update(&change, context));
    println!();

    // ========================================================================
    // Example 5: Relationship records are never processed
    // ========================================================================
    println!("Example 5: Relationship record saved");
    println!("------------------------------------");

    let relationship = RecordChange::new(RecordRef::new("ca_objects_x_collections", 7), RecordKind::Relationship);
    print_report(generator.on_after_insert(&relationship, context));
    println!();

    // ========================================================================
    // Example 6: Decision table and message templates
    // ========================================================================
    println!("Example 6: Building blocks");
    println!("--------------------------");

    println!("decide(none, matched, add on)      = {:?}", decide(None, true, true, true));
    println!("decide(some, unmatched, remove on) = {:?}", decide(Some(RelationshipId(9)), false, true, true));
    println!("decide(some, unmatched, remove off)= {:?}", decide(Some(RelationshipId(9)), false, true, false));
    println!(
        "Template: {}",
        format_message("Added relationship to %1 \"%2\"", &["collection", "Australian specimens"])
    );
    println!();

    println!("Notifications:");
    for (message, severity) in host.notifications() {
        println!("  [{:?}] {}", severity, message);
    }

    println!("\n=== Done ===");
}

fn print_report(result: Result<Option<ReconcileReport>, HostError>) {
    match result {
        Ok(Some(report)) => {
            println!("Evaluation {} at {}", report.evaluation_id, report.evaluated_at);
            println!("  Added: {}, removed: {}", report.added(), report.removed());
            for outcome in &report.outcomes {
                println!(
                    "  Rule {}: matched={:?} action={:?}",
                    outcome.rule, outcome.matched, outcome.action
                );
            }
        }
        Ok(None) => println!("Not processed"),
        Err(e) => println!("Host error: {}", e),
    }
}
