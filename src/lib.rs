pub mod host;
pub mod operator;
pub mod match_type;
pub mod registry;
pub mod config;
pub mod validation;
pub mod override_chain;
pub mod extractor;
pub mod rule_set;
pub mod evaluator;
pub mod notifier;
pub mod reconciler;
pub mod generator;
pub mod memory_host;

pub use host::{
    FieldValue, HostContext, HostError, NotificationSink, RecordChange, RecordId, RecordKind,
    RecordRef, RecordStore, RelatedItem, RelatedItemsQuery, RelatedRecordSpec, RelationshipApi,
    RelationshipId, ResolvedRecord, Severity, TableName,
};

pub use operator::{
    fold,                   // Seeded fold of boolean results
    AndOperator,            // Built-in "and"
    CombinationOperator,    // Operator strategy trait
    MatchResult,            // Tri-state accumulator
    OrOperator,             // Built-in "or"
};

pub use match_type::{
    CaseInsensitiveMatch, ExactMatch, MatchOptionsError, MatchType, RegexMatch, ValueMatcher,
};

pub use registry::StrategyRegistry;

// Configuration loading and validation
pub use config::{ConfigError, ConfigLoader, GeneratorConfig, LoadedConfig, RuleConfig, TriggerConfig};
pub use validation::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
pub use override_chain::MatchOptions;

pub use extractor::ValueExtractor;

pub use rule_set::{
    CompiledRule,           // Rule ready for evaluation
    CompiledTrigger,        // Trigger with resolved matcher
    GlobalSettings,         // Toggles and notification defaults
    RuleSet,                // Immutable compiled configuration
};

pub use evaluator::{evaluate_rule, evaluate_trigger};

pub use notifier::{format_message, Notifier};

pub use reconciler::{
    decide,                 // Decision table
    Decision,               // Add / remove / keep
    KeepReason,             // Why nothing changed
    ReconcileReport,        // Per-save report
    Reconciler,             // Applies decisions through the host
    RuleAction,             // What happened for a rule
    RuleOutcome,            // Per-rule report entry
};

pub use generator::{RelationshipGenerator, StatusReport};

pub use memory_host::{HostCalls, InMemoryHost};
