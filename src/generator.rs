// The relationship generator: lifecycle hooks, status and reload.
//
// The active rule set and its notifier are kept together in an `ActiveState`
// behind an `Arc`. Hooks take a snapshot of the `Arc` and release the lock
// before touching the host, so a reload swaps the state without waiting for
// evaluations and an evaluation in flight finishes with the rules it started
// with.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use log::{debug, info};

use crate::config::ConfigError;
use crate::host::{HostContext, HostError, NotificationSink, RecordChange};
use crate::notifier::Notifier;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::registry::StrategyRegistry;
use crate::rule_set::RuleSet;

pub const DESCRIPTION: &str = "Automatically assigns records to related records, such as objects to \
     collections, based upon rules you specify in the generator configuration";

/// Health report for an administration screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub description: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// The `enabled` flag. Independent of errors.
    pub available: bool,
    pub config_digest: String,
    /// Rules that compiled and will run.
    pub rule_count: usize,
}

#[derive(Debug)]
struct ActiveState {
    rule_set: Arc<RuleSet>,
    notifier: Option<Notifier>,
}

impl ActiveState {
    fn new(rule_set: Arc<RuleSet>, sink: Option<&Arc<dyn NotificationSink>>) -> Self {
        let notifier = match sink {
            Some(sink) if rule_set.settings().notify => Some(Notifier::new(Arc::clone(sink))),
            _ => None,
        };
        ActiveState { rule_set, notifier }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Hook {
    Insert,
    Update,
}

/// Entry point the host calls after records are saved.
pub struct RelationshipGenerator {
    state: RwLock<Arc<ActiveState>>,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl RelationshipGenerator {
    pub fn new(rule_set: RuleSet, sink: Option<Arc<dyn NotificationSink>>) -> Self {
        let state = ActiveState::new(Arc::new(rule_set), sink.as_ref());
        RelationshipGenerator {
            state: RwLock::new(Arc::new(state)),
            sink,
        }
    }

    /// Loads the configuration at `path` and builds a generator from it.
    pub fn from_path(
        path: impl AsRef<Path>,
        registry: &StrategyRegistry,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(RuleSet::load(path, registry)?, sink))
    }

    /// The active rule set.
    pub fn rule_set(&self) -> Arc<RuleSet> {
        Arc::clone(&self.state.read().rule_set)
    }

    /// Runs the rules after a record was created. Returns `None` when the
    /// generator is disabled, insert processing is off, or the record is
    /// not one the generator processes.
    pub fn on_after_insert(
        &self,
        change: &RecordChange,
        host: HostContext<'_>,
    ) -> Result<Option<ReconcileReport>, HostError> {
        self.process(Hook::Insert, change, host)
    }

    /// Runs the rules after a record was updated.
    pub fn on_after_update(
        &self,
        change: &RecordChange,
        host: HostContext<'_>,
    ) -> Result<Option<ReconcileReport>, HostError> {
        self.process(Hook::Update, change, host)
    }

    fn process(
        &self,
        hook: Hook,
        change: &RecordChange,
        host: HostContext<'_>,
    ) -> Result<Option<ReconcileReport>, HostError> {
        let state = self.state.read().clone();
        let settings = state.rule_set.settings();

        let hook_enabled = match hook {
            Hook::Insert => settings.process_on_insert,
            Hook::Update => settings.process_on_update,
        };
        if !settings.enabled || !hook_enabled || !change.is_relevant() {
            debug!("Skipping {:?} of {} ({:?})", hook, change.record, change.kind);
            return Ok(None);
        }

        let reconciler = Reconciler::new(&state.rule_set, host, state.notifier.as_ref());
        reconciler.reconcile(&change.record).map(Some)
    }

    pub fn check_status(&self) -> StatusReport {
        let rule_set = self.rule_set();
        let validation = rule_set.validation();
        StatusReport {
            description: DESCRIPTION.to_string(),
            errors: validation.error_messages(),
            warnings: validation.warning_messages(),
            available: rule_set.is_available(),
            config_digest: rule_set.digest().to_string(),
            rule_count: rule_set.rules().len(),
        }
    }

    /// Loads the configuration at `path` and makes it active. On failure the
    /// current rules stay active.
    pub fn reload(&self, path: impl AsRef<Path>, registry: &StrategyRegistry) -> Result<(), ConfigError> {
        let rule_set = RuleSet::load(path, registry)?;
        self.replace_rule_set(rule_set);
        Ok(())
    }

    /// Makes `rule_set` active, rebuilding the notifier from its settings.
    pub fn replace_rule_set(&self, rule_set: RuleSet) {
        let state = ActiveState::new(Arc::new(rule_set), self.sink.as_ref());
        info!(
            "Activating relationship rules {} ({} rule(s))",
            state.rule_set.digest(),
            state.rule_set.rules().len()
        );
        *self.state.write() = Arc::new(state);
    }
}
