// Name -> implementation lookup for combination operators and match types.
//
// Configuration refers to strategies by name. Names are resolved here when a
// configuration is validated and compiled, so an unknown name is reported as
// a configuration error instead of failing during a save.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::match_type::{CaseInsensitiveMatch, ExactMatch, MatchType, RegexMatch};
use crate::operator::{AndOperator, CombinationOperator, OrOperator};

/// Registry of the strategies a rule set may name.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    operators: HashMap<String, Arc<dyn CombinationOperator>>,
    match_types: HashMap<String, Arc<dyn MatchType>>,
}

impl StrategyRegistry {
    /// Creates an empty registry. Most callers want `with_builtins`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `and`, `or`, `exact`, `caseInsensitive` and `regex`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_operator(Arc::new(AndOperator));
        registry.register_operator(Arc::new(OrOperator));
        registry.register_match_type(Arc::new(ExactMatch));
        registry.register_match_type(Arc::new(CaseInsensitiveMatch));
        registry.register_match_type(Arc::new(RegexMatch));
        registry
    }

    /// Registers an operator under its own name, replacing any previous one.
    pub fn register_operator(&mut self, operator: Arc<dyn CombinationOperator>) {
        self.operators.insert(operator.name().to_string(), operator);
    }

    /// Registers a match type under its own name, replacing any previous one.
    pub fn register_match_type(&mut self, match_type: Arc<dyn MatchType>) {
        self.match_types.insert(match_type.name().to_string(), match_type);
    }

    pub fn operator(&self, name: &str) -> Option<Arc<dyn CombinationOperator>> {
        self.operators.get(name).cloned()
    }

    pub fn match_type(&self, name: &str) -> Option<Arc<dyn MatchType>> {
        self.match_types.get(name).cloned()
    }

    pub fn has_operator(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    pub fn has_match_type(&self, name: &str) -> bool {
        self.match_types.contains_key(name)
    }

    /// Registered operator names, sorted.
    pub fn operator_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered match type names, sorted.
    pub fn match_type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.match_types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("operators", &self.operator_names())
            .field("match_types", &self.match_type_names())
            .finish()
    }
}
