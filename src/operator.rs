// Combination operators folding per-value and per-field match results.
//
// Both layers of combination (values of one trigger field, and trigger
// fields of one rule) use the same operator implementations. Each fold is a
// left fold seeded with the operator's identity, which is what the operator
// returns when both operands are still unknown:
//
//   and(unknown, _) = true      or(unknown, _) = false
//
// so an `and` over nothing is true and an `or` over nothing is false.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the built-in conjunction operator.
pub const AND_OPERATOR: &str = "and";

/// Name of the built-in disjunction operator.
pub const OR_OPERATOR: &str = "or";

/// Tri-state accumulator for match folds.
///
/// `Unknown` only exists as an operand before anything has been folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    Unknown,
    True,
    False,
}

impl MatchResult {
    pub fn is_unknown(&self) -> bool {
        matches!(self, MatchResult::Unknown)
    }

    /// Collapses to a boolean. Unknown reads as false.
    pub fn is_true(&self) -> bool {
        matches!(self, MatchResult::True)
    }
}

impl From<bool> for MatchResult {
    fn from(b: bool) -> Self {
        if b {
            MatchResult::True
        } else {
            MatchResult::False
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchResult::Unknown => write!(f, "unknown"),
            MatchResult::True => write!(f, "true"),
            MatchResult::False => write!(f, "false"),
        }
    }
}

/// A named logical operator usable in either combination layer.
pub trait CombinationOperator: Send + Sync + fmt::Debug {
    /// Name the configuration refers to this operator by.
    fn name(&self) -> &str;

    /// Combines two operands.
    fn combine(&self, a: MatchResult, b: MatchResult) -> MatchResult;

    /// Seed of a fold: the result of combining two unknown operands.
    fn identity(&self) -> MatchResult {
        self.combine(MatchResult::Unknown, MatchResult::Unknown)
    }
}

/// `and`: unknown on either side absorbs to true.
#[derive(Debug, Clone, Copy, Default)]
pub struct AndOperator;

impl CombinationOperator for AndOperator {
    fn name(&self) -> &str {
        AND_OPERATOR
    }

    fn combine(&self, a: MatchResult, b: MatchResult) -> MatchResult {
        if a.is_unknown() || b.is_unknown() {
            return MatchResult::True;
        }
        MatchResult::from(a.is_true() && b.is_true())
    }
}

/// `or`: unknown on either side absorbs to false.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrOperator;

impl CombinationOperator for OrOperator {
    fn name(&self) -> &str {
        OR_OPERATOR
    }

    fn combine(&self, a: MatchResult, b: MatchResult) -> MatchResult {
        if a.is_unknown() || b.is_unknown() {
            return MatchResult::False;
        }
        MatchResult::from(a.is_true() || b.is_true())
    }
}

/// Left-folds `results` in iteration order, starting from the operator's
/// identity.
pub fn fold<I>(operator: &dyn CombinationOperator, results: I) -> bool
where
    I: IntoIterator<Item = bool>,
{
    results
        .into_iter()
        .fold(operator.identity(), |acc, result| {
            operator.combine(acc, MatchResult::from(result))
        })
        .is_true()
}
