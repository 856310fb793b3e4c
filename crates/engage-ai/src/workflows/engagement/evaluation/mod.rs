mod compatibility;
mod fields;

pub use compatibility::rule_is_compatible;
pub use fields::{allowed_fields, field_allowed, resolve, ACTION_BASED_FIELDS, LOGIN_BASED_FIELDS};

use tracing::warn;

use crate::workflows::engagement::domain::{
    Condition, ConditionLogic, SimpleCondition, StatisticBag, TrackingMode,
};

/// Evaluates a rule's top-level condition list against a statistic bag.
///
/// The list is always a conjunction; disjunction is expressed through a
/// compound entry. A rule with no conditions never matches.
pub fn evaluate_conditions(
    conditions: &[Condition],
    mode: TrackingMode,
    bag: &StatisticBag,
) -> bool {
    if conditions.is_empty() {
        return false;
    }

    conditions
        .iter()
        .all(|condition| evaluate_condition(condition, mode, bag))
}

pub fn evaluate_condition(condition: &Condition, mode: TrackingMode, bag: &StatisticBag) -> bool {
    match condition {
        Condition::Simple(leaf) => evaluate_leaf(leaf, mode, bag),
        Condition::Compound {
            logic,
            sub_conditions,
        } => match logic {
            ConditionLogic::All => sub_conditions
                .iter()
                .all(|leaf| evaluate_leaf(leaf, mode, bag)),
            ConditionLogic::Any => sub_conditions
                .iter()
                .any(|leaf| evaluate_leaf(leaf, mode, bag)),
        },
    }
}

/// Rule authors may reference stale field names; an unresolvable field
/// fails the condition closed instead of raising.
fn evaluate_leaf(leaf: &SimpleCondition, mode: TrackingMode, bag: &StatisticBag) -> bool {
    match resolve(&leaf.field, mode, bag) {
        Some(actual) => leaf.operator.matches(actual, leaf.unit.scaled(leaf.value)),
        None => {
            warn!(
                field = %leaf.field,
                mode = mode.label(),
                "condition references a field unavailable for this tracking mode; treating as non-match"
            );
            false
        }
    }
}
