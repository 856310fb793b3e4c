use super::fields::field_allowed;
use crate::workflows::engagement::domain::{Condition, Rule, TrackingMode};

/// Rejects a rule whose condition tree references any statistic field that
/// is illegal for the course's tracking mode. Runs once per (rule, course)
/// pair so an incompatible rule costs nothing per recipient.
pub fn rule_is_compatible(rule: &Rule, mode: TrackingMode) -> bool {
    rule.conditions.iter().all(|condition| match condition {
        Condition::Simple(leaf) => field_allowed(&leaf.field, mode),
        Condition::Compound { sub_conditions, .. } => sub_conditions
            .iter()
            .all(|leaf| field_allowed(&leaf.field, mode)),
    })
}
