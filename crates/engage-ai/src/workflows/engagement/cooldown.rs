use chrono::{DateTime, Duration, Utc};

use super::domain::{CourseId, RecipientId, Rule, TrackingConfig};
use super::repository::{CommunicationHistoryRepository, RepositoryError};

const DEFAULT_RULE_COOLDOWN_HOURS: i64 = 1;
const DEFAULT_RECIPIENT_COOLDOWN_DAYS: i64 = 30;

/// The two cooldown windows gating rule execution. Rule-level throttles a
/// rule across the whole population; recipient-level deduplicates the same
/// tag for one recipient. Both must pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub rule_cooldown_hours: i64,
    pub recipient_cooldown_days: i64,
}

impl CooldownPolicy {
    pub fn new(rule_cooldown_hours: i64, recipient_cooldown_days: i64) -> Self {
        Self {
            rule_cooldown_hours: rule_cooldown_hours.max(0),
            recipient_cooldown_days: recipient_cooldown_days.max(0),
        }
    }

    /// Applies a course's per-tracking-config overrides on top of the
    /// engine defaults.
    pub fn with_overrides(self, config: &TrackingConfig) -> Self {
        Self::new(
            config.rule_cooldown_hours.unwrap_or(self.rule_cooldown_hours),
            config
                .recipient_cooldown_days
                .unwrap_or(self.recipient_cooldown_days),
        )
    }
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RULE_COOLDOWN_HOURS, DEFAULT_RECIPIENT_COOLDOWN_DAYS)
    }
}

/// Whether enough time has passed since the rule last ran anywhere.
pub fn rule_cooldown_elapsed(rule: &Rule, now: DateTime<Utc>, policy: &CooldownPolicy) -> bool {
    match rule.last_executed_at {
        Some(last) => now - last >= Duration::hours(policy.rule_cooldown_hours),
        None => true,
    }
}

/// Whether this exact tag already reached this recipient within the
/// configured window, read from the audit log.
pub fn recipient_recently_tagged<H>(
    history: &H,
    recipient: &RecipientId,
    course: &CourseId,
    tag: &str,
    now: DateTime<Utc>,
    policy: &CooldownPolicy,
) -> Result<bool, RepositoryError>
where
    H: CommunicationHistoryRepository + ?Sized,
{
    let since = now - Duration::days(policy.recipient_cooldown_days);
    history.tag_applied_since(recipient, course, tag, since)
}
