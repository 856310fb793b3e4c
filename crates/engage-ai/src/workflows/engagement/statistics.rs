use chrono::{DateTime, Duration, Utc};

use super::domain::{Course, Recipient, StatisticBag, TrackingMode};
use super::repository::{EngagementEventRepository, RepositoryError};

/// Days-since value reported for action-tracked recipients with no recorded
/// action, so inactivity rules naturally match new-but-silent learners.
pub const NO_ACTION_SENTINEL_DAYS: i64 = 999;

/// Error raised while resolving a recipient's statistics; aborts that
/// recipient's evaluation only.
#[derive(Debug, thiserror::Error)]
pub enum StatisticsError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Normalizes a recipient's raw engagement signals into the statistic bag
/// appropriate for the course's tracking mode. Read-only.
pub fn compute_statistics<E>(
    recipient: &Recipient,
    course: &Course,
    events: &E,
    now: DateTime<Utc>,
) -> Result<StatisticBag, StatisticsError>
where
    E: EngagementEventRepository + ?Sized,
{
    let mut bag = StatisticBag::default();

    if let Some(progress) = recipient.progress.get(&course.id) {
        bag.current_progress_percent = Some(progress.percent_complete);
        bag.current_module_index = Some(progress.module_index);
    }

    match course.tracking_mode {
        TrackingMode::LoginBased => {
            // A recipient who never logged in counts from account creation.
            let anchor = events
                .last_login_at(&recipient.id, &course.id)?
                .unwrap_or(recipient.registered_at);
            bag.days_since_last_login = Some(days_between(anchor, now));
        }
        TrackingMode::ActionBased => {
            bag.days_since_last_action = match events.last_action_at(&recipient.id, &course.id)? {
                Some(at) => Some(days_between(at, now)),
                None => Some(NO_ACTION_SENTINEL_DAYS),
            };
            bag.actions_in_last_week =
                Some(events.actions_since(&recipient.id, &course.id, now - Duration::days(7))?);
            bag.actions_in_last_month =
                Some(events.actions_since(&recipient.id, &course.id, now - Duration::days(30))?);
            bag.total_actions = Some(events.total_actions(&recipient.id, &course.id)?);
        }
    }

    Ok(bag)
}

fn days_between(earlier: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - earlier).num_days().max(0)
}
