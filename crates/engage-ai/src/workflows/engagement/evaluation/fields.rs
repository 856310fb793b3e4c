use crate::workflows::engagement::domain::{StatisticBag, TrackingMode};

/// Statistic fields rule conditions may reference for login-tracked courses.
pub const LOGIN_BASED_FIELDS: &[&str] = &[
    "daysSinceLastLogin",
    "currentProgressPercent",
    "currentModuleIndex",
];

/// Statistic fields rule conditions may reference for action-tracked courses.
pub const ACTION_BASED_FIELDS: &[&str] = &[
    "daysSinceLastAction",
    "actionsInLastWeek",
    "actionsInLastMonth",
    "totalActions",
    "currentProgressPercent",
    "currentModuleIndex",
];

pub fn allowed_fields(mode: TrackingMode) -> &'static [&'static str] {
    match mode {
        TrackingMode::LoginBased => LOGIN_BASED_FIELDS,
        TrackingMode::ActionBased => ACTION_BASED_FIELDS,
    }
}

pub fn field_allowed(field: &str, mode: TrackingMode) -> bool {
    allowed_fields(mode).contains(&field)
}

/// Resolves a field name to its value in the bag through the mode-aware
/// map. `None` means the field is unknown, illegal for the mode, or simply
/// absent from this bag; conditions referencing it fail closed.
pub fn resolve(field: &str, mode: TrackingMode, bag: &StatisticBag) -> Option<f64> {
    if !field_allowed(field, mode) {
        return None;
    }

    match field {
        "daysSinceLastLogin" => bag.days_since_last_login.map(|v| v as f64),
        "daysSinceLastAction" => bag.days_since_last_action.map(|v| v as f64),
        "actionsInLastWeek" => bag.actions_in_last_week.map(|v| v as f64),
        "actionsInLastMonth" => bag.actions_in_last_month.map(|v| v as f64),
        "totalActions" => bag.total_actions.map(|v| v as f64),
        "currentProgressPercent" => bag.current_progress_percent.map(f64::from),
        "currentModuleIndex" => bag.current_module_index.map(f64::from),
        _ => None,
    }
}
