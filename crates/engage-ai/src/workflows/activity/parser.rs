use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::io::Read;

use crate::workflows::engagement::domain::{EngagementEventKind, PlatformOrigin};

#[derive(Debug)]
pub(crate) struct ActivityRecord {
    pub(crate) recipient_id: String,
    pub(crate) email: String,
    pub(crate) name: String,
    pub(crate) platform: PlatformOrigin,
    pub(crate) course_id: String,
    pub(crate) kind: EngagementEventKind,
    pub(crate) occurred_at: DateTime<Utc>,
    pub(crate) progress_percent: Option<f32>,
    pub(crate) module_index: Option<u32>,
}

/// Parses an activity export, dropping rows whose event kind or timestamp
/// cannot be read; platform exports routinely contain half-filled rows.
pub(crate) fn parse_records<R: Read>(reader: R) -> Result<Vec<ActivityRecord>, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut records = Vec::new();

    for record in csv_reader.deserialize::<ActivityRow>() {
        let row = record?;
        let Some(kind) = row.event_kind() else {
            continue;
        };
        let Some(occurred_at) = row.occurred_at.as_deref().and_then(parse_datetime) else {
            continue;
        };

        records.push(ActivityRecord {
            recipient_id: row.recipient_id.clone(),
            email: row.email.clone().unwrap_or_default(),
            name: row.name.clone().unwrap_or_else(|| row.recipient_id.clone()),
            platform: row.platform_origin(),
            course_id: row.course_id.clone(),
            kind,
            occurred_at,
            progress_percent: row.progress_percent,
            module_index: row.module_index,
        });
    }

    Ok(records)
}

#[derive(Debug, Deserialize)]
struct ActivityRow {
    #[serde(rename = "Recipient ID")]
    recipient_id: String,
    #[serde(rename = "Email", default, deserialize_with = "empty_string_as_none")]
    email: Option<String>,
    #[serde(rename = "Name", default, deserialize_with = "empty_string_as_none")]
    name: Option<String>,
    #[serde(rename = "Platform", default, deserialize_with = "empty_string_as_none")]
    platform: Option<String>,
    #[serde(
        rename = "Platform Reference",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    platform_reference: Option<String>,
    #[serde(rename = "Course ID")]
    course_id: String,
    #[serde(rename = "Event", default, deserialize_with = "empty_string_as_none")]
    event: Option<String>,
    #[serde(
        rename = "Action Label",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    action_label: Option<String>,
    #[serde(
        rename = "Occurred At",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    occurred_at: Option<String>,
    #[serde(rename = "Progress Percent", default)]
    progress_percent: Option<f32>,
    #[serde(rename = "Module Index", default)]
    module_index: Option<u32>,
}

impl ActivityRow {
    fn event_kind(&self) -> Option<EngagementEventKind> {
        match self.event.as_deref()?.to_ascii_lowercase().as_str() {
            "login" => Some(EngagementEventKind::Login),
            "action" => Some(EngagementEventKind::Action {
                label: self
                    .action_label
                    .clone()
                    .unwrap_or_else(|| "unspecified".to_string()),
            }),
            _ => None,
        }
    }

    fn platform_origin(&self) -> PlatformOrigin {
        let reference = self
            .platform_reference
            .clone()
            .unwrap_or_else(|| self.recipient_id.clone());

        match self
            .platform
            .as_deref()
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "hotmart" => PlatformOrigin::Hotmart {
                buyer_code: reference,
            },
            "curseduca" => PlatformOrigin::CursEduca {
                member_id: reference,
            },
            _ => PlatformOrigin::Unknown,
        }
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }

    None
}
