//! Offline ingestion of platform activity exports, used to hydrate
//! recipients and engagement events for demos and targeted sweeps.

mod parser;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use crate::workflows::engagement::domain::{
    CourseId, CourseProgress, EngagementEvent, Recipient, RecipientId,
};

#[derive(Debug)]
pub enum ActivityImportError {
    Io(std::io::Error),
    Csv(csv::Error),
}

impl std::fmt::Display for ActivityImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityImportError::Io(err) => {
                write!(f, "failed to read activity export: {}", err)
            }
            ActivityImportError::Csv(err) => write!(f, "invalid activity CSV data: {}", err),
        }
    }
}

impl std::error::Error for ActivityImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ActivityImportError::Io(err) => Some(err),
            ActivityImportError::Csv(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ActivityImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ActivityImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

/// Recipients and events reconstructed from one activity export.
#[derive(Debug, Default)]
pub struct ImportedActivity {
    pub recipients: Vec<Recipient>,
    pub events: Vec<EngagementEvent>,
}

pub struct ActivityImporter;

impl ActivityImporter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<ImportedActivity, ActivityImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<ImportedActivity, ActivityImportError> {
        let mut recipients: BTreeMap<RecipientId, Recipient> = BTreeMap::new();
        let mut events = Vec::new();

        for record in parser::parse_records(reader)? {
            let recipient_id = RecipientId(record.recipient_id.clone());
            let course_id = CourseId(record.course_id.clone());

            let recipient = recipients
                .entry(recipient_id.clone())
                .or_insert_with(|| Recipient {
                    id: recipient_id.clone(),
                    email: record.email.clone(),
                    display_name: record.name.clone(),
                    platform: record.platform.clone(),
                    registered_at: record.occurred_at,
                    progress: BTreeMap::new(),
                });

            // The earliest observed event doubles as the registration
            // anchor for login-tracked inactivity.
            if record.occurred_at < recipient.registered_at {
                recipient.registered_at = record.occurred_at;
            }
            if recipient.email.is_empty() && !record.email.is_empty() {
                recipient.email = record.email.clone();
            }

            if let Some(percent) = record.progress_percent {
                let progress = recipient
                    .progress
                    .entry(course_id.clone())
                    .or_insert(CourseProgress {
                        percent_complete: 0.0,
                        module_index: 0,
                    });
                progress.percent_complete = percent;
                if let Some(module_index) = record.module_index {
                    progress.module_index = module_index;
                }
            }

            events.push(EngagementEvent {
                recipient_id,
                course_id,
                kind: record.kind,
                occurred_at: record.occurred_at,
            });
        }

        Ok(ImportedActivity {
            recipients: recipients.into_values().collect(),
            events,
        })
    }
}
