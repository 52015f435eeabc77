use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::segment::Segment;

pub const SCHEMA_VERSION: &str = "2.0";

/// Workflow state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SessionStatus {
    #[default]
    #[serde(rename = "Needs Linking")]
    NeedsLinking,
    Linked,
    Complete,
    #[serde(alias = "error")]
    Error,
}

/// A continuous unit of work from one source, with its resolved identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub schema_version: String,
    pub source_system: String,
    pub source_identifiers: Vec<String>,
    pub status: SessionStatus,
    #[serde(default)]
    pub processing_log: Vec<String>,
    pub ingested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub customer_id: Option<i64>,
    pub customer_name: Option<String>,
    pub contact_id: Option<i64>,
    pub contact_name: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub title: Option<String>,
    pub segments: Vec<Segment>,
}

impl Session {
    /// Guessed customer name, if it carries any text.
    pub fn guessed_customer(&self) -> Option<&str> {
        non_blank(self.customer_name.as_deref())
    }

    /// Guessed contact name, if it carries any text.
    pub fn guessed_contact(&self) -> Option<&str> {
        non_blank(self.contact_name.as_deref())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Whole minutes between `start` and `end`, never negative.
pub fn duration_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_seconds().max(0) / 60
}
