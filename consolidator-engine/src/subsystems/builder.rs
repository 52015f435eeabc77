//! Session builder — one session per clustered group
//!
//! Owns the group's segments and derives bounds and duration from them. Names
//! and ids start as unlinked guesses for the linker to resolve later.

use chrono::Utc;
use consolidator_core::models::{duration_minutes, SCHEMA_VERSION};
use consolidator_core::{ConsolidatorError, Segment, Session, SessionStatus};
use uuid::Uuid;

/// Identity placeholders and bookkeeping for sessions built from one source.
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    source_system: String,
    source_identifiers: Vec<String>,
    customer_name: Option<String>,
    contact_name: Option<String>,
    customer_id: Option<i64>,
    contact_id: Option<i64>,
    title: Option<String>,
    status: SessionStatus,
}

impl SessionBuilder {
    pub fn new(source_system: impl Into<String>) -> Self {
        Self {
            source_system: source_system.into(),
            source_identifiers: Vec::new(),
            customer_name: None,
            contact_name: None,
            customer_id: None,
            contact_id: None,
            title: None,
            status: SessionStatus::NeedsLinking,
        }
    }

    pub fn source_identifiers(mut self, identifiers: Vec<String>) -> Self {
        self.source_identifiers = identifiers;
        self
    }

    pub fn customer_name(mut self, name: Option<String>) -> Self {
        self.customer_name = name;
        self
    }

    pub fn contact_name(mut self, name: Option<String>) -> Self {
        self.contact_name = name;
        self
    }

    pub fn customer_id(mut self, id: Option<i64>) -> Self {
        self.customer_id = id;
        self
    }

    pub fn contact_id(mut self, id: Option<i64>) -> Self {
        self.contact_id = id;
        self
    }

    pub fn title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }

    /// Build a session owning `segments`.
    ///
    /// Bounds are the earliest start and latest end across all segments, not
    /// the first and last in arrival order.
    pub fn build(self, segments: Vec<Segment>) -> Result<Session, ConsolidatorError> {
        let start_time = segments
            .iter()
            .map(|s| s.start_time)
            .min()
            .ok_or(ConsolidatorError::EmptySession)?;
        let end_time = segments
            .iter()
            .map(|s| s.end_time)
            .max()
            .ok_or(ConsolidatorError::EmptySession)?;

        let now = Utc::now();

        Ok(Session {
            id: Uuid::new_v4(),
            schema_version: SCHEMA_VERSION.to_string(),
            source_system: self.source_system,
            source_identifiers: self.source_identifiers,
            status: self.status,
            processing_log: Vec::new(),
            ingested_at: now,
            updated_at: now,
            customer_id: self.customer_id,
            customer_name: self.customer_name,
            contact_id: self.contact_id,
            contact_name: self.contact_name,
            start_time,
            end_time,
            duration_minutes: duration_minutes(start_time, end_time),
            title: self.title,
            segments,
        })
    }
}
