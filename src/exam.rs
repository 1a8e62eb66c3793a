//! Exam records and their wire representation.
//!
//! An exam's `id` is assigned once at creation and never changes. Dates
//! travel as `yyyy-MM-dd` and times as 24-hour `HH:mm`; inbound fields are
//! raw operator text and go through [`RawExamFields::parse`] before they can
//! touch local state.

use serde::{Deserialize, Serialize};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, Time};
use uuid::Uuid;

use crate::error::SyncError;
use crate::timefmt::parse_time_of_day;

/// Machine-readable date format used on the wire.
pub const WIRE_DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

time::serde::format_description!(wire_date, Date, "[year]-[month]-[day]");
time::serde::format_description!(wire_time, Time, "[hour]:[minute]");

/// A scheduled exam shown on every clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exam {
    pub id: String,
    pub name: String,
    #[serde(with = "wire_date")]
    pub date: Date,
    #[serde(with = "wire_time")]
    pub start: Time,
    #[serde(with = "wire_time")]
    pub end: Time,
}

impl Exam {
    /// Create an exam with a freshly assigned id.
    #[must_use]
    pub fn new(name: impl Into<String>, date: Date, start: Time, end: Time) -> Self {
        Self { id: Uuid::new_v4().to_string(), name: name.into(), date, start, end }
    }

    /// Overwrite every mutable field from `draft`, keeping the id.
    pub fn apply(&mut self, draft: ExamDraft) {
        self.name = draft.name;
        self.date = draft.date;
        self.start = draft.start;
        self.end = draft.end;
    }

    /// JSON form used inside outbound events.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Date rendered in the wire format.
    #[must_use]
    pub fn date_text(&self) -> String {
        self.date.format(WIRE_DATE_FORMAT).unwrap_or_default()
    }
}

/// Validated exam fields without an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamDraft {
    pub name: String,
    pub date: Date,
    pub start: Time,
    pub end: Time,
}

impl ExamDraft {
    /// Promote the draft into a new exam with a fresh id.
    #[must_use]
    pub fn into_exam(self) -> Exam {
        Exam::new(self.name, self.date, self.start, self.end)
    }
}

/// Exam fields exactly as they arrived from a peer, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExamFields {
    pub name: String,
    pub date: String,
    pub start: String,
    pub end: String,
}

impl RawExamFields {
    /// Validate the raw fields.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DateTimeInvalid`] when the date does not match
    /// `yyyy-MM-dd` and [`SyncError::InvalidTimeFormat`] when either time
    /// matches none of the accepted time formats.
    pub fn parse(&self) -> Result<ExamDraft, SyncError> {
        let date = Date::parse(self.date.trim(), WIRE_DATE_FORMAT)
            .map_err(|_| SyncError::DateTimeInvalid(self.date.clone()))?;
        let start = parse_time_of_day(&self.start)?;
        let end = parse_time_of_day(&self.end)?;
        Ok(ExamDraft { name: self.name.clone(), date, start, end })
    }
}

#[cfg(test)]
#[path = "exam_test.rs"]
mod tests;
