//! Relay event vocabulary.
//!
//! DESIGN
//! ======
//! Inbound frames are decoded exactly once into the closed [`Inbound`]
//! enum, so the client loop dispatches with an exhaustive `match` instead
//! of string lookups. Outbound events go through [`Outbound`], which owns
//! the positional argument layout the relay expects for each event name.
//!
//! Inbound arguments are positional and loosely typed. A missing argument
//! is a malformed event; a present-but-unparseable date or time is not
//! detected here and is left to the synchronizer.

use frames::Frame;
use serde::Serialize;
use serde_json::{Value, json};

use crate::control::{Decision, PendingControlRequest};
use crate::error::SyncError;
use crate::exam::{Exam, RawExamFields};
use crate::identity::ClockIdentity;
use crate::occupancy::{parse_wire_value, wire_value};
use crate::timefmt::format_time_of_day;

// =============================================================================
// EVENT NAMES
// =============================================================================

pub const EVENT_NEW_EXAM: &str = "new_exam";
pub const EVENT_EDIT_EXAM: &str = "edit_exam";
pub const EVENT_DELETE_EXAM: &str = "delete_exam";
pub const EVENT_OCCUPANCY: &str = "toilet";
pub const EVENT_REQUEST: &str = "request";
pub const EVENT_REQUEST_CALLBACK: &str = "request_callback";
pub const EVENT_CLOCK_ID_CLASH: &str = "clock_id_clash";
pub const EVENT_CLOCK_ID_UNCLASH: &str = "clock_id_un_clash";
pub const EVENT_CLOCK_ERROR: &str = "clock_error";
pub const EVENT_EXAM_UPDATE: &str = "exam_update";
pub const EVENT_RENAME: &str = "rename";

// =============================================================================
// ANNOUNCEMENT
// =============================================================================

/// Identity plus full exam snapshot, sent at connect time and after a clash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Announcement {
    #[serde(flatten)]
    pub identity: ClockIdentity,
    pub exams: Vec<Exam>,
}

impl Announcement {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// =============================================================================
// INBOUND
// =============================================================================

/// Occupancy event as received. Which flag it names is resolved later
/// against the clock's configured flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyUpdate {
    /// String arguments that were not occupancy values, in arrival order.
    pub candidates: Vec<String>,
    /// Explicit value when the peer sent one; `None` means toggle.
    pub value: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    ClockIdClash,
    NewExam { sender: String, fields: RawExamFields },
    EditExam { sender: String, target_id: String, fields: RawExamFields },
    DeleteExam { sender: String, target_id: String },
    Occupancy(OccupancyUpdate),
    ControlRequest(PendingControlRequest),
}

/// A recognised event whose arguments could not be read.
#[derive(Debug)]
pub struct MalformedFrame {
    /// Sender to report the failure to, when the frame carried one.
    pub sender: Option<String>,
    pub error: SyncError,
}

impl Inbound {
    /// Decode a relay frame.
    ///
    /// Returns `Ok(None)` for event names this clock does not handle.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedFrame`] when a handled event is missing arguments.
    pub fn decode(frame: &Frame) -> Result<Option<Self>, MalformedFrame> {
        let args = Args { frame, sender: frame.arg_text(0).or_else(|| frame.from.clone()) };
        let inbound = match frame.event.as_str() {
            EVENT_CLOCK_ID_CLASH => Self::ClockIdClash,
            EVENT_NEW_EXAM => Self::NewExam { sender: args.required(0)?, fields: args.exam_fields(1)? },
            EVENT_EDIT_EXAM => Self::EditExam {
                sender: args.required(0)?,
                target_id: args.required(1)?,
                fields: args.exam_fields(2)?,
            },
            EVENT_DELETE_EXAM => Self::DeleteExam { sender: args.required(0)?, target_id: args.required(1)? },
            EVENT_OCCUPANCY => Self::Occupancy(decode_occupancy(&frame.args)),
            EVENT_REQUEST => Self::ControlRequest(PendingControlRequest {
                requester: args.required(0)?,
                requester_name: args.required(1)?,
            }),
            _ => return Ok(None),
        };
        Ok(Some(inbound))
    }
}

struct Args<'a> {
    frame: &'a Frame,
    sender: Option<String>,
}

impl Args<'_> {
    fn required(&self, index: usize) -> Result<String, MalformedFrame> {
        self.frame.arg_text(index).ok_or_else(|| MalformedFrame {
            sender: self.sender.clone(),
            error: SyncError::MalformedEvent {
                event: self.frame.event.clone(),
                reason: format!("missing argument {index}"),
            },
        })
    }

    fn exam_fields(&self, first: usize) -> Result<RawExamFields, MalformedFrame> {
        Ok(RawExamFields {
            name: self.required(first)?,
            date: self.required(first + 1)?,
            start: self.required(first + 2)?,
            end: self.required(first + 3)?,
        })
    }
}

/// Accepts every historical shape: `[]`, `[flag]`, `[sender, flag]`,
/// `[value]`, `[value, flag]`, `[sender, value, flag]`, with booleans or
/// `"occupied"`/`"vacant"` as the value.
fn decode_occupancy(args: &[Value]) -> OccupancyUpdate {
    let mut update = OccupancyUpdate { candidates: Vec::new(), value: None };
    for arg in args {
        match arg {
            Value::Bool(b) => update.value = Some(*b),
            Value::String(s) => match parse_wire_value(s) {
                Some(v) => update.value = Some(v),
                None => update.candidates.push(s.clone()),
            },
            _ => {}
        }
    }
    update
}

// =============================================================================
// OUTBOUND
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    NewExam(Exam),
    EditExam(Exam),
    DeleteExam(String),
    Occupancy { flag: String, occupied: bool },
    Rename(String),
    ClockIdUnclash(Announcement),
    ExamUpdate(Vec<Exam>),
    RequestCallback { requester: String, decision: Decision },
    ClockError { sender: String, reason: String },
}

impl Outbound {
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::NewExam(_) => EVENT_NEW_EXAM,
            Self::EditExam(_) => EVENT_EDIT_EXAM,
            Self::DeleteExam(_) => EVENT_DELETE_EXAM,
            Self::Occupancy { .. } => EVENT_OCCUPANCY,
            Self::Rename(_) => EVENT_RENAME,
            Self::ClockIdUnclash(_) => EVENT_CLOCK_ID_UNCLASH,
            Self::ExamUpdate(_) => EVENT_EXAM_UPDATE,
            Self::RequestCallback { .. } => EVENT_REQUEST_CALLBACK,
            Self::ClockError { .. } => EVENT_CLOCK_ERROR,
        }
    }

    #[must_use]
    pub fn into_frame(self) -> Frame {
        let name = self.event_name();
        let args = match self {
            Self::NewExam(exam) => vec![exam.to_value()],
            Self::EditExam(exam) => vec![
                json!(exam.id),
                json!(exam.name),
                json!(exam.date_text()),
                json!(format_time_of_day(exam.start)),
                json!(format_time_of_day(exam.end)),
            ],
            Self::DeleteExam(id) => vec![json!(id)],
            Self::Occupancy { flag, occupied } => vec![json!(wire_value(occupied)), json!(flag)],
            Self::Rename(name) => vec![json!(name)],
            Self::ClockIdUnclash(announcement) => vec![json!(announcement)],
            Self::ExamUpdate(exams) => vec![json!({ "exams": exams })],
            Self::RequestCallback { requester, decision } => vec![json!(requester), json!(decision.as_str())],
            Self::ClockError { sender, reason } => vec![json!(sender), json!(reason)],
        };
        Frame::new(name, args)
    }
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
