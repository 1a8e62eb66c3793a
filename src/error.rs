//! Protocol error taxonomy.
//!
//! ERROR HANDLING
//! ==============
//! Per-event failures (bad dates, unknown ids, malformed payloads) are
//! answered to the event's sender with a `clock_error` frame and never
//! mutate local state. Transport failures are absorbed by the channel's
//! reconnect loop. Only exhausting the identity-collision bound stops the
//! client.

use crate::identity::IdentityError;
use crate::timefmt::InvalidTimeFormat;

/// Relay reason code for unparseable dates or times.
pub const REASON_DATE_TIME_INVALID: &str = "date_time_invalid";

/// Relay reason code for a delete targeting an unknown exam.
pub const REASON_EXAM_NOT_FOUND: &str = "exam_not_found";

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    InvalidTimeFormat(#[from] InvalidTimeFormat),
    #[error("invalid date: {0:?}")]
    DateTimeInvalid(String),
    #[error("exam not found: {0}")]
    ExamNotFound(String),
    #[error("duplicate exam id: {0}")]
    DuplicateExam(String),
    #[error("unknown occupancy flag: {0}")]
    UnknownOccupancyFlag(String),
    #[error("malformed {event} event: {reason}")]
    MalformedEvent { event: String, reason: String },
    #[error("clock id still clashing after {attempts} regenerations")]
    IdentityCollision { attempts: u32 },
    #[error("event channel is closed")]
    TransportDisconnected,
    #[error("no decision for control request from {0}")]
    RequestTimeout(String),
    #[error("clock client has stopped")]
    ClientStopped,
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Reason code reported back to the relay for a failed event.
pub trait ErrorCode: std::fmt::Display {
    /// Stable code when one exists; `None` falls back to the display message.
    fn error_code(&self) -> Option<&'static str>;

    fn reason(&self) -> String {
        self.error_code()
            .map_or_else(|| self.to_string(), str::to_owned)
    }
}

impl ErrorCode for SyncError {
    fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::InvalidTimeFormat(_) | Self::DateTimeInvalid(_) => Some(REASON_DATE_TIME_INVALID),
            Self::ExamNotFound(_) => Some(REASON_EXAM_NOT_FOUND),
            _ => None,
        }
    }
}
