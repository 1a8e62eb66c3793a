//! Time-of-day parsing for human-entered exam times.
//!
//! DESIGN
//! ======
//! Operators type times in whatever shape is natural ("9:30am", "09:30",
//! "9 pm"). Input is stripped of all whitespace and then tried against a
//! fixed, ordered list of formats; the first format that consumes the whole
//! input wins. The order is the tie-break for ambiguous input and must not
//! be rearranged.

use time::Time;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::parsing::Parsed;

/// Canonical outbound rendering of a time of day (`HH:mm`, 24-hour).
pub const WIRE_TIME_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]");

/// Accepted input formats, tried in order.
///
/// `hh:mma`, `HH:mm`, `h:mma`, `H:mm`, `hha`, `ha`, `HH`, `H`.
const TIME_FORMATS: [&[BorrowedFormatItem<'static>]; 8] = [
    format_description!("[hour repr:12]:[minute][period case_sensitive:false]"),
    format_description!("[hour]:[minute]"),
    format_description!("[hour repr:12 padding:none]:[minute][period case_sensitive:false]"),
    format_description!("[hour padding:none]:[minute]"),
    format_description!("[hour repr:12][period case_sensitive:false]"),
    format_description!("[hour repr:12 padding:none][period case_sensitive:false]"),
    format_description!("[hour]"),
    format_description!("[hour padding:none]"),
];

/// No accepted format matched the input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time format: {0:?}")]
pub struct InvalidTimeFormat(pub String);

/// Parse a human-entered time of day.
///
/// # Errors
///
/// Returns [`InvalidTimeFormat`] when none of the accepted formats match.
pub fn parse_time_of_day(text: &str) -> Result<Time, InvalidTimeFormat> {
    let compact: String = text.split_whitespace().collect();
    if compact.is_empty() {
        return Err(InvalidTimeFormat(text.to_owned()));
    }

    for format in TIME_FORMATS {
        if let Some(time) = parse_with(&compact, format) {
            return Ok(time);
        }
    }
    Err(InvalidTimeFormat(text.trim().to_owned()))
}

/// Render a time in the canonical wire format.
#[must_use]
pub fn format_time_of_day(time: Time) -> String {
    time.format(WIRE_TIME_FORMAT).unwrap_or_default()
}

fn parse_with(input: &str, format: &[BorrowedFormatItem<'_>]) -> Option<Time> {
    let mut parsed = Parsed::new();
    let rest = parsed.parse_items(input.as_bytes(), format).ok()?;
    if !rest.is_empty() {
        return None;
    }

    let hour = match (parsed.hour_24(), parsed.hour_12(), parsed.hour_12_is_pm()) {
        (Some(hour), _, _) => hour,
        (None, Some(hour), Some(pm)) => hour.get() % 12 + if pm { 12 } else { 0 },
        _ => return None,
    };
    let minute = parsed.minute().unwrap_or(0);
    Time::from_hms(hour, minute, 0).ok()
}

#[cfg(test)]
#[path = "timefmt_test.rs"]
mod tests;
