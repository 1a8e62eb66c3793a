use super::*;
use time::macros::time;

#[test]
fn parses_twelve_hour_with_minutes() {
    assert_eq!(parse_time_of_day("9:30am").unwrap(), time!(9:30));
    assert_eq!(parse_time_of_day("09:30PM").unwrap(), time!(21:30));
}

#[test]
fn parses_twenty_four_hour_with_minutes() {
    assert_eq!(parse_time_of_day("09:30").unwrap(), time!(9:30));
    assert_eq!(parse_time_of_day("9:05").unwrap(), time!(9:05));
    assert_eq!(parse_time_of_day("23:59").unwrap(), time!(23:59));
}

#[test]
fn parses_hour_only_with_meridiem() {
    assert_eq!(parse_time_of_day("9am").unwrap(), time!(9:00));
    assert_eq!(parse_time_of_day("11pm").unwrap(), time!(23:00));
    assert_eq!(parse_time_of_day("03pm").unwrap(), time!(15:00));
}

#[test]
fn parses_bare_hour_as_twenty_four_hour() {
    assert_eq!(parse_time_of_day("9").unwrap(), time!(9:00));
    assert_eq!(parse_time_of_day("14").unwrap(), time!(14:00));
}

#[test]
fn midnight_and_noon_meridiem_edges() {
    assert_eq!(parse_time_of_day("12am").unwrap(), time!(0:00));
    assert_eq!(parse_time_of_day("12:15pm").unwrap(), time!(12:15));
}

#[test]
fn strips_surrounding_and_interior_whitespace() {
    assert_eq!(parse_time_of_day("  9:30 am \n").unwrap(), time!(9:30));
    assert_eq!(parse_time_of_day("9 PM").unwrap(), time!(21:00));
}

#[test]
fn rejects_unparseable_text() {
    let err = parse_time_of_day("not-a-time").expect_err("should fail");
    assert_eq!(err, InvalidTimeFormat("not-a-time".to_owned()));
}

#[test]
fn rejects_out_of_range_and_trailing_garbage() {
    assert!(parse_time_of_day("25:00").is_err());
    assert!(parse_time_of_day("13pm").is_err());
    assert!(parse_time_of_day("9:30xyz").is_err());
    assert!(parse_time_of_day("").is_err());
    assert!(parse_time_of_day("   ").is_err());
}

#[test]
fn wire_format_is_zero_padded_twenty_four_hour() {
    assert_eq!(format_time_of_day(time!(9:05)), "09:05");
    assert_eq!(format_time_of_day(time!(21:30)), "21:30");
}

#[test]
fn wire_format_parses_back() {
    let original = time!(16:45);
    assert_eq!(parse_time_of_day(&format_time_of_day(original)).unwrap(), original);
}
