use time::{Date, Month, PrimitiveDateTime, Time};

/// Convert a zip (MS-DOS) timestamp to seconds since the Unix epoch.
///
/// Zip timestamps carry no zone; they are interpreted as UTC so that the value is stable
/// regardless of the device's configured time zone. The same conversion is used on both
/// sides of every staleness comparison.
///
/// Returns `None` when the fields do not form a real date and time.
pub fn dos_to_unix_seconds(
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
) -> Option<i64> {
    let month = Month::try_from(month).ok()?;
    let date = Date::from_calendar_date(i32::from(year), month, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp())
}
