//! Small date and time helpers shared by the library and the CLI.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};

use crate::SmaError;

/// The current time as a 32-bit Unix timestamp.
pub fn now_timestamp() -> u32 {
    Local::now().timestamp() as u32
}

/// Renders a device timestamp in local time for humans.
pub fn format_time(timestamp: u32) -> String {
    match Local.timestamp_opt(i64::from(timestamp), 0) {
        chrono::LocalResult::Single(dt) => dt.format("%a, %d %b %Y %H:%M:%S").to_string(),
        _ => format!("@{timestamp}"),
    }
}

/// Parses `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS` in local time into a Unix
/// timestamp.
pub fn parse_time(s: &str) -> Result<u32, SmaError> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| SmaError::InvalidTime(s.to_string()))?;

    match Local.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            Ok(dt.timestamp() as u32)
        }
        chrono::LocalResult::None => Err(SmaError::InvalidTime(s.to_string())),
    }
}

/// The 16-bit timezone encoding the device clock expects: seconds east of
/// UTC plus one, wrapped into an unsigned word.
pub fn tz_offset() -> u16 {
    tz_offset_for(&Local::now())
}

fn tz_offset_for(now: &DateTime<Local>) -> u16 {
    let east = now.offset().local_minus_utc();
    (east + 1) as u16
}
