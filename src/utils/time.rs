use chrono::NaiveDate;

pub const RESET_MARKER_FORMAT: &str = "%Y-%m-%d";

/// This is the standard way of converting a reset date to a string in timefence.
pub fn date_to_reset_marker(date: NaiveDate) -> String {
    date.format(RESET_MARKER_FORMAT).to_string()
}

pub fn reset_marker_to_date(marker: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(marker, RESET_MARKER_FORMAT).ok()
}
