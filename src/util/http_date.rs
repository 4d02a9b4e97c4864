//! HTTP-date (IMF-fixdate) formatting for `Date` and `Last-Modified` headers.

use std::time::SystemTime;

use time::{
    OffsetDateTime, UtcOffset, format_description::BorrowedFormatItem, macros::format_description,
};

const IMF_FIXDATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Format a timestamp as `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(at: OffsetDateTime) -> String {
    let utc = at.to_offset(UtcOffset::UTC);
    utc.format(IMF_FIXDATE).unwrap_or_else(|_| utc.unix_timestamp().to_string())
}

/// Format a filesystem modification time as an HTTP-date.
pub fn format_system_time(at: SystemTime) -> String {
    format_http_date(OffsetDateTime::from(at))
}

/// The current time as an HTTP-date.
pub fn http_date_now() -> String {
    format_http_date(OffsetDateTime::now_utc())
}
