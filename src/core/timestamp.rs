// harvest - core/timestamp.rs
//
// Timezone-aware timestamp extraction for remote log lines.
//
// Remote hosts write local wall-clock times. Each session captures the remote
// UTC offset once (`date +%z`) and every line carries it, so a timestamp token
// is interpreted in the host's zone regardless of where harvest runs.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};

/// Parse a UTC offset string.
///
/// Accepts `±HHMM`, `±HH:MM`, `±HH`, and the names `Z`, `UTC`, `GMT`.
/// Returns `None` for anything else, including offsets of 24h or more.
pub fn parse_offset(tz: &str) -> Option<FixedOffset> {
    let tz = tz.trim();
    if tz.eq_ignore_ascii_case("z") || tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("gmt")
    {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (
            digits[..2].parse::<i32>().ok()?,
            digits[2..].parse::<i32>().ok()?,
        ),
        _ => return None,
    };
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Pick the offset a timestamp token is interpreted in.
///
/// A non-empty, valid `override_tz` wins; otherwise the offset captured from
/// the session; otherwise UTC.
pub fn effective_offset(override_tz: &str, line_tz: &str) -> FixedOffset {
    if !override_tz.trim().is_empty() {
        if let Some(offset) = parse_offset(override_tz) {
            return offset;
        }
        tracing::debug!(tz = override_tz, "Unrecognised timezone override; ignoring");
    }
    parse_offset(line_tz).unwrap_or_else(|| {
        if !line_tz.is_empty() {
            tracing::debug!(tz = line_tz, "Unrecognised session offset; assuming UTC");
        }
        Utc.fix()
    })
}

/// Parse a raw timestamp token using a chrono format string, interpreting
/// zone-less values in `offset`.
///
/// Strategy:
///   1. Formats carrying their own offset (`%z`, `%:z`, `%#z`) are parsed as
///      absolute times; `offset` is not consulted.
///   2. Full `NaiveDateTime` parse, located in `offset`.
///   3. `NaiveDate`-only parse for date-only formats, midnight in `offset`.
///   4. Current-year injection for year-less formats (BSD syslog
///      `%b %d %H:%M:%S`). Best-effort: a file spanning New Year gets the
///      wrong year for the older half.
///
/// Returns `Err(description)` on failure. Callers degrade to an unresolved
/// timestamp; this is never a stream error.
pub fn parse_time(
    format: &str,
    offset: FixedOffset,
    raw: &str,
) -> Result<DateTime<FixedOffset>, String> {
    let trimmed = raw.trim();

    if format.contains("%z") || format.contains("%:z") || format.contains("%#z") {
        return DateTime::parse_from_str(trimmed, format)
            .map_err(|e| format!("cannot parse '{trimmed}' with format '{format}': {e}"));
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(trimmed, format) {
        return locate(ndt, offset, trimmed);
    }

    if let Ok(nd) = NaiveDate::parse_from_str(trimmed, format) {
        if let Some(ndt) = nd.and_hms_opt(0, 0, 0) {
            return locate(ndt, offset, trimmed);
        }
    }

    if !format.contains("%Y") && !format.contains("%y") && !format.contains("%C") {
        let year = Utc::now().with_timezone(&offset).year();
        let with_year = format!("{year} {trimmed}");
        let year_format = format!("%Y {format}");
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&with_year, &year_format) {
            return locate(ndt, offset, trimmed);
        }
    }

    Err(format!("cannot parse '{trimmed}' with format '{format}'"))
}

fn locate(
    ndt: NaiveDateTime,
    offset: FixedOffset,
    raw: &str,
) -> Result<DateTime<FixedOffset>, String> {
    offset
        .from_local_datetime(&ndt)
        .single()
        .ok_or_else(|| format!("'{raw}' does not exist in offset {offset}"))
}

/// Parse a raw token into nanoseconds since the epoch, or `None`.
pub fn parse_to_nanos(format: &str, offset: FixedOffset, raw: &str) -> Option<i64> {
    parse_time(format, offset, raw)
        .ok()
        .and_then(|dt| dt.timestamp_nanos_opt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    // -------------------------------------------------------------------------
    // Offsets
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_offset_variants() {
        assert_eq!(parse_offset("+0900"), Some(jst()));
        assert_eq!(parse_offset("+09:00"), Some(jst()));
        assert_eq!(parse_offset("+09"), Some(jst()));
        assert_eq!(
            parse_offset("-0530"),
            FixedOffset::west_opt(5 * 3600 + 30 * 60)
        );
        assert_eq!(parse_offset("UTC"), FixedOffset::east_opt(0));
        assert_eq!(parse_offset("Z"), FixedOffset::east_opt(0));
        assert_eq!(parse_offset(" +0000\n"), FixedOffset::east_opt(0));
    }

    #[test]
    fn test_parse_offset_rejects_garbage() {
        assert_eq!(parse_offset(""), None);
        assert_eq!(parse_offset("0900"), None);
        assert_eq!(parse_offset("+9"), None);
        assert_eq!(parse_offset("+2500"), None);
        assert_eq!(parse_offset("+09x0"), None);
        assert_eq!(parse_offset("Asia/Tokyo"), None);
    }

    #[test]
    fn test_effective_offset_prefers_override() {
        assert_eq!(effective_offset("+0900", "+0000"), jst());
        assert_eq!(effective_offset("", "+0900"), jst());
        assert_eq!(effective_offset("bogus", "+0900"), jst());
        assert_eq!(effective_offset("", ""), Utc.fix());
    }

    // -------------------------------------------------------------------------
    // Timestamps
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_time_in_line_offset() {
        let dt = parse_time("%Y-%m-%dT%H:%M:%S", jst(), "2024-01-15T23:30:22").unwrap();
        assert_eq!(
            dt.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-01-15 14:30:22"
        );
    }

    #[test]
    fn test_parse_time_embedded_offset_ignores_line_offset() {
        let dt = parse_time(
            "%d/%b/%Y:%H:%M:%S %z",
            jst(),
            "15/Jan/2024:14:30:22 +0000",
        )
        .unwrap();
        assert_eq!(dt.timestamp(), 1_705_329_022);
    }

    #[test]
    fn test_parse_time_date_only_is_local_midnight() {
        let dt = parse_time("%Y-%m-%d", jst(), "2024-01-15").unwrap();
        assert_eq!(
            dt.with_timezone(&Utc).to_rfc3339(),
            "2024-01-14T15:00:00+00:00"
        );
    }

    #[test]
    fn test_parse_time_syslog_yearless() {
        let dt = parse_time("%b %d %H:%M:%S", Utc.fix(), "Jan 15 14:30:22")
            .expect("syslog year-less timestamp should succeed with year injection");
        assert!(dt.year() >= 2024);
        assert_eq!(dt.format("%m-%d %H:%M:%S").to_string(), "01-15 14:30:22");
    }

    #[test]
    fn test_parse_time_with_fraction() {
        let dt = parse_time("%Y-%m-%d %H:%M:%S%.f", Utc.fix(), "2024-01-15 14:30:22.123").unwrap();
        assert_eq!(dt.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn test_parse_time_invalid_returns_error() {
        assert!(parse_time("%Y-%m-%d %H:%M:%S", Utc.fix(), "not-a-date").is_err());
    }

    #[test]
    fn test_parse_to_nanos() {
        assert_eq!(
            parse_to_nanos("%Y-%m-%d %H:%M:%S", Utc.fix(), "2024-01-15 14:30:22"),
            Some(1_705_329_022_000_000_000)
        );
        assert_eq!(parse_to_nanos("%Y", Utc.fix(), "nope"), None);
    }
}
