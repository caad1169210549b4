pub mod experiments;
pub mod health;
pub mod plans;
pub mod tenants;
pub mod usage;
pub mod webhooks;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};

use crate::error::AppError;

fn parse_bound(field: &str, raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, AppError> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        AppError::BadRequest(format!(
            "invalid {field} (expected YYYY-MM-DD or an RFC 3339 timestamp)"
        ))
    })?;
    let time = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| Utc.from_utc_datetime(&t))
        .ok_or_else(|| AppError::BadRequest(format!("invalid {field}")))
}

/// Inclusive billing window from `start` / `end` query parameters.
///
/// Dates without a time cover the whole day. Missing bounds default to the
/// current calendar month up to now.
pub(crate) fn parse_period(
    start: Option<&str>,
    end: Option<&str>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
    let now = Utc::now();
    let start = match start.filter(|s| !s.trim().is_empty()) {
        Some(raw) => parse_bound("start", raw, false)?,
        None => Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now),
    };
    let end = match end.filter(|s| !s.trim().is_empty()) {
        Some(raw) => parse_bound("end", raw, true)?,
        None => now,
    };
    if end < start {
        return Err(AppError::BadRequest(
            "end must be on or after start".to_string(),
        ));
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_cover_whole_days() {
        let (start, end) = parse_period(Some("2026-01-01"), Some("2026-01-31")).unwrap();
        assert_eq!(start.to_rfc3339(), "2026-01-01T00:00:00+00:00");
        assert_eq!(end.timestamp_millis() - start.timestamp_millis(), 31 * 86_400_000 - 1);
    }

    #[test]
    fn timestamps_and_defaults() {
        let (start, _) = parse_period(Some("2020-02-03T10:00:00+02:00"), None).unwrap();
        assert_eq!(start.to_rfc3339(), "2020-02-03T08:00:00+00:00");

        let (start, end) = parse_period(None, None).unwrap();
        assert_eq!(start.day(), 1);
        assert!(start <= end);
    }

    #[test]
    fn reversed_or_garbled_periods_are_rejected() {
        assert!(parse_period(Some("2026-02-01"), Some("2026-01-01")).is_err());
        assert!(parse_period(Some("yesterday"), None).is_err());
    }
}
