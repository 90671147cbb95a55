use crate::error::{AppError, Result};
use crate::models::{BusinessHoursConfig, Period};
use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;

/// Evaluate the business-hours window at a point in time.
///
/// The check is weekday-set plus minute-of-day range in the configured
/// timezone, inclusive start, exclusive end. A weekday outside the
/// configured set is never business hours regardless of time of day.
pub fn is_business_hours(config: &BusinessHoursConfig, at: DateTime<Utc>) -> Result<bool> {
    let tz: Tz = config.timezone.parse().map_err(|_| {
        AppError::Configuration(format!("Invalid timezone: {}", config.timezone))
    })?;

    let local = at.with_timezone(&tz);

    let weekday = local.weekday().num_days_from_sunday() as u8;
    if !config.days.contains(&weekday) {
        return Ok(false);
    }

    let current_minutes = local.hour() * 60 + local.minute();
    Ok(config.start_minutes() <= current_minutes && current_minutes < config.end_minutes())
}

/// Classify a point in time into a period, falling back to business hours
/// when the window cannot be evaluated. Routing never hard-fails on a bad
/// or missing window configuration.
pub fn classify_period(config: &BusinessHoursConfig, at: DateTime<Utc>) -> Period {
    match is_business_hours(config, at) {
        Ok(true) => Period::BusinessHours,
        Ok(false) => Period::AfterHours,
        Err(e) => {
            tracing::warn!(
                error = %e,
                timezone = %config.timezone,
                "Business-hours window unusable, defaulting to business hours"
            );
            Period::BusinessHours
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn weekday_window() -> BusinessHoursConfig {
        BusinessHoursConfig {
            days: vec![1, 2, 3, 4, 5],
            start_hour: 8,
            start_minute: 0,
            end_hour: 17,
            end_minute: 0,
            timezone: "America/Los_Angeles".to_string(),
        }
    }

    #[test]
    fn test_weekday_inside_window() {
        // Monday 2024-01-15 10:00 PST = 18:00 UTC
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 18, 0, 0).unwrap();
        assert!(is_business_hours(&weekday_window(), at).unwrap());
    }

    #[test]
    fn test_weekday_outside_window() {
        // Monday 2024-01-15 06:00 PST = 14:00 UTC
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        assert!(!is_business_hours(&weekday_window(), at).unwrap());
    }

    #[test]
    fn test_weekend_never_business_hours() {
        // Saturday 2024-01-13 10:00 PST, mid-window time of day
        let at = Utc.with_ymd_and_hms(2024, 1, 13, 18, 0, 0).unwrap();
        assert!(!is_business_hours(&weekday_window(), at).unwrap());
    }

    #[test]
    fn test_window_bounds_half_open() {
        let config = weekday_window();

        // Exactly 08:00 PST is inside
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 16, 0, 0).unwrap();
        assert!(is_business_hours(&config, start).unwrap());

        // Exactly 17:00 PST is outside
        let end = Utc.with_ymd_and_hms(2024, 1, 16, 1, 0, 0).unwrap();
        assert!(!is_business_hours(&config, end).unwrap());
    }

    #[test]
    fn test_invalid_timezone_defaults_to_business_hours() {
        let mut config = weekday_window();
        config.timezone = "Not/AZone".to_string();

        let at = Utc.with_ymd_and_hms(2024, 1, 13, 3, 0, 0).unwrap();
        assert!(is_business_hours(&config, at).is_err());
        assert_eq!(classify_period(&config, at), Period::BusinessHours);
    }
}
