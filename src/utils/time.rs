use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Household-local view of a unix timestamp. Falls back to UTC when the
/// configured timezone is invalid.
pub fn to_local(timestamp: i64, timezone: &str) -> DateTime<Tz> {
    let tz: Tz = timezone.parse().unwrap_or(chrono_tz::UTC);
    tz.from_utc_datetime(
        &Utc.timestamp_opt(timestamp, 0)
            .single()
            .unwrap_or_else(Utc::now)
            .naive_utc(),
    )
}

pub fn local_hour(timestamp: i64, timezone: &str) -> u32 {
    to_local(timestamp, timezone).hour()
}

pub fn local_date(timestamp: i64, timezone: &str) -> NaiveDate {
    to_local(timestamp, timezone).date_naive()
}

pub fn minute_of_day(timestamp: i64, timezone: &str) -> u32 {
    let local = to_local(timestamp, timezone);
    local.hour() * 60 + local.minute()
}

pub fn is_weekend_day(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

/// Circular mean of minutes-of-day, so occurrences around midnight do not
/// average to noon.
pub fn circular_mean_minutes(minutes: &[u32]) -> f64 {
    if minutes.is_empty() {
        return 0.0;
    }
    let (mut sin_sum, mut cos_sum) = (0.0f64, 0.0f64);
    for &m in minutes {
        let angle = (m as f64) / 1440.0 * std::f64::consts::TAU;
        sin_sum += angle.sin();
        cos_sum += angle.cos();
    }
    let mean_angle = sin_sum.atan2(cos_sum);
    let mut mean = mean_angle / std::f64::consts::TAU * 1440.0;
    if mean < 0.0 {
        mean += 1440.0;
    }
    mean
}

/// Standard deviation of minutes-of-day around the circular mean, measured
/// along the shorter arc.
pub fn circular_stddev_minutes(minutes: &[u32]) -> f64 {
    if minutes.len() < 2 {
        return 0.0;
    }
    let mean = circular_mean_minutes(minutes);
    let var = minutes
        .iter()
        .map(|&m| {
            let mut diff = (m as f64 - mean).abs();
            if diff > 720.0 {
                diff = 1440.0 - diff;
            }
            diff * diff
        })
        .sum::<f64>()
        / (minutes.len() - 1) as f64;
    var.sqrt()
}

/// True when a schedule expression covers the local minute of `timestamp`.
/// Accepts a bare "HH:MM" daily time or a five-field cron line
/// (minute hour day month weekday) with `*`, numbers and comma lists;
/// weekday 0 and 7 both mean Sunday.
pub fn schedule_matches(expr: &str, timestamp: i64, timezone: &str) -> bool {
    let local = to_local(timestamp, timezone);
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        1 => {
            let Some((h, m)) = fields[0].split_once(':') else {
                return false;
            };
            h.parse() == Ok(local.hour()) && m.parse() == Ok(local.minute())
        }
        5 => {
            let weekday = local.weekday().num_days_from_sunday();
            cron_field_matches(fields[0], local.minute())
                && cron_field_matches(fields[1], local.hour())
                && cron_field_matches(fields[2], local.day())
                && cron_field_matches(fields[3], local.month())
                && (cron_field_matches(fields[4], weekday)
                    || (weekday == 0 && cron_field_matches(fields[4], 7)))
        }
        _ => false,
    }
}

fn cron_field_matches(field: &str, value: u32) -> bool {
    field == "*" || field.split(',').any(|part| part.parse() == Ok(value))
}

/// Approximate solar elevation in degrees for a timestamp and location.
/// NOAA-style declination/hour-angle approximation; a degree or two of error
/// is fine for daylight-relative pattern matching.
pub fn solar_elevation(timestamp: i64, latitude: f64, longitude: f64) -> f64 {
    let utc = Utc
        .timestamp_opt(timestamp, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let day_of_year = utc.ordinal() as f64;
    let hour_utc = utc.hour() as f64 + utc.minute() as f64 / 60.0;

    let declination =
        -23.44f64.to_radians() * ((360.0 / 365.0) * (day_of_year + 10.0)).to_radians().cos();
    let solar_time = hour_utc + longitude / 15.0;
    let hour_angle = ((solar_time - 12.0) * 15.0).to_radians();
    let lat = latitude.to_radians();

    let elevation =
        (lat.sin() * declination.sin() + lat.cos() * declination.cos() * hour_angle.cos()).asin();
    elevation.to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_mean_handles_midnight_wrap() {
        // 23:50 and 00:10 average to midnight, not noon
        let mean = circular_mean_minutes(&[1430, 10]);
        assert!(mean > 1435.0 || mean < 5.0, "mean was {}", mean);
    }

    #[test]
    fn circular_mean_of_evening_cluster() {
        // Around 18:02
        let minutes = [1080, 1082, 1083, 1081];
        let mean = circular_mean_minutes(&minutes);
        assert!((mean - 1081.5).abs() < 1.0);
        assert!(circular_stddev_minutes(&minutes) < 3.0);
    }

    #[test]
    fn schedule_expression_covers_the_local_minute() {
        // Wednesday 2026-03-04 06:30 UTC
        let ts = Utc.with_ymd_and_hms(2026, 3, 4, 6, 30, 0).unwrap().timestamp();
        assert!(schedule_matches("06:30", ts, "UTC"));
        assert!(schedule_matches("30 6 * * *", ts, "UTC"));
        assert!(schedule_matches("30 6 4 3 3", ts, "UTC"));
        assert!(schedule_matches("0,30 6 * * *", ts, "UTC"));
        assert!(!schedule_matches("06:31", ts, "UTC"));
        assert!(!schedule_matches("30 6 * * 0", ts, "UTC"));
        assert!(!schedule_matches("", ts, "UTC"));

        // Sunday matches both 0 and 7 in the weekday field
        let sunday = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap().timestamp();
        assert!(schedule_matches("0 8 * * 0", sunday, "UTC"));
        assert!(schedule_matches("0 8 * * 7", sunday, "UTC"));
    }

    #[test]
    fn solar_elevation_sane_range() {
        // Midsummer noon in Berlin is high, midnight deeply negative.
        let noon = Utc.with_ymd_and_hms(2026, 6, 21, 11, 0, 0).unwrap().timestamp();
        let midnight = Utc.with_ymd_and_hms(2026, 6, 21, 23, 0, 0).unwrap().timestamp();
        let high = solar_elevation(noon, 52.52, 13.405);
        let low = solar_elevation(midnight, 52.52, 13.405);
        assert!(high > 50.0, "noon elevation {}", high);
        assert!(low < 0.0, "midnight elevation {}", low);
    }

    #[test]
    fn local_conversion_uses_timezone() {
        // 2026-01-15 18:00 UTC is 19:00 in Berlin (CET)
        let ts = Utc.with_ymd_and_hms(2026, 1, 15, 18, 0, 0).unwrap().timestamp();
        assert_eq!(local_hour(ts, "Europe/Berlin"), 19);
        assert_eq!(local_hour(ts, "not-a-timezone"), 18);
    }
}
