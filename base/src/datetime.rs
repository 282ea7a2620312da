use chrono::{DateTime, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Start of the current UTC day (daily quota window boundary).
pub fn start_of_utc_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_of_utc_day() {
        let at = DateTime::parse_from_rfc3339("2024-06-01T13:45:10Z")
            .unwrap()
            .with_timezone(&Utc);
        let start = start_of_utc_day(at);
        assert_eq!(start.to_rfc3339(), "2024-06-01T00:00:00+00:00");
    }
}
