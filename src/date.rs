use chrono::{NaiveDate, NaiveDateTime, Timelike};

use crate::error::{Error, Result};

/// Parse a cycle date given as `YYYYMMDDHH`.
pub fn parse_cycle_date(s: &str) -> Result<NaiveDateTime> {
    let trimmed = s.trim();
    if trimmed.len() != 10 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidRequest(format!(
            "cycle date must be YYYYMMDDHH, got {trimmed}"
        )));
    }

    let invalid = || Error::InvalidRequest(format!("invalid cycle date: {trimmed}"));
    let year: i32 = trimmed[0..4].parse().map_err(|_| invalid())?;
    let month: u32 = trimmed[4..6].parse().map_err(|_| invalid())?;
    let day: u32 = trimmed[6..8].parse().map_err(|_| invalid())?;
    let hour: u32 = trimmed[8..10].parse().map_err(|_| invalid())?;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .ok_or_else(invalid)
}

pub fn yyyymmddhh(date: &NaiveDateTime) -> String {
    date.format("%Y%m%d%H").to_string()
}

/// Label of the 6-hour bin containing the cycle hour, e.g. `12-17` for 13Z.
pub fn bin6(date: &NaiveDateTime) -> String {
    let low = date.hour() / 6 * 6;
    format!("{low:02}-{:02}", low + 5)
}

/// Largest even hour not after the cycle hour, zero padded.
pub fn hh_even(date: &NaiveDateTime) -> String {
    format!("{:02}", date.hour() / 2 * 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_hour(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 6, 25)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn parses_cycle_dates() {
        let d = parse_cycle_date("2022062512").unwrap();
        assert_eq!(d, at_hour(12));
        assert_eq!(yyyymmddhh(&d), "2022062512");
    }

    #[test]
    fn rejects_malformed_cycle_dates() {
        assert!(parse_cycle_date("20220625").is_err());
        assert!(parse_cycle_date("2022062524").is_err());
        assert!(parse_cycle_date("2022023012").is_err());
        assert!(parse_cycle_date("2022-06-25").is_err());
    }

    #[test]
    fn bin6_covers_every_hour() {
        for h in 0..24 {
            let low = h / 6 * 6;
            assert_eq!(bin6(&at_hour(h)), format!("{:02}-{:02}", low, low + 5));
        }
        assert_eq!(bin6(&at_hour(13)), "12-17");
        assert_eq!(bin6(&at_hour(0)), "00-05");
        assert_eq!(bin6(&at_hour(23)), "18-23");
    }

    #[test]
    fn hh_even_rounds_down() {
        assert_eq!(hh_even(&at_hour(0)), "00");
        assert_eq!(hh_even(&at_hour(9)), "08");
        assert_eq!(hh_even(&at_hour(12)), "12");
        assert_eq!(hh_even(&at_hour(23)), "22");
    }
}
