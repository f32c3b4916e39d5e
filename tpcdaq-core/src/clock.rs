//! UTC calendar arithmetic.
//!
//! The DAQ clocks count from calendar dates (the UBDAQ global header from
//! 2012-01-01, the PDS GPS receiver from the start of a year). These helpers
//! turn calendar fields into unix seconds without consulting the process
//! time zone.

/// Days from 1970-01-01 to the given proleptic Gregorian date.
pub const fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let m = month as i64;
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Unix seconds of a UTC calendar time.
pub const fn utc_seconds(year: i64, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> i64 {
    days_from_civil(year, month, day) * 86_400 + hour as i64 * 3_600 + min as i64 * 60 + sec as i64
}

/// Unix time of the UBDAQ clock origin, 2012-01-01T00:00:00Z.
pub const DAQ_EPOCH_UNIX_SECONDS: i64 = utc_seconds(2012, 1, 1, 0, 0, 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_epoch() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(utc_seconds(1970, 1, 1, 0, 0, 1), 1);
    }

    #[test]
    fn test_daq_epoch() {
        assert_eq!(DAQ_EPOCH_UNIX_SECONDS, 1_325_376_000);
    }

    #[test]
    fn test_leap_years() {
        assert_eq!(days_from_civil(2000, 3, 1) - days_from_civil(2000, 2, 28), 2);
        assert_eq!(days_from_civil(1900, 3, 1) - days_from_civil(1900, 2, 28), 1);
        assert_eq!(utc_seconds(2014, 6, 15, 12, 30, 5), 1_402_835_405);
    }

    #[test]
    fn test_before_epoch() {
        assert_eq!(days_from_civil(1969, 12, 31), -1);
    }
}
