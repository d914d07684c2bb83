//! Date handling for observation periods.
//!
//! Observation dates are derived from a fixed month-length table rather than
//! computed calendars: February is always day 28, matching the upstream data
//! files, which never carry a leap-day period.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ZonalError, ZonalResult};

/// Fixed month-length table. February is 28 in every year.
pub const MONTH_LENGTHS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Granularity of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalResolution {
    Annual,
    Seasonal,
    Monthly,
}

impl TemporalResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemporalResolution::Annual => "annual",
            TemporalResolution::Seasonal => "seasonal",
            TemporalResolution::Monthly => "monthly",
        }
    }
}

impl fmt::Display for TemporalResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemporalResolution {
    type Err = ZonalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "annual" => Ok(TemporalResolution::Annual),
            "seasonal" => Ok(TemporalResolution::Seasonal),
            "monthly" => Ok(TemporalResolution::Monthly),
            other => Err(ZonalError::InvalidParameter {
                param: "temporal_resolution".to_string(),
                message: format!("expected annual, seasonal or monthly, got '{}'", other),
            }),
        }
    }
}

/// An inclusive start / exclusive end date pair covering one month.
///
/// The end is always the first day of the following month. Callers that need
/// the month-end *marker* date (used for observation dates) should use
/// [`month_end_date`] instead; the two are deliberately separate so that no
/// call site has to roll dates itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end_exclusive: NaiveDate,
}

impl DateSpan {
    /// Render as `(YYYY-MM-DD, YYYY-MM-DD)` strings for remote date filters.
    pub fn as_strings(&self) -> (String, String) {
        (
            self.start.format("%Y-%m-%d").to_string(),
            self.end_exclusive.format("%Y-%m-%d").to_string(),
        )
    }
}

/// Last day of the given month, from the static table.
pub fn month_last_day(month: u32) -> ZonalResult<u32> {
    if !(1..=12).contains(&month) {
        return Err(ZonalError::InvalidDate(format!("month out of range: {}", month)));
    }
    Ok(MONTH_LENGTHS[(month - 1) as usize])
}

/// Month-end marker date, e.g. (2017, 6) -> 2017-06-30.
pub fn month_end_date(year: i32, month: u32) -> ZonalResult<NaiveDate> {
    let day = month_last_day(month)?;
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| ZonalError::InvalidDate(format!("{}-{:02}-{:02}", year, month, day)))
}

/// Inclusive-start / exclusive-end span for one month.
pub fn month_span(year: i32, month: u32) -> ZonalResult<DateSpan> {
    if !(1..=12).contains(&month) {
        return Err(ZonalError::InvalidDate(format!("month out of range: {}", month)));
    }
    let start = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ZonalError::InvalidDate(format!("{}-{:02}-01", year, month)))?;
    let (end_year, end_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let end_exclusive = NaiveDate::from_ymd_opt(end_year, end_month, 1)
        .ok_or_else(|| ZonalError::InvalidDate(format!("{}-{:02}-01", end_year, end_month)))?;
    Ok(DateSpan { start, end_exclusive })
}

/// Parse a sub-period key into a month number.
///
/// Monthly keys come in three spellings in the data files: `m06`, `06`, `6`.
pub fn parse_subperiod_month(key: &str) -> ZonalResult<u32> {
    let digits = key.strip_prefix('m').unwrap_or(key);
    let month: u32 = digits.parse().map_err(|_| {
        ZonalError::InvalidDate(format!("unparseable sub-period '{}'", key))
    })?;
    if !(1..=12).contains(&month) {
        return Err(ZonalError::InvalidDate(format!("month out of range: {}", month)));
    }
    Ok(month)
}

/// Observation date for one (year, temporal resolution, sub-period) cell.
///
/// Annual observations are dated to the December month-end, seasonal to the
/// October month-end, monthly to the end of the named month.
pub fn date_for_subperiod(
    year: i32,
    resolution: TemporalResolution,
    subperiod: &str,
) -> ZonalResult<NaiveDate> {
    let month = match resolution {
        TemporalResolution::Annual => 12,
        TemporalResolution::Seasonal => 10,
        TemporalResolution::Monthly => parse_subperiod_month(subperiod)?,
    };
    month_end_date(year, month)
}

/// Target date list for a query.
///
/// `months` is only consulted for monthly resolution; `None` means all twelve.
pub fn dates_for_query(
    year: i32,
    resolution: TemporalResolution,
    months: Option<&[u32]>,
) -> ZonalResult<Vec<NaiveDate>> {
    match resolution {
        TemporalResolution::Annual => Ok(vec![month_end_date(year, 12)?]),
        TemporalResolution::Seasonal => Ok(vec![month_end_date(year, 10)?]),
        TemporalResolution::Monthly => {
            let all: Vec<u32> = (1..=12).collect();
            let selected = months.unwrap_or(&all);
            selected.iter().map(|&m| month_end_date(year, m)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_table_is_static() {
        // February stays 28 even in leap years.
        assert_eq!(month_last_day(2).unwrap(), 28);
        assert_eq!(month_end_date(2016, 2).unwrap().to_string(), "2016-02-28");
        assert_eq!(month_end_date(2017, 6).unwrap().to_string(), "2017-06-30");
    }

    #[test]
    fn test_month_out_of_range() {
        assert!(month_last_day(0).is_err());
        assert!(month_last_day(13).is_err());
    }

    #[test]
    fn test_month_span_end_is_exclusive() {
        let span = month_span(2017, 6).unwrap();
        assert_eq!(span.start.to_string(), "2017-06-01");
        assert_eq!(span.end_exclusive.to_string(), "2017-07-01");

        let december = month_span(2017, 12).unwrap();
        assert_eq!(december.end_exclusive.to_string(), "2018-01-01");
    }

    #[test]
    fn test_span_strings() {
        let (start, end) = month_span(2017, 1).unwrap().as_strings();
        assert_eq!(start, "2017-01-01");
        assert_eq!(end, "2017-02-01");
    }

    #[test]
    fn test_parse_subperiod_month() {
        assert_eq!(parse_subperiod_month("m06").unwrap(), 6);
        assert_eq!(parse_subperiod_month("06").unwrap(), 6);
        assert_eq!(parse_subperiod_month("6").unwrap(), 6);
        assert!(parse_subperiod_month("m13").is_err());
        assert!(parse_subperiod_month("spring").is_err());
    }

    #[test]
    fn test_date_for_subperiod() {
        let annual = date_for_subperiod(2017, TemporalResolution::Annual, "annual").unwrap();
        assert_eq!(annual.to_string(), "2017-12-31");

        let seasonal = date_for_subperiod(2017, TemporalResolution::Seasonal, "seasonal").unwrap();
        assert_eq!(seasonal.to_string(), "2017-10-31");

        let monthly = date_for_subperiod(2017, TemporalResolution::Monthly, "m06").unwrap();
        assert_eq!(monthly.to_string(), "2017-06-30");
    }

    #[test]
    fn test_dates_for_query_monthly_defaults_to_all() {
        let dates = dates_for_query(2017, TemporalResolution::Monthly, None).unwrap();
        assert_eq!(dates.len(), 12);
        assert_eq!(dates[1].to_string(), "2017-02-28");

        let june = dates_for_query(2017, TemporalResolution::Monthly, Some(&[6])).unwrap();
        assert_eq!(june, vec![month_end_date(2017, 6).unwrap()]);
    }

    #[test]
    fn test_temporal_resolution_parse() {
        assert_eq!(
            "monthly".parse::<TemporalResolution>().unwrap(),
            TemporalResolution::Monthly
        );
        assert!("weekly".parse::<TemporalResolution>().is_err());
    }
}
