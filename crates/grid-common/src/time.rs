//! Time axis construction for gridded climate datasets.
//!
//! Time coordinates are whole days since a fixed epoch (1900-01-01 by
//! default). Each axis entry carries the period midpoint together with the
//! first and last day of the period, matching the CF `time`/`time_bnds` pair.

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// Month lengths of a 365-day calendar.
pub const NOLEAP_MONTH_DAYS: [usize; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Temporal granularity of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Monthly,
    Yearly,
}

impl Cadence {
    /// Number of time steps separating the same period in consecutive years.
    ///
    /// Daily data has no fixed annual stride.
    pub fn annual_stride(&self) -> Option<usize> {
        match self {
            Cadence::Daily => None,
            Cadence::Monthly => Some(12),
            Cadence::Yearly => Some(1),
        }
    }

    /// Directory name used for datasets of this cadence.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Cadence::Daily => "Daily",
            Cadence::Monthly => "Monthly",
            Cadence::Yearly => "Yearly",
        }
    }

    /// Short suffix used in resource keys, e.g. `ECLIPS2_Mnth`.
    pub fn abbrev(&self) -> &'static str {
        match self {
            Cadence::Daily => "Day",
            Cadence::Monthly => "Mnth",
            Cadence::Yearly => "Year",
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Time coordinate triple: midpoint, period start and period end.
///
/// All three vectors have the same length and are never mutated after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAxis {
    values: Vec<i64>,
    starts: Vec<i64>,
    ends: Vec<i64>,
}

impl TimeAxis {
    /// Midpoints, in days since the epoch.
    pub fn values(&self) -> &[i64] {
        &self.values
    }

    /// First day of each period.
    pub fn starts(&self) -> &[i64] {
        &self.starts
    }

    /// Last day of each period.
    pub fn ends(&self) -> &[i64] {
        &self.ends
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(midpoint, start, end)` of entry `index`.
    pub fn get(&self, index: usize) -> Option<(i64, i64, i64)> {
        Some((
            *self.values.get(index)?,
            *self.starts.get(index)?,
            *self.ends.get(index)?,
        ))
    }

    /// Bounds flattened as `[start0, end0, start1, end1, ...]` for a `(time, bnds)` variable.
    pub fn flat_bounds(&self) -> Vec<f64> {
        self.starts
            .iter()
            .zip(&self.ends)
            .flat_map(|(&s, &e)| [s as f64, e as f64])
            .collect()
    }

    /// Number of days covered by entry `index`.
    pub fn period_days(&self, index: usize) -> Option<i64> {
        Some(self.ends.get(index)? - self.starts.get(index)? + 1)
    }
}

/// Builds daily, monthly and yearly time axes relative to an epoch.
#[derive(Debug, Clone, Copy)]
pub struct TimeAxisBuilder {
    epoch: NaiveDate,
}

impl Default for TimeAxisBuilder {
    fn default() -> Self {
        Self {
            epoch: NaiveDate::from_ymd_opt(1900, 1, 1).expect("1900-01-01 is a valid date"),
        }
    }
}

impl TimeAxisBuilder {
    pub fn new(epoch: NaiveDate) -> Self {
        Self { epoch }
    }

    pub fn epoch(&self) -> NaiveDate {
        self.epoch
    }

    /// CF units string for axes produced by this builder.
    pub fn units(&self) -> String {
        format!("days since {}", self.epoch.format("%Y-%m-%d"))
    }

    /// Days between the epoch and the given proleptic Gregorian date.
    pub fn days_since_epoch(&self, year: i32, month: u32, day: u32) -> CommonResult<i64> {
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or(CommonError::InvalidDate { year, month, day })?;
        Ok((date - self.epoch).num_days())
    }

    /// Monthly axis of `num_months` entries starting in January of `start_year`.
    pub fn build_monthly(&self, start_year: i32, num_months: usize) -> CommonResult<TimeAxis> {
        // one boundary past the last month closes the final period
        let boundaries = (0..=num_months)
            .map(|k| {
                let year = start_year + (k / 12) as i32;
                let month = (k % 12) as u32 + 1;
                self.days_since_epoch(year, month, 1)
            })
            .collect::<CommonResult<Vec<_>>>()?;

        Ok(Self::from_boundaries(&boundaries))
    }

    /// Yearly axis of `num_years` entries starting at `start_year`.
    pub fn build_yearly(&self, start_year: i32, num_years: usize) -> CommonResult<TimeAxis> {
        let boundaries = (0..=num_years)
            .map(|k| self.days_since_epoch(start_year + k as i32, 1, 1))
            .collect::<CommonResult<Vec<_>>>()?;

        Ok(Self::from_boundaries(&boundaries))
    }

    /// Daily axis covering `first_day..=last_day` (days since the epoch).
    pub fn build_daily(&self, first_day: i64, last_day: i64) -> TimeAxis {
        let values: Vec<i64> = (first_day..=last_day).collect();
        TimeAxis {
            starts: values.clone(),
            ends: values.clone(),
            values,
        }
    }

    /// Daily axis from 1 January of `start_year` to 31 December of `end_year`.
    pub fn build_daily_years(&self, start_year: i32, end_year: i32) -> CommonResult<TimeAxis> {
        let first = self.days_since_epoch(start_year, 1, 1)?;
        let last = self.days_since_epoch(end_year, 12, 31)?;
        Ok(self.build_daily(first, last))
    }

    /// Calendar year containing the given day offset.
    ///
    /// Offsets beyond the range of [`NaiveDate`] are an error.
    pub fn year_of(&self, day: i64) -> CommonResult<i32> {
        let date = if day >= 0 {
            self.epoch.checked_add_days(Days::new(day.unsigned_abs()))
        } else {
            self.epoch.checked_sub_days(Days::new(day.unsigned_abs()))
        };
        date.map(|d| d.year()).ok_or_else(|| CommonError::DayOutOfRange {
            day,
            epoch: self.epoch.to_string(),
        })
    }

    fn from_boundaries(boundaries: &[i64]) -> TimeAxis {
        let n = boundaries.len().saturating_sub(1);
        let mut values = Vec::with_capacity(n);
        let mut starts = Vec::with_capacity(n);
        let mut ends = Vec::with_capacity(n);

        for pair in boundaries.windows(2) {
            let (start, next) = (pair[0], pair[1]);
            values.push(start + (next - start) / 2);
            starts.push(start);
            ends.push(next - 1);
        }

        TimeAxis {
            values,
            starts,
            ends,
        }
    }
}

/// How daily values are folded into a monthly value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DailyReduction {
    /// Stocks such as soil organic carbon.
    Mean,
    /// Fluxes.
    Sum,
}

impl DailyReduction {
    /// Stock variables are averaged, everything else is accumulated.
    pub fn for_variable(name: &str) -> Self {
        if name.eq_ignore_ascii_case("soc") {
            DailyReduction::Mean
        } else {
            DailyReduction::Sum
        }
    }
}

/// Reduce a daily series on a 365-day calendar to `num_months` monthly values.
pub fn daily_to_monthly(
    values: &[f64],
    reduction: DailyReduction,
    num_months: usize,
) -> CommonResult<Vec<f64>> {
    let mut monthly = Vec::with_capacity(num_months);
    let mut first = 0usize;

    for month in 0..num_months {
        let last = first + NOLEAP_MONTH_DAYS[month % 12];
        let days = &values[first.min(values.len())..last.min(values.len())];

        let value = match reduction {
            DailyReduction::Sum => days.iter().sum(),
            DailyReduction::Mean => {
                if days.is_empty() {
                    return Err(CommonError::EmptyMonth { month });
                }
                days.iter().sum::<f64>() / days.len() as f64
            }
        };
        monthly.push(value);
        first = last;
    }

    Ok(monthly)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_days_since_epoch() {
        let builder = TimeAxisBuilder::default();
        assert_eq!(builder.days_since_epoch(1900, 1, 1).unwrap(), 0);
        assert_eq!(builder.days_since_epoch(1969, 1, 1).unwrap(), 25202);
        assert_eq!(builder.days_since_epoch(2017, 12, 31).unwrap(), 43098);
        assert!(builder.days_since_epoch(2001, 2, 29).is_err());
    }

    #[test]
    fn test_monthly_axis_is_contiguous() {
        let axis = TimeAxisBuilder::default().build_monthly(1961, 12).unwrap();
        assert_eq!(axis.len(), 12);

        for i in 0..11 {
            assert_eq!(axis.ends()[i], axis.starts()[i + 1] - 1);
        }
        // January 1961: 31 days, midpoint 15 days after the start
        assert_eq!(axis.period_days(0), Some(31));
        assert_eq!(axis.values()[0], axis.starts()[0] + 15);
    }

    #[test]
    fn test_monthly_axis_leap_february() {
        let axis = TimeAxisBuilder::default().build_monthly(2000, 12).unwrap();
        assert_eq!(axis.period_days(1), Some(29));

        let axis = TimeAxisBuilder::default().build_monthly(1999, 12).unwrap();
        assert_eq!(axis.period_days(1), Some(28));
    }

    #[test]
    fn test_monthly_axis_final_month_closes() {
        let axis = TimeAxisBuilder::default().build_monthly(2100, 12).unwrap();
        // December 2100 ends the day before 1 January 2101
        let builder = TimeAxisBuilder::default();
        assert_eq!(
            axis.ends()[11],
            builder.days_since_epoch(2101, 1, 1).unwrap() - 1
        );
    }

    #[test]
    fn test_yearly_axis() {
        let axis = TimeAxisBuilder::default().build_yearly(1999, 3).unwrap();
        assert_eq!(axis.len(), 3);
        assert_eq!(axis.period_days(0), Some(365));
        assert_eq!(axis.period_days(1), Some(366));
        assert_eq!(axis.ends()[0] + 1, axis.starts()[1]);
    }

    #[test]
    fn test_daily_axis() {
        let builder = TimeAxisBuilder::default();
        let axis = builder.build_daily_years(1969, 2017).unwrap();
        assert_eq!(axis.values()[0], 25202);
        assert_eq!(*axis.values().last().unwrap(), 43098);
        assert_eq!(axis.len(), 43098 - 25202 + 1);
        assert_eq!(axis.get(0), Some((25202, 25202, 25202)));
    }

    #[test]
    fn test_flat_bounds_and_units() {
        let builder = TimeAxisBuilder::default();
        let axis = builder.build_monthly(1900, 2).unwrap();
        assert_eq!(axis.flat_bounds(), vec![0.0, 30.0, 31.0, 58.0]);
        assert_eq!(builder.units(), "days since 1900-01-01");
        assert_eq!(builder.year_of(axis.starts()[1]).unwrap(), 1900);
    }

    #[test]
    fn test_year_of_out_of_range() {
        let builder = TimeAxisBuilder::default();
        assert_eq!(builder.year_of(-1).unwrap(), 1899);
        assert_eq!(builder.year_of(25202).unwrap(), 1969);
        assert!(matches!(
            builder.year_of(1_600_000_000),
            Err(CommonError::DayOutOfRange { day: 1_600_000_000, .. })
        ));
        assert!(builder.year_of(i64::MIN).is_err());
    }

    #[test]
    fn test_daily_to_monthly() {
        let daily = vec![1.0; 365];
        let sums = daily_to_monthly(&daily, DailyReduction::Sum, 12).unwrap();
        assert_eq!(sums[0], 31.0);
        assert_eq!(sums[1], 28.0);

        let means = daily_to_monthly(&daily, DailyReduction::Mean, 12).unwrap();
        assert!(means.iter().all(|&m| (m - 1.0).abs() < 1e-12));

        assert!(matches!(
            daily_to_monthly(&daily, DailyReduction::Mean, 13),
            Err(CommonError::EmptyMonth { month: 12 })
        ));
        assert_eq!(DailyReduction::for_variable("soc"), DailyReduction::Mean);
        assert_eq!(DailyReduction::for_variable("n2o"), DailyReduction::Sum);
    }

    #[test]
    fn test_cadence_stride() {
        assert_eq!(Cadence::Monthly.annual_stride(), Some(12));
        assert_eq!(Cadence::Yearly.annual_stride(), Some(1));
        assert_eq!(Cadence::Daily.annual_stride(), None);
    }
}
