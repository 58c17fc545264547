//! Aggregation periods: decade codes, month-of-year and time offsets.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// Inclusive span of calendar years, e.g. 1991..=2010.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> CommonResult<Self> {
        if end < start {
            return Err(CommonError::InvalidYearRange(format!("{start}-{end}")));
        }
        Ok(Self { start, end })
    }

    /// Parse a six digit decade code such as `199110` (1991 to 2010).
    ///
    /// The end year takes the century of the start year; when that places it
    /// before the start year it rolls into the next century.
    pub fn from_decade_code(code: &str) -> CommonResult<Self> {
        let code = code.trim();
        if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CommonError::InvalidYearRange(code.to_string()));
        }

        let start: i32 = code[..4]
            .parse()
            .map_err(|_| CommonError::InvalidYearRange(code.to_string()))?;
        let end_digits: i32 = code[4..]
            .parse()
            .map_err(|_| CommonError::InvalidYearRange(code.to_string()))?;

        let mut end = (start / 100) * 100 + end_digits;
        if end < start {
            end += 100;
        }

        Ok(Self { start, end })
    }

    /// Six digit code for this range.
    pub fn decade_code(&self) -> String {
        format!("{:04}{:02}", self.start, self.end.rem_euclid(100))
    }

    /// Number of years, inclusive of both ends.
    pub fn num_years(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    /// Years after the first one, i.e. the replication targets.
    pub fn following_years(&self) -> impl Iterator<Item = i32> {
        (self.start + 1)..=self.end
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.start..=self.end).contains(&year)
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Month encoded in a file name such as `PPT04_196190.nc` (prefix `PPT`).
///
/// The month is the text between the prefix and the first underscore.
pub fn month_from_filename(path: impl AsRef<Path>, prefix: &str) -> CommonResult<u32> {
    let name = path
        .as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let invalid = || CommonError::InvalidMonth {
        name: name.clone(),
        prefix: prefix.to_string(),
    };

    let head = name.split('_').next().unwrap_or_default();
    let month: u32 = head
        .strip_prefix(prefix)
        .ok_or_else(invalid)?
        .parse()
        .map_err(|_| invalid())?;

    if !(1..=12).contains(&month) {
        return Err(invalid());
    }
    Ok(month)
}

/// Index of `month` of `year` in a monthly series starting in January of `data_start`.
pub fn target_time_index(month: u32, year: i32, data_start: i32) -> CommonResult<usize> {
    if year < data_start {
        return Err(CommonError::YearBeforeDataStart { year, data_start });
    }
    if !(1..=12).contains(&month) {
        return Err(CommonError::InvalidDate {
            year,
            month,
            day: 1,
        });
    }
    Ok((month as usize - 1) + (year - data_start) as usize * 12)
}
