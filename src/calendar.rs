use crate::error::{CostPipelineError, Result};
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Three-letter lowercase month tokens as they appear in billing exports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Month {
    Jan,
    Feb,
    Mar,
    Apr,
    May,
    Jun,
    Jul,
    Aug,
    Sep,
    Oct,
    Nov,
    Dec,
}

impl Month {
    pub const ALL: [Month; 12] = [
        Month::Jan,
        Month::Feb,
        Month::Mar,
        Month::Apr,
        Month::May,
        Month::Jun,
        Month::Jul,
        Month::Aug,
        Month::Sep,
        Month::Oct,
        Month::Nov,
        Month::Dec,
    ];

    /// 1-based calendar number (Jan = 1).
    pub fn number(self) -> u32 {
        self as u32 + 1
    }

    pub fn from_number(number: u32) -> Option<Month> {
        if (1..=12).contains(&number) {
            Some(Self::ALL[(number - 1) as usize])
        } else {
            None
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Month::Jan => "jan",
            Month::Feb => "feb",
            Month::Mar => "mar",
            Month::Apr => "apr",
            Month::May => "may",
            Month::Jun => "jun",
            Month::Jul => "jul",
            Month::Aug => "aug",
            Month::Sep => "sep",
            Month::Oct => "oct",
            Month::Nov => "nov",
            Month::Dec => "dec",
        }
    }
}

impl FromStr for Month {
    type Err = CostPipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.token() == s)
            .ok_or_else(|| CostPipelineError::InvalidMonth(s.to_string()))
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A (year, month) billing period. Orders chronologically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct BillingPeriod {
    pub year: i32,
    pub month: Month,
}

impl BillingPeriod {
    pub fn new(year: i32, month: Month) -> Self {
        Self { year, month }
    }

    /// Resolves a raw (year, token) pair as stored on a billing record.
    pub fn parse(year: i32, month_token: &str) -> Result<Self> {
        Ok(Self::new(year, month_token.parse()?))
    }

    /// First calendar day of the period; rule windows are compared against this date.
    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month.number(), 1)
    }

    pub fn next(&self) -> Result<Self> {
        self.add_months(1)
    }

    pub fn prev(&self) -> Result<Self> {
        self.add_months(-1)
    }

    /// Shifts by a signed number of months, rolling the year over in both
    /// directions. `None` if the result does not fit in an `i32` year.
    pub fn checked_add_months(&self, delta: i32) -> Option<Self> {
        let absolute = self
            .year
            .checked_mul(12)?
            .checked_add(self.month as i32)?
            .checked_add(delta)?;
        let month_idx = absolute.rem_euclid(12) as usize;
        Some(Self::new(absolute.div_euclid(12), Month::ALL[month_idx]))
    }

    pub fn add_months(&self, delta: i32) -> Result<Self> {
        self.checked_add_months(delta).ok_or_else(|| {
            CostPipelineError::PeriodOutOfRange(format!("{} shifted by {} months", self, delta))
        })
    }

    /// The `count` periods strictly before this one, most recent first.
    pub fn trailing(&self, count: u32) -> Result<Vec<BillingPeriod>> {
        let count = i32::try_from(count).map_err(|_| {
            CostPipelineError::PeriodOutOfRange(format!("{} trailing months before {}", count, self))
        })?;
        (1..=count).map(|i| self.add_months(-i)).collect()
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_tokens() {
        assert_eq!("jan".parse::<Month>().unwrap(), Month::Jan);
        assert_eq!("dec".parse::<Month>().unwrap(), Month::Dec);
        assert!("Jan".parse::<Month>().is_err());
        assert!("january".parse::<Month>().is_err());
        assert_eq!(Month::Sep.number(), 9);
        assert_eq!(Month::from_number(12), Some(Month::Dec));
        assert_eq!(Month::from_number(0), None);
        assert_eq!(Month::from_number(13), None);
    }

    #[test]
    fn test_month_serde_lowercase() {
        let json = serde_json::to_string(&Month::Oct).unwrap();
        assert_eq!(json, "\"oct\"");
        let back: Month = serde_json::from_str("\"mar\"").unwrap();
        assert_eq!(back, Month::Mar);
    }

    #[test]
    fn test_next_rolls_over_year() {
        let dec = BillingPeriod::new(2024, Month::Dec);
        assert_eq!(dec.next().unwrap(), BillingPeriod::new(2025, Month::Jan));

        let jun = BillingPeriod::new(2024, Month::Jun);
        assert_eq!(jun.next().unwrap(), BillingPeriod::new(2024, Month::Jul));
    }

    #[test]
    fn test_prev_rolls_back_year() {
        let jan = BillingPeriod::new(2025, Month::Jan);
        assert_eq!(jan.prev().unwrap(), BillingPeriod::new(2024, Month::Dec));
    }

    #[test]
    fn test_trailing_wraps_year_boundary() {
        let feb = BillingPeriod::new(2025, Month::Feb);
        let trailing = feb.trailing(6).unwrap();
        assert_eq!(
            trailing,
            vec![
                BillingPeriod::new(2025, Month::Jan),
                BillingPeriod::new(2024, Month::Dec),
                BillingPeriod::new(2024, Month::Nov),
                BillingPeriod::new(2024, Month::Oct),
                BillingPeriod::new(2024, Month::Sep),
                BillingPeriod::new(2024, Month::Aug),
            ]
        );
    }

    #[test]
    fn test_add_months_large_offsets() {
        let p = BillingPeriod::new(2023, Month::Nov);
        assert_eq!(p.add_months(14).unwrap(), BillingPeriod::new(2025, Month::Jan));
        assert_eq!(p.add_months(-23).unwrap(), BillingPeriod::new(2021, Month::Dec));
    }

    #[test]
    fn test_shift_past_year_range_is_an_error() {
        let far = BillingPeriod::new(i32::MAX, Month::Jan);
        assert_eq!(far.checked_add_months(-1), None);
        assert!(matches!(
            far.prev(),
            Err(CostPipelineError::PeriodOutOfRange(_))
        ));
        assert!(far.trailing(6).is_err());

        let early = BillingPeriod::new(i32::MIN / 12, Month::Jan);
        assert!(early.add_months(i32::MIN).is_err());
    }

    #[test]
    fn test_trailing_count_beyond_i32_is_an_error() {
        let feb = BillingPeriod::new(2025, Month::Feb);
        assert!(matches!(
            feb.trailing(3_000_000_000),
            Err(CostPipelineError::PeriodOutOfRange(_))
        ));
        assert!(feb.trailing(0).unwrap().is_empty());
    }

    #[test]
    fn test_first_day_and_ordering() {
        let p = BillingPeriod::parse(2024, "feb").unwrap();
        assert_eq!(p.first_day(), NaiveDate::from_ymd_opt(2024, 2, 1));
        assert!(BillingPeriod::new(2023, Month::Dec) < BillingPeriod::new(2024, Month::Jan));
        assert!(BillingPeriod::new(2024, Month::Jan) < BillingPeriod::new(2024, Month::Feb));
        assert!(BillingPeriod::parse(2024, "xyz").is_err());
    }
}
