//! License duration value object and expiry arithmetic.
//!
//! A duration is stored with the license at generation time, but the
//! expiry is only computed when the license is first redeemed:
//! `expiry = redemption time + duration`. Month and year offsets follow the
//! calendar (clamped to the last day of shorter months), never fixed day
//! counts.
//!
//! The display form is `"{amount} {Unit}(s)"`, e.g. `"3 Days(s)"` or
//! `"1 Month(s)"`, and parses back to the same value.

use crate::KeysmithError;
use chrono::{DateTime, Days, Months, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Calendar unit of a license duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurationUnit {
    /// Sixty seconds.
    Minute,
    /// Sixty minutes.
    Hour,
    /// One calendar day.
    Day,
    /// Seven calendar days.
    Week,
    /// One calendar month.
    Month,
    /// Twelve calendar months.
    Year,
}

impl DurationUnit {
    /// Singular unit name.
    pub fn singular(&self) -> &'static str {
        match self {
            Self::Minute => "Minute",
            Self::Hour => "Hour",
            Self::Day => "Day",
            Self::Week => "Week",
            Self::Month => "Month",
            Self::Year => "Year",
        }
    }

    /// Unit name agreeing with `amount`.
    pub fn label(&self, amount: u32) -> String {
        if amount == 1 {
            self.singular().to_string()
        } else {
            format!("{}s", self.singular())
        }
    }
}

impl FromStr for DurationUnit {
    type Err = KeysmithError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let base = lower.strip_suffix("(s)").unwrap_or(&lower);
        let base = base.strip_suffix('s').unwrap_or(base);
        match base {
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            _ => Err(KeysmithError::ValidationFailed(format!(
                "unsupported duration unit '{}'",
                s
            ))),
        }
    }
}

/// An amount of calendar time attached to a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LicenseDuration {
    amount: u32,
    unit: DurationUnit,
}

impl LicenseDuration {
    /// Create a duration; the amount must be positive.
    pub fn new(amount: u32, unit: DurationUnit) -> Result<Self, KeysmithError> {
        if amount == 0 {
            return Err(KeysmithError::ValidationFailed(
                "duration amount must be at least 1".to_string(),
            ));
        }
        Ok(Self { amount, unit })
    }

    /// Number of units.
    pub fn amount(&self) -> u32 {
        self.amount
    }

    /// The unit.
    pub fn unit(&self) -> DurationUnit {
        self.unit
    }

    /// Absolute expiry when the duration starts at `from`.
    pub fn expires_at(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, KeysmithError> {
        let amount = self.amount;
        let shifted = match self.unit {
            DurationUnit::Minute => from.checked_add_signed(TimeDelta::minutes(i64::from(amount))),
            DurationUnit::Hour => from.checked_add_signed(TimeDelta::hours(i64::from(amount))),
            DurationUnit::Day => from.checked_add_days(Days::new(u64::from(amount))),
            DurationUnit::Week => from.checked_add_days(Days::new(u64::from(amount) * 7)),
            DurationUnit::Month => from.checked_add_months(Months::new(amount)),
            DurationUnit::Year => amount
                .checked_mul(12)
                .and_then(|months| from.checked_add_months(Months::new(months))),
        };
        shifted.ok_or_else(|| {
            KeysmithError::Internal(format!("expiry out of range for duration '{}'", self))
        })
    }
}

impl fmt::Display for LicenseDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(s)", self.amount, self.unit.label(self.amount))
    }
}

impl FromStr for LicenseDuration {
    type Err = KeysmithError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(KeysmithError::ValidationFailed(format!(
                "invalid duration format '{}'",
                s
            )));
        };
        let amount: u32 = amount.parse().map_err(|_| {
            KeysmithError::ValidationFailed(format!("invalid duration amount '{}'", amount))
        })?;
        Self::new(amount, unit.parse()?)
    }
}

impl TryFrom<String> for LicenseDuration {
    type Error = KeysmithError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LicenseDuration> for String {
    fn from(value: LicenseDuration) -> Self {
        value.to_string()
    }
}

/// Expiry for `amount` `unit`s starting at `now`.
pub fn to_expiry(
    amount: u32,
    unit: DurationUnit,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, KeysmithError> {
    LicenseDuration::new(amount, unit)?.expires_at(now)
}

/// Display string for `amount` `unit`s.
pub fn format_duration(amount: u32, unit: DurationUnit) -> Result<String, KeysmithError> {
    Ok(LicenseDuration::new(amount, unit)?.to_string())
}
