// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Fee and threshold arithmetic.
//!
//! All functions are pure. Amounts are [`Decimal`]; fees are rounded to the
//! currency's minor unit with midpoint-away-from-zero rounding.

use crate::base::Currency;
use crate::config::DebtThreshold;
use crate::error::LedgerError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Computes the platform commission owed on a completed trip.
///
/// # Errors
///
/// [`LedgerError::InvalidRate`] if `rate` is outside `[0, 1]` or `fare` is
/// negative.
///
/// # Example
///
/// ```
/// use commission_ledger::{Currency, money::compute_fee};
/// use rust_decimal_macros::dec;
///
/// let fee = compute_fee(dec!(420.00), dec!(0.06), Currency::Zar).unwrap();
/// assert_eq!(fee, dec!(25.20));
/// ```
pub fn compute_fee(fare: Decimal, rate: Decimal, currency: Currency) -> Result<Decimal, LedgerError> {
    if fare < Decimal::ZERO || rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(LedgerError::InvalidRate);
    }
    let fee = fare.checked_mul(rate).ok_or(LedgerError::InvalidAmount)?;
    Ok(round_to_minor_unit(fee, currency))
}

pub fn round_to_minor_unit(amount: Decimal, currency: Currency) -> Decimal {
    amount.round_dp_with_strategy(currency.minor_units(), RoundingStrategy::MidpointAwayFromZero)
}

/// Returns `debt <= limit`.
pub fn is_within_threshold(debt: Decimal, limit: Decimal) -> bool {
    debt <= limit
}

/// Fraction of the limit already consumed.
///
/// # Errors
///
/// [`LedgerError::ThresholdMisconfigured`] if `limit <= 0`.
///
/// A ratio too large to represent saturates at [`Decimal::MAX`].
pub fn warning_ratio(debt: Decimal, limit: Decimal) -> Result<Decimal, LedgerError> {
    if limit <= Decimal::ZERO {
        return Err(LedgerError::ThresholdMisconfigured);
    }
    Ok(debt.checked_div(limit).unwrap_or(Decimal::MAX))
}

/// Coarse debt classification shown alongside the driver's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebtLevel {
    Ok,
    Warning,
    Blocked,
}

/// Classifies `debt` against a threshold.
///
/// A misconfigured threshold classifies as [`DebtLevel::Blocked`].
pub fn debt_level(debt: Decimal, threshold: &DebtThreshold) -> DebtLevel {
    let Ok(ratio) = warning_ratio(debt, threshold.limit) else {
        return DebtLevel::Blocked;
    };
    if !is_within_threshold(debt, threshold.limit) {
        DebtLevel::Blocked
    } else if ratio >= threshold.warning_ratio {
        DebtLevel::Warning
    } else {
        DebtLevel::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fee_for_reference_trip() {
        assert_eq!(
            compute_fee(dec!(420.00), dec!(0.06), Currency::Zar),
            Ok(dec!(25.20))
        );
    }

    #[test]
    fn fee_rate_bounds() {
        assert_eq!(compute_fee(dec!(99.99), Decimal::ZERO, Currency::Zar), Ok(dec!(0)));
        assert_eq!(compute_fee(dec!(99.99), Decimal::ONE, Currency::Zar), Ok(dec!(99.99)));
    }

    #[test]
    fn fee_rejects_out_of_range_inputs() {
        assert_eq!(
            compute_fee(dec!(100), dec!(1.01), Currency::Zar),
            Err(LedgerError::InvalidRate)
        );
        assert_eq!(
            compute_fee(dec!(100), dec!(-0.01), Currency::Zar),
            Err(LedgerError::InvalidRate)
        );
        assert_eq!(
            compute_fee(dec!(-1), dec!(0.06), Currency::Zar),
            Err(LedgerError::InvalidRate)
        );
    }

    #[test]
    fn fee_rounds_to_minor_unit() {
        // 33.33 * 0.06 = 1.9998
        assert_eq!(compute_fee(dec!(33.33), dec!(0.06), Currency::Zar), Ok(dec!(2.00)));
        // 0.25 * 0.5 = 0.125, midpoint rounds away from zero
        assert_eq!(compute_fee(dec!(0.25), dec!(0.5), Currency::Kes), Ok(dec!(0.13)));
        // UGX has no minor unit
        assert_eq!(compute_fee(dec!(12345), dec!(0.06), Currency::Ugx), Ok(dec!(741)));
    }

    #[test]
    fn threshold_is_inclusive() {
        assert!(is_within_threshold(dec!(50.00), dec!(50.00)));
        assert!(!is_within_threshold(dec!(50.01), dec!(50.00)));
    }

    #[test]
    fn warning_ratio_requires_positive_limit() {
        assert_eq!(warning_ratio(dec!(40), dec!(50)), Ok(dec!(0.8)));
        assert_eq!(
            warning_ratio(dec!(40), Decimal::ZERO),
            Err(LedgerError::ThresholdMisconfigured)
        );
        assert_eq!(
            warning_ratio(dec!(0), dec!(-5)),
            Err(LedgerError::ThresholdMisconfigured)
        );
    }

    #[test]
    fn warning_ratio_saturates_instead_of_overflowing() {
        assert_eq!(warning_ratio(Decimal::MAX, dec!(0.0001)), Ok(Decimal::MAX));
        assert_eq!(
            debt_level(Decimal::MAX, &DebtThreshold::new(dec!(0.0001))),
            DebtLevel::Blocked
        );
    }

    #[test]
    fn debt_levels() {
        let threshold = DebtThreshold::new(dec!(50));
        assert_eq!(debt_level(dec!(10), &threshold), DebtLevel::Ok);
        assert_eq!(debt_level(dec!(40), &threshold), DebtLevel::Warning);
        assert_eq!(debt_level(dec!(50), &threshold), DebtLevel::Warning);
        assert_eq!(debt_level(dec!(50.01), &threshold), DebtLevel::Blocked);
        assert_eq!(
            debt_level(Decimal::ZERO, &DebtThreshold::new(Decimal::ZERO)),
            DebtLevel::Blocked
        );
    }
}
