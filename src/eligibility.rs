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

//! Eligibility evaluation.
//!
//! [`evaluate`] is the single gating decision for whether a driver may see
//! new trip bids. Identity verification always dominates: an unverified
//! driver is gated even with zero debt. Only then is debt compared against
//! the regional ceiling, and a driver is blocked strictly when debt exceeds
//! it.

use crate::account::VerificationStatus;
use crate::config::DebtThreshold;
use crate::money::{DebtLevel, debt_level, is_within_threshold, warning_ratio};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Ok,
    KycPending,
    KycRejected,
    DebtBlocked,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::Ok => "OK",
            ReasonCode::KycPending => "KYC_PENDING",
            ReasonCode::KycRejected => "KYC_REJECTED",
            ReasonCode::DebtBlocked => "DEBT_BLOCKED",
        }
    }
}

/// Outcome of one evaluation. Derived on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityDecision {
    pub can_work: bool,
    pub reason_code: ReasonCode,
    /// `debt / limit`; `None` when the threshold is misconfigured.
    pub debt_ratio: Option<Decimal>,
    pub debt_level: DebtLevel,
}

/// Decides whether a driver may work.
///
/// Priority:
/// 1. status not [`Verified`](VerificationStatus::Verified) ⇒ `KYC_PENDING` / `KYC_REJECTED`
/// 2. limit ≤ 0 ⇒ `DEBT_BLOCKED` (fail safe)
/// 3. debt > limit ⇒ `DEBT_BLOCKED`
/// 4. otherwise `OK`
///
/// # Example
///
/// ```
/// use commission_ledger::{DebtThreshold, ReasonCode, VerificationStatus, evaluate};
/// use rust_decimal_macros::dec;
///
/// let threshold = DebtThreshold::new(dec!(50.00));
/// let decision = evaluate(dec!(55.00), &threshold, VerificationStatus::Verified);
/// assert!(!decision.can_work);
/// assert_eq!(decision.reason_code, ReasonCode::DebtBlocked);
/// ```
pub fn evaluate(
    debt: Decimal,
    threshold: &DebtThreshold,
    status: VerificationStatus,
) -> EligibilityDecision {
    let debt_ratio = warning_ratio(debt, threshold.limit).ok();
    let level = debt_level(debt, threshold);
    let blocked = |reason_code| EligibilityDecision {
        can_work: false,
        reason_code,
        debt_ratio,
        debt_level: level,
    };

    match status {
        VerificationStatus::NotStarted | VerificationStatus::Pending => {
            return blocked(ReasonCode::KycPending);
        }
        VerificationStatus::Rejected => return blocked(ReasonCode::KycRejected),
        VerificationStatus::Verified => {}
    }

    if debt_ratio.is_none() {
        tracing::warn!(limit = %threshold.limit, "debt threshold misconfigured; failing safe to blocked");
        return blocked(ReasonCode::DebtBlocked);
    }
    if !is_within_threshold(debt, threshold.limit) {
        return blocked(ReasonCode::DebtBlocked);
    }

    EligibilityDecision {
        can_work: true,
        reason_code: ReasonCode::Ok,
        debt_ratio,
        debt_level: level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limit(value: Decimal) -> DebtThreshold {
        DebtThreshold::new(value)
    }

    #[test]
    fn debt_over_limit_blocks_verified_driver() {
        let decision = evaluate(dec!(55.00), &limit(dec!(50.00)), VerificationStatus::Verified);
        assert!(!decision.can_work);
        assert_eq!(decision.reason_code, ReasonCode::DebtBlocked);
        assert_eq!(decision.debt_ratio, Some(dec!(1.1)));
        assert_eq!(decision.debt_level, DebtLevel::Blocked);
    }

    #[test]
    fn cleared_debt_allows_work() {
        let decision = evaluate(dec!(0.00), &limit(dec!(50.00)), VerificationStatus::Verified);
        assert!(decision.can_work);
        assert_eq!(decision.reason_code, ReasonCode::Ok);
        assert_eq!(decision.debt_level, DebtLevel::Ok);
    }

    #[test]
    fn debt_at_limit_is_allowed() {
        let decision = evaluate(dec!(50.00), &limit(dec!(50.00)), VerificationStatus::Verified);
        assert!(decision.can_work);
        assert_eq!(decision.debt_level, DebtLevel::Warning);
    }

    #[test]
    fn identity_gate_wins_at_zero_debt() {
        let decision = evaluate(Decimal::ZERO, &limit(dec!(50.00)), VerificationStatus::NotStarted);
        assert!(!decision.can_work);
        assert_eq!(decision.reason_code, ReasonCode::KycPending);
    }

    #[test]
    fn identity_gate_wins_over_debt() {
        let pending = evaluate(dec!(500), &limit(dec!(50)), VerificationStatus::Pending);
        assert_eq!(pending.reason_code, ReasonCode::KycPending);
        let rejected = evaluate(dec!(500), &limit(dec!(50)), VerificationStatus::Rejected);
        assert_eq!(rejected.reason_code, ReasonCode::KycRejected);
    }

    #[test]
    fn misconfigured_threshold_fails_safe() {
        let decision = evaluate(Decimal::ZERO, &limit(Decimal::ZERO), VerificationStatus::Verified);
        assert!(!decision.can_work);
        assert_eq!(decision.reason_code, ReasonCode::DebtBlocked);
        assert_eq!(decision.debt_ratio, None);
    }
}
