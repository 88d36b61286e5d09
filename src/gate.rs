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

//! Mapping from an eligibility decision to the driver's operating mode.

use crate::account::VerificationStatus;
use crate::config::DebtThreshold;
use crate::eligibility::{EligibilityDecision, ReasonCode};
use crate::money::DebtLevel;
use rust_decimal::Decimal;
use serde::Serialize;

/// What the driver's client shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DriverMode {
    /// Identity verification screen.
    Verification { status: VerificationStatus },
    /// Settlement required before accepting trips.
    Blocked { debt: Decimal, limit: Decimal },
    /// Trip bids are shown.
    Normal { debt: Decimal, debt_level: DebtLevel },
}

impl DriverMode {
    pub fn name(&self) -> &'static str {
        match self {
            DriverMode::Verification { .. } => "verification",
            DriverMode::Blocked { .. } => "blocked",
            DriverMode::Normal { .. } => "normal",
        }
    }

    pub fn can_accept_trips(&self) -> bool {
        matches!(self, DriverMode::Normal { .. })
    }
}

pub fn select_mode(
    decision: &EligibilityDecision,
    status: VerificationStatus,
    debt: Decimal,
    threshold: &DebtThreshold,
) -> DriverMode {
    match decision.reason_code {
        ReasonCode::KycPending | ReasonCode::KycRejected => DriverMode::Verification { status },
        ReasonCode::DebtBlocked => DriverMode::Blocked {
            debt,
            limit: threshold.limit,
        },
        ReasonCode::Ok => DriverMode::Normal {
            debt,
            debt_level: decision.debt_level,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::evaluate;
    use rust_decimal_macros::dec;

    fn mode_for(debt: Decimal, status: VerificationStatus) -> DriverMode {
        let threshold = DebtThreshold::new(dec!(50));
        let decision = evaluate(debt, &threshold, status);
        select_mode(&decision, status, debt, &threshold)
    }

    #[test]
    fn unverified_driver_sees_verification() {
        assert_eq!(
            mode_for(Decimal::ZERO, VerificationStatus::Pending),
            DriverMode::Verification {
                status: VerificationStatus::Pending
            }
        );
        assert_eq!(
            mode_for(dec!(80), VerificationStatus::Rejected).name(),
            "verification"
        );
    }

    #[test]
    fn indebted_driver_is_blocked() {
        let mode = mode_for(dec!(55.00), VerificationStatus::Verified);
        assert_eq!(
            mode,
            DriverMode::Blocked {
                debt: dec!(55.00),
                limit: dec!(50)
            }
        );
        assert!(!mode.can_accept_trips());
    }

    #[test]
    fn verified_driver_within_limit_works() {
        let mode = mode_for(dec!(45), VerificationStatus::Verified);
        assert_eq!(
            mode,
            DriverMode::Normal {
                debt: dec!(45),
                debt_level: DebtLevel::Warning
            }
        );
        assert!(mode.can_accept_trips());
    }

    #[test]
    fn mode_serializes_with_tag() {
        let json = serde_json::to_value(mode_for(Decimal::ZERO, VerificationStatus::NotStarted))
            .unwrap();
        assert_eq!(json["mode"], "verification");
        assert_eq!(json["status"], "NOT_STARTED");
    }
}
