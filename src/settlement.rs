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

//! Ledger entries.
//!
//! A completed trip produces one immutable [`TripSettlement`]; a confirmed
//! payment produces one payment entry. Both are journalled by their natural
//! key so that each one mutates debt at most once:
//! - [`LedgerEntry::TripFee`] keyed by [`TripId`] (increments debt)
//! - [`LedgerEntry::Payment`] keyed by [`AttemptId`] (decrements debt)

use crate::base::{AttemptId, Currency, DriverId, TripId};
use crate::error::LedgerError;
use crate::money::compute_fee;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Commission owed for one completed trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripSettlement {
    trip_id: TripId,
    driver_id: DriverId,
    gross_fare: Decimal,
    commission_rate: Decimal,
    fee: Decimal,
    currency: Currency,
    settled_at: DateTime<Utc>,
}

impl TripSettlement {
    /// Builds a settlement, computing the fee from `gross_fare` and `commission_rate`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidRate`] for a rate outside `[0, 1]` or a negative fare.
    pub fn new(
        trip_id: TripId,
        driver_id: DriverId,
        gross_fare: Decimal,
        commission_rate: Decimal,
        currency: Currency,
        settled_at: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        let fee = compute_fee(gross_fare, commission_rate, currency)?;
        Ok(Self {
            trip_id,
            driver_id,
            gross_fare,
            commission_rate,
            fee,
            currency,
            settled_at,
        })
    }

    pub fn trip_id(&self) -> TripId {
        self.trip_id
    }

    pub fn driver_id(&self) -> DriverId {
        self.driver_id
    }

    pub fn gross_fare(&self) -> Decimal {
        self.gross_fare
    }

    pub fn commission_rate(&self) -> Decimal {
        self.commission_rate
    }

    pub fn fee(&self) -> Decimal {
        self.fee
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn settled_at(&self) -> DateTime<Utc> {
        self.settled_at
    }

    /// Fare minus commission: what the driver keeps from the cash collected.
    pub fn net_earnings(&self) -> Decimal {
        self.gross_fare - self.fee
    }
}

/// Journal key. Trip and attempt IDs live in separate namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Trip(TripId),
    Payment(AttemptId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEntry {
    TripFee(TripSettlement),
    Payment {
        attempt_id: AttemptId,
        driver_id: DriverId,
        amount: Decimal,
        settled_at: DateTime<Utc>,
    },
}

impl LedgerEntry {
    pub fn key(&self) -> EntryKey {
        match self {
            Self::TripFee(settlement) => EntryKey::Trip(settlement.trip_id()),
            Self::Payment { attempt_id, .. } => EntryKey::Payment(*attempt_id),
        }
    }

    pub fn driver_id(&self) -> DriverId {
        match self {
            Self::TripFee(settlement) => settlement.driver_id(),
            Self::Payment { driver_id, .. } => *driver_id,
        }
    }

    /// Signed effect on debt: positive for fees, negative for payments.
    pub fn debt_delta(&self) -> Decimal {
        match self {
            Self::TripFee(settlement) => settlement.fee(),
            Self::Payment { amount, .. } => -*amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn settlement_computes_fee_and_net() {
        let settlement = TripSettlement::new(
            TripId(42),
            DriverId(1),
            dec!(420.00),
            dec!(0.06),
            Currency::Zar,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(settlement.fee(), dec!(25.20));
        assert_eq!(settlement.net_earnings(), dec!(394.80));
    }

    #[test]
    fn settlement_rejects_invalid_rate() {
        let result = TripSettlement::new(
            TripId(1),
            DriverId(1),
            dec!(100),
            dec!(2),
            Currency::Zar,
            Utc::now(),
        );
        assert_eq!(result, Err(LedgerError::InvalidRate));
    }

    #[test]
    fn entry_keys_and_deltas() {
        let attempt_id = AttemptId::new();
        let payment = LedgerEntry::Payment {
            attempt_id,
            driver_id: DriverId(3),
            amount: dec!(10),
            settled_at: Utc::now(),
        };
        assert_eq!(payment.key(), EntryKey::Payment(attempt_id));
        assert_eq!(payment.debt_delta(), dec!(-10));
        assert_eq!(payment.driver_id(), DriverId(3));

        let trip = LedgerEntry::TripFee(
            TripSettlement::new(
                TripId(9),
                DriverId(3),
                dec!(100),
                dec!(0.1),
                Currency::Kes,
                Utc::now(),
            )
            .unwrap(),
        );
        assert_eq!(trip.key(), EntryKey::Trip(TripId(9)));
        assert_eq!(trip.debt_delta(), dec!(10.00));
    }
}
