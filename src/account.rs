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

//! Driver account rows.
//!
//! A [`DriverAccount`] is one row of the authoritative store. All mutation
//! goes through its internal mutex, so writes to one driver's debt are
//! serialised no matter how many threads settle trips or payments.
//!
//! Verification status state machine:
//!
//! ```text
//!  NotStarted ──submit──► Pending ──approve──► Verified
//!      ▲                     │
//!      │                     └──reject──► Rejected
//!      └──────────restart──────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use commission_ledger::{Currency, DriverAccount, DriverId, Region, VerificationStatus};
//! use rust_decimal::Decimal;
//!
//! let account = DriverAccount::new(DriverId(1), Currency::Zar, Region::new("ZA"));
//! assert_eq!(account.commission_debt(), Decimal::ZERO);
//! assert_eq!(account.verification_status(), VerificationStatus::NotStarted);
//! ```

use crate::base::{AttemptId, Currency, DriverId, Region};
use crate::error::LedgerError;
use crate::settlement::TripSettlement;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;

/// Identity verification status of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    NotStarted,
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    /// Whether moving from `self` to `next` is permitted.
    ///
    /// Re-asserting the current status is always permitted.
    pub fn can_transition_to(self, next: VerificationStatus) -> bool {
        use VerificationStatus::*;
        self == next
            || matches!(
                (self, next),
                (NotStarted, Pending)
                    | (Pending, Verified)
                    | (Pending, Rejected)
                    | (Rejected, NotStarted)
            )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VerificationStatus::NotStarted => "NOT_STARTED",
            VerificationStatus::Pending => "PENDING",
            VerificationStatus::Verified => "VERIFIED",
            VerificationStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NOT_STARTED" => Some(VerificationStatus::NotStarted),
            "PENDING" => Some(VerificationStatus::Pending),
            "VERIFIED" => Some(VerificationStatus::Verified),
            "REJECTED" => Some(VerificationStatus::Rejected),
            _ => None,
        }
    }
}

/// Point-in-time copy of a driver row, as returned by store reads.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct DriverRecord {
    pub driver_id: DriverId,
    pub verification_status: VerificationStatus,
    pub commission_debt: Decimal,
    pub currency: Currency,
    pub region: Region,
    pub active: bool,
    /// Incremented on every committed write.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
struct AccountData {
    driver_id: DriverId,
    verification_status: VerificationStatus,
    commission_debt: Decimal,
    currency: Currency,
    region: Region,
    active: bool,
    version: u64,
    updated_at: DateTime<Utc>,
}

impl AccountData {
    fn new(driver_id: DriverId, currency: Currency, region: Region) -> Self {
        Self {
            driver_id,
            verification_status: VerificationStatus::NotStarted,
            commission_debt: Decimal::ZERO,
            currency,
            region,
            active: true,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.commission_debt >= Decimal::ZERO,
            "Invariant violated: commission debt went negative: {}",
            self.commission_debt
        );
    }

    fn ensure_active(&self) -> Result<(), LedgerError> {
        if self.active {
            Ok(())
        } else {
            Err(LedgerError::AccountDeactivated)
        }
    }

    fn commit(&mut self) {
        self.version += 1;
        // Commit times never run backwards within a row.
        self.updated_at = Utc::now().max(self.updated_at);
        self.assert_invariants();
    }

    /// Increases debt by a trip fee.
    fn add_fee(&mut self, fee: Decimal) -> Result<(), LedgerError> {
        if fee < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        self.ensure_active()?;
        self.commission_debt = self
            .commission_debt
            .checked_add(fee)
            .ok_or(LedgerError::InvalidAmount)?;
        self.commit();
        Ok(())
    }

    /// Reduces debt by a confirmed payment, flooring at zero.
    fn settle(&mut self, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        self.commission_debt = (self.commission_debt - amount).max(Decimal::ZERO);
        self.commit();
        Ok(())
    }

    fn set_status(&mut self, next: VerificationStatus) -> Result<(), LedgerError> {
        self.ensure_active()?;
        if !self.verification_status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition(
                "verification status may only move forward",
            ));
        }
        if self.verification_status != next {
            self.verification_status = next;
            self.commit();
        }
        Ok(())
    }

    fn record(&self) -> DriverRecord {
        DriverRecord {
            driver_id: self.driver_id,
            verification_status: self.verification_status,
            commission_debt: self.commission_debt,
            currency: self.currency,
            region: self.region.clone(),
            active: self.active,
            version: self.version,
            updated_at: self.updated_at,
        }
    }
}

/// Driver ledger account.
#[derive(Debug)]
pub struct DriverAccount {
    inner: Mutex<AccountData>,
}

impl DriverAccount {
    const DECIMAL_PRECISION: u32 = 2;

    pub fn new(driver_id: DriverId, currency: Currency, region: Region) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(driver_id, currency, region)),
        }
    }

    pub fn driver_id(&self) -> DriverId {
        self.inner.lock().driver_id
    }

    pub fn commission_debt(&self) -> Decimal {
        self.inner.lock().commission_debt
    }

    pub fn verification_status(&self) -> VerificationStatus {
        self.inner.lock().verification_status
    }

    pub fn currency(&self) -> Currency {
        self.inner.lock().currency
    }

    pub fn region(&self) -> Region {
        self.inner.lock().region.clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    pub fn record(&self) -> DriverRecord {
        self.inner.lock().record()
    }

    /// Adds a trip's commission to the debt.
    ///
    /// Deduplication by trip ID is the caller's responsibility; see
    /// [`LedgerStore::record_trip`](crate::LedgerStore::record_trip).
    pub fn apply_trip(&self, settlement: &TripSettlement) -> Result<DriverRecord, LedgerError> {
        let mut data = self.inner.lock();
        if settlement.driver_id() != data.driver_id {
            return Err(LedgerError::DriverNotFound);
        }
        data.add_fee(settlement.fee())?;
        Ok(data.record())
    }

    /// Applies a confirmed payment: `debt = max(0, debt - amount)`.
    ///
    /// Deactivated accounts still accept settlements; money already taken
    /// from the driver must reach the ledger.
    pub fn apply_payment(
        &self,
        attempt_id: AttemptId,
        amount: Decimal,
    ) -> Result<DriverRecord, LedgerError> {
        let mut data = self.inner.lock();
        data.settle(amount)?;
        tracing::debug!(
            driver = %data.driver_id,
            attempt = %attempt_id,
            %amount,
            debt = %data.commission_debt,
            "payment settled"
        );
        Ok(data.record())
    }

    pub fn set_verification_status(
        &self,
        next: VerificationStatus,
    ) -> Result<DriverRecord, LedgerError> {
        let mut data = self.inner.lock();
        data.set_status(next)?;
        Ok(data.record())
    }

    /// Deactivates the account. Accounts are never deleted.
    pub fn deactivate(&self) -> DriverRecord {
        let mut data = self.inner.lock();
        if data.active {
            data.active = false;
            data.commit();
        }
        data.record()
    }
}

impl Serialize for DriverAccount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("DriverAccount", 6)?;
        state.serialize_field("driver", &data.driver_id)?;
        state.serialize_field(
            "debt",
            &data
                .commission_debt
                .round_dp(DriverAccount::DECIMAL_PRECISION.min(data.currency.minor_units())),
        )?;
        state.serialize_field("currency", &data.currency)?;
        state.serialize_field("region", &data.region)?;
        state.serialize_field("verification", &data.verification_status)?;
        state.serialize_field("active", &data.active)?;
        state.end()
    }
}
