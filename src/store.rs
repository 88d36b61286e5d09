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

//! Authoritative driver store.
//!
//! The [`LedgerStore`] owns every [`DriverAccount`] row and the ledger
//! journal. It is the only place debt is written, and every committed write
//! is published to the driver's subscribers as a change notification.
//!
//! # Writes
//!
//! - **Trip settlement**: adds the trip fee to debt, once per trip ID.
//! - **Payment settlement**: subtracts a confirmed payment, once per attempt ID.
//! - **Verification status**: forward-only status changes.
//! - **Threshold edits**: kept as the region's current limit and published
//!   to every driver in the region.
//! - **Payment callbacks**: settled through the shared attempt registry,
//!   whether or not the driver has a session open.
//!
//! # Thread Safety
//!
//! Rows live in a [`DashMap`]; each row serialises its own writes behind a
//! mutex, so concurrent settlements for one driver never interleave.

use crate::account::{DriverAccount, DriverRecord, VerificationStatus};
use crate::base::{AttemptId, Currency, DriverId, Region};
use crate::config::DebtThreshold;
use crate::error::LedgerError;
use crate::journal::LedgerJournal;
use crate::notification::{
    ChangeNotification, ProfileUpdate, SubscriberRegistry, Subscription, ThresholdUpdate,
};
use crate::payment::{CallbackAuthenticator, CallbackEffect, PaymentCallback, PaymentRegistry};
use crate::settlement::{EntryKey, LedgerEntry, TripSettlement};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::sync::Arc;

/// In-process authoritative store for driver rows.
///
/// # Invariants
///
/// - Trip IDs and attempt IDs are each applied at most once, across all drivers.
/// - Debt never goes negative and only decreases through a payment settlement.
/// - Rows are never deleted, only deactivated.
pub struct LedgerStore {
    /// Driver rows indexed by driver ID.
    accounts: DashMap<DriverId, DriverAccount>,
    /// Global ledger journal for deduplication.
    journal: LedgerJournal,
    subscribers: Arc<SubscriberRegistry>,
    /// Latest admin edit per region; regions without one use the settings.
    thresholds: DashMap<Region, ThresholdUpdate>,
    payments: Arc<PaymentRegistry>,
}

impl LedgerStore {
    pub fn new() -> Self {
        LedgerStore {
            accounts: DashMap::new(),
            journal: LedgerJournal::new(),
            subscribers: Arc::new(SubscriberRegistry::default()),
            thresholds: DashMap::new(),
            payments: Arc::new(PaymentRegistry::new()),
        }
    }

    /// Creates a driver row at signup.
    ///
    /// # Errors
    ///
    /// [`LedgerError::DriverExists`] if the driver is already registered.
    pub fn register(
        &self,
        driver_id: DriverId,
        currency: Currency,
        region: Region,
    ) -> Result<DriverRecord, LedgerError> {
        match self.accounts.entry(driver_id) {
            Entry::Occupied(_) => Err(LedgerError::DriverExists),
            Entry::Vacant(slot) => {
                let account = slot.insert(DriverAccount::new(driver_id, currency, region));
                tracing::info!(driver = %driver_id, %currency, "driver registered");
                Ok(account.record())
            }
        }
    }

    pub fn fetch(&self, driver_id: DriverId) -> Result<DriverRecord, LedgerError> {
        self.accounts
            .get(&driver_id)
            .map(|account| account.record())
            .ok_or(LedgerError::DriverNotFound)
    }

    /// Adds a trip's commission to the driver's debt.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DriverNotFound`] - No row for the settlement's driver.
    /// - [`LedgerError::DuplicateSettlement`] - Trip ID already applied.
    /// - [`LedgerError::AccountDeactivated`] - Row is deactivated.
    pub fn record_trip(&self, settlement: TripSettlement) -> Result<DriverRecord, LedgerError> {
        let driver_id = settlement.driver_id();
        let account = self
            .accounts
            .get(&driver_id)
            .ok_or(LedgerError::DriverNotFound)?;

        // Journal first so a replayed trip never reaches the row.
        let entry = Arc::new(LedgerEntry::TripFee(settlement.clone()));
        self.journal.push(Arc::clone(&entry))?;

        let record = match account.apply_trip(&settlement) {
            Ok(record) => record,
            Err(e) => {
                self.journal.retract(&entry.key());
                return Err(e);
            }
        };
        drop(account);

        tracing::info!(
            driver = %driver_id,
            trip = %settlement.trip_id(),
            fee = %settlement.fee(),
            debt = %record.commission_debt,
            "trip fee recorded"
        );
        self.publish_profile(&record);
        Ok(record)
    }

    /// Applies a confirmed payment: `debt = max(0, debt - amount)`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DriverNotFound`] - No row for the driver.
    /// - [`LedgerError::DuplicateConfirmation`] - Attempt ID already applied.
    /// - [`LedgerError::InvalidAmount`] - Amount not positive.
    pub fn settle_payment(
        &self,
        driver_id: DriverId,
        attempt_id: AttemptId,
        amount: Decimal,
    ) -> Result<DriverRecord, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let account = self
            .accounts
            .get(&driver_id)
            .ok_or(LedgerError::DriverNotFound)?;

        let entry = Arc::new(LedgerEntry::Payment {
            attempt_id,
            driver_id,
            amount,
            settled_at: Utc::now(),
        });
        if let Err(e) = self.journal.push(Arc::clone(&entry)) {
            tracing::warn!(driver = %driver_id, attempt = %attempt_id, "payment already settled");
            return Err(e);
        }

        let record = match account.apply_payment(attempt_id, amount) {
            Ok(record) => record,
            Err(e) => {
                self.journal.retract(&entry.key());
                return Err(e);
            }
        };
        drop(account);

        tracing::info!(
            driver = %driver_id,
            attempt = %attempt_id,
            %amount,
            debt = %record.commission_debt,
            "payment settled"
        );
        self.publish_profile(&record);
        Ok(record)
    }

    /// Moves the driver's verification status forward.
    ///
    /// Re-asserting the current status is a no-op and publishes nothing.
    pub fn set_verification_status(
        &self,
        driver_id: DriverId,
        status: VerificationStatus,
    ) -> Result<DriverRecord, LedgerError> {
        let account = self
            .accounts
            .get(&driver_id)
            .ok_or(LedgerError::DriverNotFound)?;
        let before = account.record().version;
        let record = account.set_verification_status(status)?;
        drop(account);

        if record.version != before {
            tracing::info!(driver = %driver_id, status = status.as_str(), "verification status changed");
            self.publish_profile(&record);
        }
        Ok(record)
    }

    pub fn deactivate(&self, driver_id: DriverId) -> Result<DriverRecord, LedgerError> {
        let account = self
            .accounts
            .get(&driver_id)
            .ok_or(LedgerError::DriverNotFound)?;
        let record = account.deactivate();
        drop(account);

        tracing::info!(driver = %driver_id, "driver deactivated");
        self.publish_profile(&record);
        Ok(record)
    }

    /// Stores an admin threshold edit and publishes it to every driver in
    /// `region`.
    ///
    /// Edit times are strictly increasing per region. Returns the number of
    /// sessions notified.
    pub fn update_threshold(&self, region: &Region, threshold: DebtThreshold) -> usize {
        if threshold.limit <= Decimal::ZERO {
            tracing::warn!(%region, limit = %threshold.limit, "debt limit is not positive");
        }
        let mut current = self.thresholds.entry(region.clone()).or_insert_with(|| ThresholdUpdate {
            region: region.clone(),
            threshold: threshold.clone(),
            committed_at: DateTime::<Utc>::MIN_UTC,
        });
        let mut committed_at = Utc::now();
        if committed_at <= current.committed_at {
            committed_at = current.committed_at + chrono::Duration::microseconds(1);
        }
        *current = ThresholdUpdate {
            region: region.clone(),
            threshold,
            committed_at,
        };
        let notification = ChangeNotification::Threshold(current.clone());
        drop(current);

        tracing::info!(%region, %committed_at, "debt threshold updated");
        let drivers: Vec<DriverId> = self
            .accounts
            .iter()
            .filter(|account| &account.region() == region)
            .map(|account| *account.key())
            .collect();
        drivers
            .into_iter()
            .map(|driver_id| self.subscribers.publish(driver_id, &notification))
            .sum()
    }

    /// The latest admin edit for `region`, if there has been one.
    pub fn threshold_edit(&self, region: &Region) -> Option<ThresholdUpdate> {
        self.thresholds.get(region).map(|edit| edit.value().clone())
    }

    /// Attempts of every driver, shared by all sessions.
    pub fn payments(&self) -> &Arc<PaymentRegistry> {
        &self.payments
    }

    /// Applies an authenticated provider callback to the attempt registry
    /// and, on confirmation, to the ledger.
    ///
    /// Works whether or not the driver has a session open. Returns the
    /// callback's effect and the updated row when a payment was settled.
    ///
    /// # Errors
    ///
    /// Everything [`PaymentRegistry::handle_callback`] returns, plus
    /// [`LedgerError::DuplicateConfirmation`] for an attempt that was
    /// already settled and has since been dropped from the registry.
    pub fn apply_payment_callback(
        &self,
        callback: &PaymentCallback,
        authenticator: &CallbackAuthenticator,
    ) -> Result<(CallbackEffect, Option<DriverRecord>), LedgerError> {
        let effect = match self.payments.handle_callback(callback, authenticator, Utc::now()) {
            Err(LedgerError::UnknownAttempt)
                if self
                    .journal
                    .contains(&EntryKey::Payment(callback.attempt_id)) =>
            {
                return Err(LedgerError::DuplicateConfirmation);
            }
            result => result?,
        };

        let CallbackEffect::Settle { attempt_id, amount } = effect else {
            return Ok((effect, None));
        };
        match self.settle_payment(callback.driver_id, attempt_id, amount) {
            Ok(record) => Ok((effect, Some(record))),
            Err(LedgerError::DuplicateConfirmation) => {
                tracing::warn!(driver = %callback.driver_id, attempt = %attempt_id, "ledger already holds this payment");
                Ok((effect, None))
            }
            Err(e) => Err(e),
        }
    }

    /// Opens a change-notification subscription for one driver session.
    pub fn subscribe(&self, driver_id: DriverId) -> Subscription {
        self.subscribers.subscribe(driver_id)
    }

    pub fn subscriber_count(&self, driver_id: DriverId) -> usize {
        self.subscribers.subscriber_count(driver_id)
    }

    /// Returns an iterator over all driver rows.
    pub fn accounts(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, DriverId, DriverAccount>> {
        self.accounts.iter()
    }

    pub fn journal(&self) -> &LedgerJournal {
        &self.journal
    }

    fn publish_profile(&self, record: &DriverRecord) {
        let notification = ChangeNotification::Profile(ProfileUpdate::from_record(record));
        let delivered = self.subscribers.publish(record.driver_id, &notification);
        tracing::trace!(driver = %record.driver_id, version = record.version, delivered, "profile update published");
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}
