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

//! Session-side cache of a driver's ledger values.
//!
//! A [`LedgerSynchronizer`] is primed from one store read and then kept
//! current by change notifications. Notifications can arrive late or out of
//! order; each profile update carries its commit ordering key and anything
//! not newer than the last authoritative value is discarded, so the cache
//! never rolls back.

use crate::account::{DriverRecord, VerificationStatus};
use crate::base::{DriverId, Region};
use crate::config::DebtThreshold;
use crate::notification::{ChangeNotification, ProfileUpdate, ThresholdUpdate};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// What a profile update changed in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileChange {
    pub previous_debt: Decimal,
    pub debt: Decimal,
    pub previous_status: VerificationStatus,
    pub status: VerificationStatus,
}

impl ProfileChange {
    pub fn debt_increased(&self) -> bool {
        self.debt > self.previous_debt
    }

    pub fn debt_decreased(&self) -> bool {
        self.debt < self.previous_debt
    }

    pub fn status_changed(&self) -> bool {
        self.status != self.previous_status
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cache took new profile values.
    Applied(ProfileChange),
    /// The region's threshold was replaced.
    ThresholdChanged {
        previous: DebtThreshold,
        current: DebtThreshold,
    },
    /// Newer than the cache but carrying the same values.
    Unchanged,
    /// Not newer than the last authoritative value; discarded.
    Superseded,
    /// Addressed to another driver or region.
    Ignored,
}

impl SyncOutcome {
    /// Whether eligibility needs to be re-evaluated.
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            SyncOutcome::Applied(_) | SyncOutcome::ThresholdChanged { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct LedgerSynchronizer {
    driver_id: DriverId,
    region: Region,
    debt: Decimal,
    status: VerificationStatus,
    threshold: DebtThreshold,
    /// Ordering key of the last authoritative profile value.
    last_profile: (DateTime<Utc>, u64),
    last_threshold: Option<DateTime<Utc>>,
}

impl LedgerSynchronizer {
    pub fn new(record: &DriverRecord, threshold: DebtThreshold) -> Self {
        Self {
            driver_id: record.driver_id,
            region: record.region.clone(),
            debt: record.commission_debt,
            status: record.verification_status,
            threshold,
            last_profile: (record.updated_at, record.version),
            last_threshold: None,
        }
    }

    pub fn driver_id(&self) -> DriverId {
        self.driver_id
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn debt(&self) -> Decimal {
        self.debt
    }

    pub fn status(&self) -> VerificationStatus {
        self.status
    }

    pub fn threshold(&self) -> &DebtThreshold {
        &self.threshold
    }

    pub fn apply(&mut self, notification: &ChangeNotification) -> SyncOutcome {
        match notification {
            ChangeNotification::Profile(update) => self.apply_profile(update),
            ChangeNotification::Threshold(update) => self.apply_threshold(update),
        }
    }

    /// Applies a record returned directly by a store write.
    pub fn apply_record(&mut self, record: &DriverRecord) -> SyncOutcome {
        self.apply_profile(&ProfileUpdate::from_record(record))
    }

    pub fn apply_profile(&mut self, update: &ProfileUpdate) -> SyncOutcome {
        if update.driver_id != self.driver_id {
            return SyncOutcome::Ignored;
        }
        let key = update.ordering_key();
        if key <= self.last_profile {
            tracing::debug!(
                driver = %self.driver_id,
                version = update.version,
                cached_version = self.last_profile.1,
                "stale profile update discarded"
            );
            return SyncOutcome::Superseded;
        }

        self.last_profile = key;
        if update.commission_debt == self.debt && update.verification_status == self.status {
            return SyncOutcome::Unchanged;
        }

        let change = ProfileChange {
            previous_debt: self.debt,
            debt: update.commission_debt,
            previous_status: self.status,
            status: update.verification_status,
        };
        self.debt = update.commission_debt;
        self.status = update.verification_status;
        SyncOutcome::Applied(change)
    }

    pub fn apply_threshold(&mut self, update: &ThresholdUpdate) -> SyncOutcome {
        if update.region != self.region {
            return SyncOutcome::Ignored;
        }
        if self
            .last_threshold
            .is_some_and(|last| update.committed_at <= last)
        {
            tracing::debug!(driver = %self.driver_id, region = %self.region, "stale threshold update discarded");
            return SyncOutcome::Superseded;
        }

        self.last_threshold = Some(update.committed_at);
        if update.threshold == self.threshold {
            return SyncOutcome::Unchanged;
        }
        let previous = std::mem::replace(&mut self.threshold, update.threshold.clone());
        SyncOutcome::ThresholdChanged {
            previous,
            current: update.threshold.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::Currency;
    use crate::notification::ChangeEvent;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record() -> DriverRecord {
        DriverRecord {
            driver_id: DriverId(9),
            verification_status: VerificationStatus::Verified,
            commission_debt: dec!(10.00),
            currency: Currency::Zar,
            region: Region::new("ZA"),
            active: true,
            version: 3,
            updated_at: at(0),
        }
    }

    fn update(debt: Decimal, secs: i64, version: u64) -> ProfileUpdate {
        ProfileUpdate {
            event: ChangeEvent::Update,
            table: "profiles".into(),
            driver_id: DriverId(9),
            commission_debt: debt,
            verification_status: VerificationStatus::Verified,
            committed_at: at(secs),
            version,
        }
    }

    fn synchronizer() -> LedgerSynchronizer {
        LedgerSynchronizer::new(&record(), DebtThreshold::new(dec!(50)))
    }

    #[test]
    fn newer_update_is_applied() {
        let mut sync = synchronizer();
        let outcome = sync.apply_profile(&update(dec!(55.00), 1, 4));
        let SyncOutcome::Applied(change) = outcome else {
            panic!("expected applied, got {outcome:?}");
        };
        assert!(change.debt_increased());
        assert!(!change.status_changed());
        assert_eq!(sync.debt(), dec!(55.00));
    }

    #[test]
    fn out_of_order_update_never_rolls_back() {
        let mut sync = synchronizer();
        sync.apply_profile(&update(dec!(30.00), 5, 6));
        assert_eq!(
            sync.apply_profile(&update(dec!(20.00), 4, 5)),
            SyncOutcome::Superseded
        );
        assert_eq!(sync.debt(), dec!(30.00));
    }

    #[test]
    fn equal_timestamps_order_by_version() {
        let mut sync = synchronizer();
        sync.apply_profile(&update(dec!(12.00), 1, 5));
        assert_eq!(
            sync.apply_profile(&update(dec!(11.00), 1, 4)),
            SyncOutcome::Superseded
        );
        assert!(sync.apply_profile(&update(dec!(13.00), 1, 6)).is_change());
    }

    #[test]
    fn replay_of_current_value_is_superseded() {
        let mut sync = synchronizer();
        let current = ProfileUpdate::from_record(&record());
        assert_eq!(sync.apply_profile(&current), SyncOutcome::Superseded);
    }

    #[test]
    fn newer_identical_values_are_unchanged() {
        let mut sync = synchronizer();
        assert_eq!(
            sync.apply_profile(&update(dec!(10.00), 2, 4)),
            SyncOutcome::Unchanged
        );
    }

    #[test]
    fn other_driver_is_ignored() {
        let mut sync = synchronizer();
        let mut foreign = update(dec!(99), 9, 9);
        foreign.driver_id = DriverId(10);
        assert_eq!(sync.apply_profile(&foreign), SyncOutcome::Ignored);
    }

    #[test]
    fn threshold_updates_for_own_region() {
        let mut sync = synchronizer();
        let edit = ThresholdUpdate {
            region: Region::new("ZA"),
            threshold: DebtThreshold::new(dec!(80)),
            committed_at: at(10),
        };
        assert!(matches!(
            sync.apply_threshold(&edit),
            SyncOutcome::ThresholdChanged { .. }
        ));
        assert_eq!(sync.threshold().limit, dec!(80));

        let stale = ThresholdUpdate {
            threshold: DebtThreshold::new(dec!(40)),
            committed_at: at(5),
            ..edit.clone()
        };
        assert_eq!(sync.apply_threshold(&stale), SyncOutcome::Superseded);

        let foreign = ThresholdUpdate {
            region: Region::new("KE"),
            committed_at: at(20),
            ..edit
        };
        assert_eq!(sync.apply_threshold(&foreign), SyncOutcome::Ignored);
    }
}
