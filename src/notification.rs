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

//! Change notifications pushed from the store to driver sessions.
//!
//! Every committed write to a driver row is published as a
//! [`ProfileUpdate`] carrying the new field values, mirroring the realtime
//! payload `{event: UPDATE, table: profiles, filter: id=eq.<driver>}`.
//! Admin threshold edits are published as [`ThresholdUpdate`] to every
//! driver in the affected region.
//!
//! Each session holds one [`Subscription`]; dropping it tears the
//! subscription down.

use crate::account::{DriverRecord, VerificationStatus};
use crate::base::{DriverId, Region};
use crate::config::DebtThreshold;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub const PROFILES_TABLE: &str = "profiles";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEvent {
    Update,
}

/// New values of a driver row after a committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub event: ChangeEvent,
    pub table: String,
    pub driver_id: DriverId,
    pub commission_debt: Decimal,
    pub verification_status: VerificationStatus,
    /// Server commit time.
    pub committed_at: DateTime<Utc>,
    /// Row version; breaks ties between commits with equal timestamps.
    pub version: u64,
}

impl ProfileUpdate {
    pub fn from_record(record: &DriverRecord) -> Self {
        Self {
            event: ChangeEvent::Update,
            table: PROFILES_TABLE.to_string(),
            driver_id: record.driver_id,
            commission_debt: record.commission_debt,
            verification_status: record.verification_status,
            committed_at: record.updated_at,
            version: record.version,
        }
    }

    pub fn filter(&self) -> String {
        format!("id=eq.{}", self.driver_id)
    }

    /// Precedence key: later commit wins, row version breaks ties.
    pub fn ordering_key(&self) -> (DateTime<Utc>, u64) {
        (self.committed_at, self.version)
    }
}

/// Admin edit to a region's debt threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdUpdate {
    pub region: Region,
    pub threshold: DebtThreshold,
    pub committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeNotification {
    Profile(ProfileUpdate),
    Threshold(ThresholdUpdate),
}

impl ChangeNotification {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Live subscriptions, keyed by driver.
#[derive(Debug, Default)]
pub(crate) struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: DashMap<DriverId, Vec<(u64, Sender<ChangeNotification>)>>,
}

impl SubscriberRegistry {
    pub(crate) fn subscribe(self: &Arc<Self>, driver_id: DriverId) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = channel::unbounded();
        self.subscribers
            .entry(driver_id)
            .or_default()
            .push((id, sender));
        tracing::debug!(driver = %driver_id, subscription = id, "subscribed");
        Subscription {
            driver_id,
            id,
            receiver,
            registry: Arc::downgrade(self),
        }
    }

    /// Delivers to every live subscriber of `driver_id`, pruning closed ones.
    pub(crate) fn publish(&self, driver_id: DriverId, notification: &ChangeNotification) -> usize {
        let Some(mut senders) = self.subscribers.get_mut(&driver_id) else {
            return 0;
        };
        senders.retain(|(_, sender)| sender.send(notification.clone()).is_ok());
        senders.len()
    }

    fn unsubscribe(&self, driver_id: DriverId, id: u64) {
        if let Some(mut senders) = self.subscribers.get_mut(&driver_id) {
            senders.retain(|(sub_id, _)| *sub_id != id);
        }
        self.subscribers.remove_if(&driver_id, |_, senders| senders.is_empty());
        tracing::debug!(driver = %driver_id, subscription = id, "unsubscribed");
    }

    pub(crate) fn subscriber_count(&self, driver_id: DriverId) -> usize {
        self.subscribers
            .get(&driver_id)
            .map(|senders| senders.len())
            .unwrap_or(0)
    }
}

/// One session's view of the notification channel for a single driver.
#[derive(Debug)]
pub struct Subscription {
    driver_id: DriverId,
    id: u64,
    receiver: Receiver<ChangeNotification>,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub fn driver_id(&self) -> DriverId {
        self.driver_id
    }

    pub fn try_next(&self) -> Option<ChangeNotification> {
        self.receiver.try_recv().ok()
    }

    /// Waits at most `timeout` for the next notification.
    pub fn next_timeout(&self, timeout: Duration) -> Option<ChangeNotification> {
        match self.receiver.recv_timeout(timeout) {
            Ok(notification) => Some(notification),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Takes everything currently queued without blocking.
    pub fn drain(&self) -> Vec<ChangeNotification> {
        self.receiver.try_iter().collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.driver_id, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::Currency;
    use rust_decimal_macros::dec;

    fn record(debt: Decimal, version: u64) -> DriverRecord {
        DriverRecord {
            driver_id: DriverId(4),
            verification_status: VerificationStatus::Verified,
            commission_debt: debt,
            currency: Currency::Zar,
            region: Region::new("ZA"),
            active: true,
            version,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn profile_update_mirrors_record() {
        let update = ProfileUpdate::from_record(&record(dec!(12.50), 3));
        assert_eq!(update.event, ChangeEvent::Update);
        assert_eq!(update.table, "profiles");
        assert_eq!(update.filter(), "id=eq.4");
        assert_eq!(update.commission_debt, dec!(12.50));
        assert_eq!(update.version, 3);
    }

    #[test]
    fn decodes_wire_payload() {
        let payload = r#"{
            "kind": "profile",
            "event": "UPDATE",
            "table": "profiles",
            "driver_id": 4,
            "commission_debt": "55.00",
            "verification_status": "VERIFIED",
            "committed_at": "2025-03-01T10:00:00Z",
            "version": 7
        }"#;
        let notification = ChangeNotification::from_json(payload).unwrap();
        let ChangeNotification::Profile(update) = notification else {
            panic!("expected profile update");
        };
        assert_eq!(update.driver_id, DriverId(4));
        assert_eq!(update.commission_debt, dec!(55.00));
        assert_eq!(update.verification_status, VerificationStatus::Verified);
    }

    #[test]
    fn subscription_receives_published_notifications() {
        let registry = Arc::new(SubscriberRegistry::default());
        let subscription = registry.subscribe(DriverId(4));
        let notification = ChangeNotification::Profile(ProfileUpdate::from_record(&record(
            dec!(1),
            1,
        )));

        assert_eq!(registry.publish(DriverId(4), &notification), 1);
        assert_eq!(registry.publish(DriverId(5), &notification), 0);
        assert_eq!(subscription.try_next(), Some(notification));
        assert_eq!(subscription.try_next(), None);
    }

    #[test]
    fn dropping_subscription_tears_it_down() {
        let registry = Arc::new(SubscriberRegistry::default());
        let subscription = registry.subscribe(DriverId(4));
        assert_eq!(registry.subscriber_count(DriverId(4)), 1);
        drop(subscription);
        assert_eq!(registry.subscriber_count(DriverId(4)), 0);
    }

    #[test]
    fn next_timeout_is_bounded() {
        let registry = Arc::new(SubscriberRegistry::default());
        let subscription = registry.subscribe(DriverId(4));
        assert_eq!(subscription.next_timeout(Duration::from_millis(10)), None);
    }
}
