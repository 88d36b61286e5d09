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

//! Thread-safe ledger journal with deduplication.
//!
//! Provides a concurrent append-only journal that ensures each trip and each
//! payment attempt is applied at most once, while maintaining insertion order.

use crate::error::LedgerError;
use crate::settlement::{EntryKey, LedgerEntry};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::sync::Arc;

/// A thread-safe ledger journal with duplicate detection.
///
/// Combines a [`DashMap`] for O(1) duplicate checking with an ordered key
/// list. Lock order is always map shard, then `order`.
#[derive(Debug)]
pub struct LedgerJournal {
    /// Entries by key for O(1) duplicate detection.
    entries: DashMap<EntryKey, Arc<LedgerEntry>>,

    /// Keys in insertion order.
    order: Mutex<Vec<EntryKey>>,
}

impl LedgerJournal {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(Vec::new()),
        }
    }

    /// Appends an entry.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DuplicateSettlement`] if the trip was already journalled.
    /// - [`LedgerError::DuplicateConfirmation`] if the attempt was already journalled.
    pub fn push(&self, entry: Arc<LedgerEntry>) -> Result<(), LedgerError> {
        let key = entry.key();

        // Entry API gives an atomic check-and-insert.
        match self.entries.entry(key) {
            Entry::Occupied(_) => Err(match key {
                EntryKey::Trip(_) => LedgerError::DuplicateSettlement,
                EntryKey::Payment(_) => LedgerError::DuplicateConfirmation,
            }),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                self.order.lock().push(key);
                Ok(())
            }
        }
    }

    /// Removes an entry whose application to the account failed.
    pub fn retract(&self, key: &EntryKey) {
        if let Entry::Occupied(slot) = self.entries.entry(*key) {
            self.order.lock().retain(|k| k != key);
            slot.remove();
        }
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of journalled entries in insertion order.
    pub fn entries(&self) -> Vec<Arc<LedgerEntry>> {
        // Copy keys first so no shard lock is taken while `order` is held.
        let keys = self.order.lock().clone();
        keys.iter()
            .filter_map(|key| self.entries.get(key).map(|e| Arc::clone(e.value())))
            .collect()
    }
}

impl Default for LedgerJournal {
    fn default() -> Self {
        Self::new()
    }
}
