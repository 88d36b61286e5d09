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

//! Core identifier types for drivers, trips and payment attempts, plus the
//! currencies and regions the ledger operates in.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a driver account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DriverId(pub u32);

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a completed trip.
///
/// Trip IDs are globally unique; a trip settles against exactly one driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TripId(pub u64);

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a payment attempt.
///
/// Minted locally when an attempt is initiated and echoed back by the
/// provider callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AttemptId(pub Uuid);

impl AttemptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operating region, as an upper-case ISO 3166 alpha-2 code ("ZA", "KE").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
    pub fn new(code: &str) -> Self {
        Self(code.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Region {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Settlement currencies supported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Zar,
    Kes,
    Ugx,
    Ghs,
    Ngn,
    Sek,
    Eur,
}

impl Currency {
    /// Number of decimal places in the currency's minor unit (ISO 4217).
    pub fn minor_units(self) -> u32 {
        match self {
            Currency::Ugx => 0,
            _ => 2,
        }
    }

    /// Smallest representable amount, e.g. `0.01` for ZAR or `1` for UGX.
    pub fn minor_unit(self) -> Decimal {
        Decimal::new(1, self.minor_units())
    }

    pub fn code(self) -> &'static str {
        match self {
            Currency::Zar => "ZAR",
            Currency::Kes => "KES",
            Currency::Ugx => "UGX",
            Currency::Ghs => "GHS",
            Currency::Ngn => "NGN",
            Currency::Sek => "SEK",
            Currency::Eur => "EUR",
        }
    }

    /// Parses a three-letter code, case-insensitively.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "ZAR" => Some(Currency::Zar),
            "KES" => Some(Currency::Kes),
            "UGX" => Some(Currency::Ugx),
            "GHS" => Some(Currency::Ghs),
            "NGN" => Some(Currency::Ngn),
            "SEK" => Some(Currency::Sek),
            "EUR" => Some(Currency::Eur),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn region_is_normalised() {
        assert_eq!(Region::new(" za "), Region::new("ZA"));
        assert_eq!(Region::from("ke").as_str(), "KE");
    }

    #[test]
    fn minor_units_follow_iso_4217() {
        assert_eq!(Currency::Zar.minor_unit(), dec!(0.01));
        assert_eq!(Currency::Ugx.minor_unit(), dec!(1));
        assert_eq!(Currency::Kes.minor_units(), 2);
    }

    #[test]
    fn currency_code_round_trips() {
        for currency in [
            Currency::Zar,
            Currency::Kes,
            Currency::Ugx,
            Currency::Ghs,
            Currency::Ngn,
            Currency::Sek,
            Currency::Eur,
        ] {
            assert_eq!(Currency::from_code(currency.code()), Some(currency));
        }
        assert_eq!(Currency::from_code("usd"), None);
    }

    #[test]
    fn attempt_ids_are_unique() {
        assert_ne!(AttemptId::new(), AttemptId::new());
    }
}
