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

//! Admin-owned configuration.
//!
//! Settings are read-only to the ledger and passed explicitly into every
//! evaluation; nothing here is global state.
//!
//! # Example
//!
//! ```
//! use commission_ledger::{AdminSettings, Region};
//! use rust_decimal_macros::dec;
//!
//! let settings = AdminSettings::from_toml(r#"
//!     commission_rate = "0.05"
//!
//!     [regions.za]
//!     limit = "75"
//! "#).unwrap();
//!
//! assert_eq!(settings.commission_rate, dec!(0.05));
//! assert_eq!(settings.threshold_for(&Region::new("ZA")).limit, dec!(75));
//! ```

use crate::base::{Currency, Region};
use crate::error::LedgerError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

fn default_warning_ratio() -> Decimal {
    dec!(0.8)
}

/// Maximum tolerable debt for a region before drivers are blocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtThreshold {
    pub limit: Decimal,
    #[serde(default = "default_warning_ratio")]
    pub warning_ratio: Decimal,
}

impl DebtThreshold {
    pub fn new(limit: Decimal) -> Self {
        Self {
            limit,
            warning_ratio: default_warning_ratio(),
        }
    }
}

/// Global platform settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSettings {
    /// Flat commission rate applied to every trip fare, in `[0, 1]`.
    pub commission_rate: Decimal,
    pub default_currency: Currency,
    /// Threshold for regions without an explicit entry.
    pub default_threshold: DebtThreshold,
    pub regions: BTreeMap<Region, DebtThreshold>,
    /// How long a payment may await provider confirmation.
    pub payment_timeout_secs: u64,
}

impl Default for AdminSettings {
    fn default() -> Self {
        let regions = [
            ("ZA", dec!(50)),
            ("KE", dec!(400)),
            ("NG", dec!(2500)),
            ("SE", dec!(30)),
        ]
        .into_iter()
        .map(|(code, limit)| (Region::new(code), DebtThreshold::new(limit)))
        .collect();

        Self {
            commission_rate: dec!(0.06),
            default_currency: Currency::Zar,
            default_threshold: DebtThreshold::new(dec!(5)),
            regions,
            payment_timeout_secs: 120,
        }
    }
}

impl AdminSettings {
    /// Parses and validates settings from TOML. Missing keys take defaults.
    pub fn from_toml(source: &str) -> Result<Self, LedgerError> {
        let mut settings: AdminSettings =
            toml::from_str(source).map_err(|e| LedgerError::InvalidSettings(e.to_string()))?;
        settings.regions = std::mem::take(&mut settings.regions)
            .into_iter()
            .map(|(region, threshold)| (Region::new(region.as_str()), threshold))
            .collect();
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::InvalidSettings(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&source)
    }

    /// Rejects settings that cannot be applied at all.
    ///
    /// Non-positive limits are accepted: evaluation fails safe to blocked
    /// for affected regions, and the problem is logged here for operators.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.commission_rate < Decimal::ZERO || self.commission_rate > Decimal::ONE {
            return Err(LedgerError::InvalidSettings(format!(
                "commission_rate {} outside [0, 1]",
                self.commission_rate
            )));
        }
        if self.payment_timeout_secs == 0 {
            return Err(LedgerError::InvalidSettings(
                "payment_timeout_secs must be positive".into(),
            ));
        }
        let thresholds = std::iter::once((None, &self.default_threshold))
            .chain(self.regions.iter().map(|(r, t)| (Some(r), t)));
        for (region, threshold) in thresholds {
            if threshold.warning_ratio <= Decimal::ZERO || threshold.warning_ratio > Decimal::ONE {
                return Err(LedgerError::InvalidSettings(format!(
                    "warning_ratio {} outside (0, 1]",
                    threshold.warning_ratio
                )));
            }
            if threshold.limit <= Decimal::ZERO {
                tracing::warn!(
                    region = region.map(Region::as_str).unwrap_or("default"),
                    limit = %threshold.limit,
                    "debt limit is not positive; drivers in this region will be blocked"
                );
            }
        }
        Ok(())
    }

    pub fn threshold_for(&self, region: &Region) -> DebtThreshold {
        self.regions
            .get(region)
            .unwrap_or(&self.default_threshold)
            .clone()
    }

    /// Local currency for a region, falling back to the default currency.
    pub fn currency_for(&self, region: &Region) -> Currency {
        match region.as_str() {
            "ZA" => Currency::Zar,
            "KE" => Currency::Kes,
            "UG" => Currency::Ugx,
            "GH" => Currency::Ghs,
            "NG" => Currency::Ngn,
            "SE" => Currency::Sek,
            _ => self.default_currency,
        }
    }

    pub fn payment_timeout(&self) -> chrono::Duration {
        i64::try_from(self.payment_timeout_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}
