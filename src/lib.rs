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

//! # Commission Ledger
//!
//! This library decides whether a ride-hailing driver may accept trips. A
//! driver works only when their identity is verified and their accumulated
//! platform commission debt is within the regional limit. Debt grows with
//! every completed trip and shrinks only through provider-confirmed
//! payments.
//!
//! ## Core Components
//!
//! - [`LedgerStore`]: Authoritative driver rows, trip and payment settlement
//! - [`evaluate`]: Eligibility decision from debt, threshold and verification status
//! - [`GateController`]: Per-driver session switching between verification, blocked and normal modes
//! - [`VerificationPipeline`]: Four-step identity document capture and upload
//! - [`PaymentFlow`]: Provider debit requests for one driver
//! - [`PaymentRegistry`]: Attempts shared across sessions, settled by authenticated callbacks
//! - [`LedgerError`]: Error types for ledger processing failures
//!
//! ## Example
//!
//! ```
//! use commission_ledger::{
//!     AdminSettings, Currency, DriverId, LedgerStore, ReasonCode, Region, TripId,
//!     TripSettlement, VerificationStatus, evaluate,
//! };
//! use chrono::Utc;
//! use rust_decimal_macros::dec;
//!
//! let settings = AdminSettings::default();
//! let store = LedgerStore::new();
//! let za = Region::new("ZA");
//!
//! store.register(DriverId(1), Currency::Zar, za.clone()).unwrap();
//! store.set_verification_status(DriverId(1), VerificationStatus::Pending).unwrap();
//! store.set_verification_status(DriverId(1), VerificationStatus::Verified).unwrap();
//!
//! // A trip fare of 420.00 at 6% adds 25.20 of commission debt.
//! let trip = TripSettlement::new(
//!     TripId(1), DriverId(1), dec!(420.00), settings.commission_rate, Currency::Zar, Utc::now(),
//! ).unwrap();
//! let record = store.record_trip(trip).unwrap();
//! assert_eq!(record.commission_debt, dec!(25.20));
//!
//! let decision = evaluate(
//!     record.commission_debt,
//!     &settings.threshold_for(&za),
//!     record.verification_status,
//! );
//! assert!(decision.can_work);
//! assert_eq!(decision.reason_code, ReasonCode::Ok);
//! ```
//!
//! ## Thread Safety
//!
//! The store handles concurrent access to driver rows, so trips and
//! payments for different drivers settle in parallel while writes to one
//! driver serialise on that driver's row.

pub mod account;
mod base;
pub mod config;
pub mod controller;
pub mod eligibility;
pub mod error;
pub mod gate;
mod journal;
pub mod kyc;
pub mod money;
pub mod notification;
pub mod payment;
mod settlement;
mod store;
pub mod sync;

pub use account::{DriverAccount, DriverRecord, VerificationStatus};
pub use base::{AttemptId, Currency, DriverId, Region, TripId};
pub use config::{AdminSettings, DebtThreshold};
pub use controller::{GateController, SessionContext};
pub use eligibility::{EligibilityDecision, ReasonCode, evaluate};
pub use error::{ErrorKind, LedgerError};
pub use gate::{DriverMode, select_mode};
pub use journal::LedgerJournal;
pub use kyc::{CapturedImage, DocumentUploader, KycBundle, KycState, KycStep, VerificationPipeline};
pub use money::{DebtLevel, compute_fee};
pub use notification::{ChangeNotification, ProfileUpdate, Subscription, ThresholdUpdate};
pub use payment::{
    CallbackAuthenticator, CallbackEffect, CallbackOutcome, DebitRequest, FailureReason,
    GatewayAck, GatewayError, PaymentAttempt, PaymentCallback, PaymentFlow, PaymentGateway,
    PaymentRegistry, PaymentState, Provider,
};
pub use settlement::{EntryKey, LedgerEntry, TripSettlement};
pub use store::LedgerStore;
pub use sync::{LedgerSynchronizer, ProfileChange, SyncOutcome};
