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

//! Commission payment settlement.
//!
//! A driver clears debt by paying through a mobile-money provider or card.
//! Each payment is a [`PaymentAttempt`] with its own UUID; the ledger is
//! only touched once the provider confirms through an authenticated
//! callback.
//!
//! ```text
//!  Idle ─initiate─► Initiated ─ack─► AwaitingConfirmation ─┬─confirm──► Confirmed
//!   ▲                   │                    │             ├─decline──► Failed(Declined)
//!   └──gateway error────┘                    │             └─deadline─► Failed(TimedOut)
//!                       └──────cancel────────┴─────────────────────────► Cancelled
//! ```
//!
//! A confirmation that arrives after a cancel or a timeout still settles,
//! since the driver's money has moved, unless the attempt was voided.

use crate::base::{AttemptId, Currency, DriverId};
use crate::error::LedgerError;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Provider {
    Mtn,
    Airtel,
    Mpesa,
    Card,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Mtn => "MTN",
            Provider::Airtel => "AIRTEL",
            Provider::Mpesa => "MPESA",
            Provider::Card => "CARD",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().replace('-', "").as_str() {
            "MTN" => Some(Provider::Mtn),
            "AIRTEL" => Some(Provider::Airtel),
            "MPESA" => Some(Provider::Mpesa),
            "CARD" => Some(Provider::Card),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Idle,
    Initiated,
    AwaitingConfirmation,
    Confirmed,
    Failed,
    Cancelled,
}

impl PaymentState {
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            PaymentState::Initiated | PaymentState::AwaitingConfirmation
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    Declined,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentAttempt {
    id: AttemptId,
    driver_id: DriverId,
    amount: Decimal,
    currency: Currency,
    provider: Provider,
    state: PaymentState,
    created_at: DateTime<Utc>,
    deadline: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    gateway_reference: Option<String>,
    failure: Option<FailureReason>,
    voided: bool,
}

impl PaymentAttempt {
    pub fn id(&self) -> AttemptId {
        self.id
    }

    pub fn driver_id(&self) -> DriverId {
        self.driver_id
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn gateway_reference(&self) -> Option<&str> {
        self.gateway_reference.as_deref()
    }

    pub fn failure(&self) -> Option<FailureReason> {
        self.failure
    }

    pub fn is_voided(&self) -> bool {
        self.voided
    }

    /// Whether a provider callback could still change this attempt.
    fn awaits_late_confirmation(&self) -> bool {
        match self.state {
            PaymentState::Initiated | PaymentState::AwaitingConfirmation => true,
            PaymentState::Cancelled | PaymentState::Failed => {
                !self.voided
                    && self.gateway_reference.is_some()
                    && self.failure != Some(FailureReason::Declined)
            }
            PaymentState::Idle | PaymentState::Confirmed => false,
        }
    }
}

/// Debit request sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebitRequest {
    pub attempt_id: AttemptId,
    pub driver_id: DriverId,
    pub amount: Decimal,
    pub currency: Currency,
    pub provider: Provider,
}

/// Provider acknowledgement that a debit prompt was issued.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayAck {
    pub reference: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway unreachable: {0}")]
    Unreachable(String),

    #[error("debit request refused: {0}")]
    Refused(String),
}

/// Payment provider integration.
pub trait PaymentGateway: Send + Sync {
    /// Asks the provider to debit the driver. Returns once the provider has
    /// accepted the request; the outcome arrives later as a callback.
    fn request_debit(&self, request: &DebitRequest) -> Result<GatewayAck, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackOutcome {
    Confirmed,
    Declined { reason: String },
}

impl CallbackOutcome {
    fn label(&self) -> &'static str {
        match self {
            CallbackOutcome::Confirmed => "CONFIRMED",
            CallbackOutcome::Declined { .. } => "DECLINED",
        }
    }
}

/// Provider webhook body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCallback {
    pub attempt_id: AttemptId,
    pub driver_id: DriverId,
    pub outcome: CallbackOutcome,
    /// Hex HMAC-SHA256 over `attempt|driver|outcome`.
    pub signature: String,
}

impl PaymentCallback {
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Signs and verifies provider callbacks with a shared secret.
#[derive(Clone)]
pub struct CallbackAuthenticator {
    mac: HmacSha256,
}

impl CallbackAuthenticator {
    pub fn new(secret: &[u8]) -> Result<Self, LedgerError> {
        if secret.is_empty() {
            return Err(LedgerError::InvalidSettings(
                "callback secret must not be empty".into(),
            ));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| LedgerError::InvalidSettings(format!("callback secret: {e}")))?;
        Ok(Self { mac })
    }

    fn keyed(&self, attempt_id: AttemptId, driver_id: DriverId, outcome: &CallbackOutcome) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(format!("{attempt_id}|{driver_id}|{}", outcome.label()).as_bytes());
        mac
    }

    pub fn sign(&self, attempt_id: AttemptId, driver_id: DriverId, outcome: &CallbackOutcome) -> String {
        hex::encode(
            self.keyed(attempt_id, driver_id, outcome)
                .finalize()
                .into_bytes(),
        )
    }

    /// Constant-time signature check.
    pub fn verify(&self, callback: &PaymentCallback) -> bool {
        let Ok(signature) = hex::decode(callback.signature.trim()) else {
            return false;
        };
        self.keyed(callback.attempt_id, callback.driver_id, &callback.outcome)
            .verify_slice(&signature)
            .is_ok()
    }

    /// Builds a signed callback, as a provider would send it.
    pub fn signed_callback(
        &self,
        attempt_id: AttemptId,
        driver_id: DriverId,
        outcome: CallbackOutcome,
    ) -> PaymentCallback {
        let signature = self.sign(attempt_id, driver_id, &outcome);
        PaymentCallback {
            attempt_id,
            driver_id,
            outcome,
            signature,
        }
    }
}

impl fmt::Debug for CallbackAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallbackAuthenticator { .. }")
    }
}

/// What the caller must do after an accepted callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEffect {
    /// Apply `amount` against the driver's debt, once per attempt.
    Settle { attempt_id: AttemptId, amount: Decimal },
    /// The attempt failed; the ledger is untouched.
    Failed {
        attempt_id: AttemptId,
        reason: FailureReason,
    },
    /// Nothing to do.
    Ignored,
}

/// Payment attempts for every driver, shared by all sessions.
///
/// Attempts outlive the session that opened them, so a provider
/// confirmation that arrives after the driver left still reaches the
/// ledger. Each driver's attempts sit under one map entry; no entry is held
/// while a gateway is called.
#[derive(Debug, Default)]
pub struct PaymentRegistry {
    attempts: DashMap<DriverId, HashMap<AttemptId, PaymentAttempt>>,
}

impl PaymentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt(&self, driver_id: DriverId, attempt_id: AttemptId) -> Option<PaymentAttempt> {
        self.attempts.get(&driver_id)?.get(&attempt_id).cloned()
    }

    /// Number of attempts kept for a driver.
    pub fn retained(&self, driver_id: DriverId) -> usize {
        self.attempts.get(&driver_id).map_or(0, |attempts| attempts.len())
    }

    /// Processes a provider callback.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UnauthenticatedCallback`] - Signature did not verify.
    /// - [`LedgerError::UnknownAttempt`] - No acknowledged attempt with this ID for this driver.
    /// - [`LedgerError::DuplicateConfirmation`] - Attempt already confirmed.
    /// - [`LedgerError::AttemptVoided`] - Late confirmation for a voided attempt.
    /// - [`LedgerError::InvalidTransition`] - Confirmation for a declined attempt.
    pub fn handle_callback(
        &self,
        callback: &PaymentCallback,
        authenticator: &CallbackAuthenticator,
        now: DateTime<Utc>,
    ) -> Result<CallbackEffect, LedgerError> {
        if !authenticator.verify(callback) {
            tracing::warn!(driver = %callback.driver_id, attempt = %callback.attempt_id, "callback signature rejected");
            return Err(LedgerError::UnauthenticatedCallback);
        }
        let mut driver_attempts = self.attempts.get_mut(&callback.driver_id);
        let attempt = match driver_attempts
            .as_deref_mut()
            .and_then(|attempts| attempts.get_mut(&callback.attempt_id))
        {
            Some(attempt) if attempt.gateway_reference.is_some() => attempt,
            _ => {
                tracing::warn!(driver = %callback.driver_id, attempt = %callback.attempt_id, "callback for unknown attempt");
                return Err(LedgerError::UnknownAttempt);
            }
        };

        match (&callback.outcome, attempt.state) {
            (CallbackOutcome::Confirmed, PaymentState::AwaitingConfirmation) => {
                Ok(confirm(attempt, now))
            }
            (CallbackOutcome::Confirmed, PaymentState::Confirmed) => {
                tracing::warn!(attempt = %attempt.id, "duplicate confirmation ignored");
                Err(LedgerError::DuplicateConfirmation)
            }
            (CallbackOutcome::Confirmed, PaymentState::Cancelled | PaymentState::Failed)
                if attempt.failure != Some(FailureReason::Declined) =>
            {
                if attempt.voided {
                    tracing::warn!(attempt = %attempt.id, "late confirmation for voided attempt ignored");
                    return Err(LedgerError::AttemptVoided);
                }
                tracing::info!(attempt = %attempt.id, state = ?attempt.state, "late confirmation settles abandoned attempt");
                Ok(confirm(attempt, now))
            }
            (CallbackOutcome::Confirmed, _) => {
                Err(LedgerError::InvalidTransition("confirmation for a declined attempt"))
            }
            (CallbackOutcome::Declined { reason }, PaymentState::AwaitingConfirmation) => {
                attempt.state = PaymentState::Failed;
                attempt.failure = Some(FailureReason::Declined);
                tracing::info!(attempt = %attempt.id, %reason, "payment declined");
                Ok(CallbackEffect::Failed {
                    attempt_id: attempt.id,
                    reason: FailureReason::Declined,
                })
            }
            (CallbackOutcome::Declined { .. }, PaymentState::Confirmed) => {
                Err(LedgerError::InvalidTransition("decline for a confirmed attempt"))
            }
            (CallbackOutcome::Declined { .. }, _) => Ok(CallbackEffect::Ignored),
        }
    }
}

fn confirm(attempt: &mut PaymentAttempt, now: DateTime<Utc>) -> CallbackEffect {
    attempt.state = PaymentState::Confirmed;
    attempt.confirmed_at = Some(now);
    attempt.failure = None;
    tracing::info!(driver = %attempt.driver_id, attempt = %attempt.id, amount = %attempt.amount, "payment confirmed");
    CallbackEffect::Settle {
        attempt_id: attempt.id,
        amount: attempt.amount,
    }
}

/// One driver's payment attempts, backed by the shared registry.
#[derive(Debug)]
pub struct PaymentFlow {
    driver_id: DriverId,
    currency: Currency,
    timeout: Duration,
    registry: Arc<PaymentRegistry>,
}

impl PaymentFlow {
    pub fn new(
        driver_id: DriverId,
        currency: Currency,
        timeout: Duration,
        registry: Arc<PaymentRegistry>,
    ) -> Self {
        Self {
            driver_id,
            currency,
            timeout,
            registry,
        }
    }

    pub fn attempt(&self, attempt_id: AttemptId) -> Option<PaymentAttempt> {
        self.registry.attempt(self.driver_id, attempt_id)
    }

    /// The attempt currently in flight, if any.
    pub fn active(&self) -> Option<PaymentAttempt> {
        let attempts = self.registry.attempts.get(&self.driver_id)?;
        attempts.values().find(|a| a.state.is_in_flight()).cloned()
    }

    /// Opens a new attempt for `amount` against `outstanding` debt.
    ///
    /// `amount` may exceed `outstanding` by one minor unit of the currency
    /// to absorb provider rounding. Finished attempts that no callback can
    /// change any more are dropped here.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - Not positive, or above the outstanding debt.
    /// - [`LedgerError::PaymentInProgress`] - Another attempt is in flight.
    pub fn initiate(
        &self,
        provider: Provider,
        amount: Decimal,
        outstanding: Decimal,
        now: DateTime<Utc>,
    ) -> Result<AttemptId, LedgerError> {
        let ceiling = outstanding
            .checked_add(self.currency.minor_unit())
            .unwrap_or(Decimal::MAX);
        if amount <= Decimal::ZERO || amount > ceiling {
            return Err(LedgerError::InvalidAmount);
        }

        let mut attempts = self.registry.attempts.entry(self.driver_id).or_default();
        if attempts.values().any(|a| a.state.is_in_flight()) {
            return Err(LedgerError::PaymentInProgress);
        }
        attempts.retain(|_, attempt| attempt.awaits_late_confirmation());

        let attempt = PaymentAttempt {
            id: AttemptId::new(),
            driver_id: self.driver_id,
            amount,
            currency: self.currency,
            provider,
            state: PaymentState::Initiated,
            created_at: now,
            deadline: None,
            confirmed_at: None,
            gateway_reference: None,
            failure: None,
            voided: false,
        };
        let id = attempt.id;
        tracing::info!(driver = %self.driver_id, attempt = %id, %provider, %amount, "payment initiated");
        attempts.insert(id, attempt);
        Ok(id)
    }

    /// Sends the debit request and waits for the provider to accept it.
    ///
    /// A gateway error returns the attempt to `Idle`; the driver starts a
    /// fresh attempt to retry. An acknowledgement for an attempt cancelled
    /// meanwhile is still recorded, so its late confirmation can settle.
    pub fn submit(
        &self,
        attempt_id: AttemptId,
        gateway: &dyn PaymentGateway,
        now: DateTime<Utc>,
    ) -> Result<PaymentAttempt, LedgerError> {
        let request = {
            let attempts = self
                .registry
                .attempts
                .get(&self.driver_id)
                .ok_or(LedgerError::UnknownAttempt)?;
            let attempt = attempts.get(&attempt_id).ok_or(LedgerError::UnknownAttempt)?;
            if attempt.state != PaymentState::Initiated {
                return Err(LedgerError::InvalidTransition("debit already requested"));
            }
            DebitRequest {
                attempt_id,
                driver_id: attempt.driver_id,
                amount: attempt.amount,
                currency: attempt.currency,
                provider: attempt.provider,
            }
        };

        let result = gateway.request_debit(&request);

        let mut attempts = self
            .registry
            .attempts
            .get_mut(&self.driver_id)
            .ok_or(LedgerError::UnknownAttempt)?;
        let attempt = attempts
            .get_mut(&attempt_id)
            .ok_or(LedgerError::UnknownAttempt)?;
        match result {
            Ok(ack) => {
                attempt.gateway_reference = Some(ack.reference);
                attempt.deadline = now.checked_add_signed(self.timeout);
                if attempt.state == PaymentState::Initiated {
                    attempt.state = PaymentState::AwaitingConfirmation;
                }
                tracing::info!(driver = %attempt.driver_id, attempt = %attempt_id, "awaiting provider confirmation");
                Ok(attempt.clone())
            }
            Err(e) => {
                if attempt.state == PaymentState::Initiated {
                    attempt.state = PaymentState::Idle;
                }
                tracing::warn!(driver = %attempt.driver_id, attempt = %attempt_id, error = %e, "debit request failed");
                Err(LedgerError::PaymentInitiationFailed(e.to_string()))
            }
        }
    }

    /// Driver abandons an in-flight attempt.
    pub fn cancel(&self, attempt_id: AttemptId) -> Result<(), LedgerError> {
        self.update(attempt_id, |attempt| match attempt.state {
            PaymentState::Initiated | PaymentState::AwaitingConfirmation => {
                attempt.state = PaymentState::Cancelled;
                tracing::info!(attempt = %attempt_id, "payment cancelled");
                Ok(())
            }
            PaymentState::Confirmed => Err(LedgerError::InvalidTransition(
                "confirmed attempt cannot be cancelled",
            )),
            _ => Err(LedgerError::InvalidTransition("attempt is not in flight")),
        })
    }

    /// Marks an attempt so that a late confirmation is refused.
    ///
    /// An in-flight attempt is cancelled as well.
    pub fn void(&self, attempt_id: AttemptId) -> Result<(), LedgerError> {
        self.update(attempt_id, |attempt| match attempt.state {
            PaymentState::Confirmed => Err(LedgerError::InvalidTransition(
                "confirmed attempt cannot be voided",
            )),
            state => {
                if state.is_in_flight() {
                    attempt.state = PaymentState::Cancelled;
                }
                attempt.voided = true;
                tracing::info!(attempt = %attempt_id, "payment voided");
                Ok(())
            }
        })
    }

    /// Fails every awaiting attempt whose deadline has passed.
    pub fn expire_overdue(&self, now: DateTime<Utc>) -> Vec<AttemptId> {
        let Some(mut attempts) = self.registry.attempts.get_mut(&self.driver_id) else {
            return Vec::new();
        };
        let mut expired = Vec::new();
        for attempt in attempts.values_mut() {
            let overdue = attempt.deadline.is_some_and(|deadline| deadline <= now);
            if attempt.state == PaymentState::AwaitingConfirmation && overdue {
                attempt.state = PaymentState::Failed;
                attempt.failure = Some(FailureReason::TimedOut);
                tracing::info!(driver = %attempt.driver_id, attempt = %attempt.id, "payment timed out");
                expired.push(attempt.id);
            }
        }
        expired
    }

    fn update<R>(
        &self,
        attempt_id: AttemptId,
        apply: impl FnOnce(&mut PaymentAttempt) -> Result<R, LedgerError>,
    ) -> Result<R, LedgerError> {
        let mut attempts = self
            .registry
            .attempts
            .get_mut(&self.driver_id)
            .ok_or(LedgerError::UnknownAttempt)?;
        let attempt = attempts
            .get_mut(&attempt_id)
            .ok_or(LedgerError::UnknownAttempt)?;
        apply(attempt)
    }
}
