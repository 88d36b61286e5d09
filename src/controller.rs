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

//! Per-driver session controller.
//!
//! A [`GateController`] owns everything one driver session needs: the
//! ledger cache, the verification pipeline, the payment flow and the
//! current [`DriverMode`]. Every input re-evaluates eligibility before it
//! returns, so a debt increase that crosses the limit switches the driver
//! to [`DriverMode::Blocked`] within the same call.
//!
//! # Thread Safety
//!
//! Session state sits behind one mutex. Store writes are made before the
//! session lock is taken where possible; the lock is never held while
//! waiting on the notification channel.

use crate::account::{DriverRecord, VerificationStatus};
use crate::base::{AttemptId, Currency, DriverId, TripId};
use crate::config::AdminSettings;
use crate::eligibility::{EligibilityDecision, evaluate};
use crate::error::LedgerError;
use crate::gate::{DriverMode, select_mode};
use crate::kyc::{CapturedImage, DocumentUploader, KycState, KycStep, VerificationPipeline};
use crate::notification::{ChangeNotification, Subscription};
use crate::payment::{
    CallbackAuthenticator, CallbackEffect, PaymentAttempt, PaymentCallback, PaymentFlow,
    PaymentGateway, Provider,
};
use crate::settlement::TripSettlement;
use crate::store::LedgerStore;
use crate::sync::{LedgerSynchronizer, SyncOutcome};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// Shared services a session is opened against.
#[derive(Clone)]
pub struct SessionContext {
    pub store: Arc<LedgerStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub uploader: Arc<dyn DocumentUploader>,
    pub authenticator: CallbackAuthenticator,
    pub settings: Arc<AdminSettings>,
}

struct Session {
    sync: LedgerSynchronizer,
    kyc: VerificationPipeline,
    payments: PaymentFlow,
    decision: EligibilityDecision,
    mode: DriverMode,
}

impl Session {
    fn new(record: &DriverRecord, context: &SessionContext) -> Self {
        let settings = &context.settings;
        let mut sync = LedgerSynchronizer::new(record, settings.threshold_for(&record.region));
        if let Some(edit) = context.store.threshold_edit(&record.region) {
            sync.apply_threshold(&edit);
        }
        let decision = evaluate(sync.debt(), sync.threshold(), sync.status());
        let mode = select_mode(&decision, sync.status(), sync.debt(), sync.threshold());
        Self {
            kyc: VerificationPipeline::from_status(record.verification_status),
            payments: PaymentFlow::new(
                record.driver_id,
                record.currency,
                settings.payment_timeout(),
                Arc::clone(context.store.payments()),
            ),
            sync,
            decision,
            mode,
        }
    }

    fn absorb(&mut self, notification: &ChangeNotification) -> SyncOutcome {
        let outcome = self.sync.apply(notification);
        if let SyncOutcome::Applied(change) = &outcome {
            if change.status_changed() {
                self.align_verification(change.status);
            }
            if change.debt_increased() {
                tracing::debug!(driver = %self.sync.driver_id(), debt = %change.debt, "debt increased");
            }
        }
        outcome
    }

    fn absorb_record(&mut self, record: &DriverRecord) {
        if let SyncOutcome::Applied(change) = self.sync.apply_record(record) {
            if change.status_changed() {
                self.align_verification(change.status);
            }
        }
    }

    /// Brings the pipeline in line with an authoritative status.
    fn align_verification(&mut self, status: VerificationStatus) {
        if self.kyc.status() == status {
            return;
        }
        if self.kyc.apply_decision(status).is_err() {
            self.kyc = VerificationPipeline::from_status(status);
        }
    }

    fn reevaluate(&mut self) -> &DriverMode {
        let (debt, status, threshold) = (self.sync.debt(), self.sync.status(), self.sync.threshold());
        let decision = evaluate(debt, threshold, status);
        let mode = select_mode(&decision, status, debt, threshold);
        if mode.name() != self.mode.name() {
            tracing::info!(
                driver = %self.sync.driver_id(),
                from = self.mode.name(),
                to = mode.name(),
                reason = decision.reason_code.as_str(),
                "driver mode switched"
            );
        }
        self.decision = decision;
        self.mode = mode;
        &self.mode
    }
}

/// One driver's session.
pub struct GateController {
    driver_id: DriverId,
    currency: Currency,
    context: SessionContext,
    session: Mutex<Session>,
    subscription: Subscription,
}

impl GateController {
    /// Opens a session: subscribes to changes, then reads the driver row.
    ///
    /// Subscribing first means no committed write can fall between the read
    /// and the subscription.
    pub fn open(driver_id: DriverId, context: SessionContext) -> Result<Self, LedgerError> {
        let subscription = context.store.subscribe(driver_id);
        let record = context.store.fetch(driver_id)?;
        if !record.active {
            return Err(LedgerError::AccountDeactivated);
        }
        let session = Session::new(&record, &context);
        tracing::info!(
            driver = %driver_id,
            mode = session.mode.name(),
            debt = %record.commission_debt,
            "session opened"
        );
        Ok(Self {
            driver_id,
            currency: record.currency,
            context,
            session: Mutex::new(session),
            subscription,
        })
    }

    pub fn driver_id(&self) -> DriverId {
        self.driver_id
    }

    pub fn mode(&self) -> DriverMode {
        self.session.lock().mode.clone()
    }

    pub fn decision(&self) -> EligibilityDecision {
        self.session.lock().decision.clone()
    }

    /// Cached debt as last seen by this session.
    pub fn debt(&self) -> Decimal {
        self.session.lock().sync.debt()
    }

    pub fn verification_state(&self) -> KycState {
        self.session.lock().kyc.state()
    }

    pub fn payment(&self, attempt_id: AttemptId) -> Option<PaymentAttempt> {
        self.session.lock().payments.attempt(attempt_id)
    }

    pub fn active_payment(&self) -> Option<PaymentAttempt> {
        self.session.lock().payments.active()
    }

    /// Applies every queued notification without blocking.
    pub fn pump(&self) -> DriverMode {
        let pending = self.subscription.drain();
        self.absorb_all(&pending)
    }

    /// Waits at most `timeout` for a notification, then applies it along
    /// with anything else queued. Returns `None` on timeout.
    pub fn wait_for_update(&self, timeout: Duration) -> Option<DriverMode> {
        let first = self.subscription.next_timeout(timeout)?;
        let mut pending = vec![first];
        pending.extend(self.subscription.drain());
        Some(self.absorb_all(&pending))
    }

    fn absorb_all(&self, notifications: &[ChangeNotification]) -> DriverMode {
        let mut session = self.session.lock();
        for notification in notifications {
            session.absorb(notification);
        }
        session.reevaluate().clone()
    }

    /// Settles a completed trip's commission against this driver.
    pub fn complete_trip(&self, trip_id: TripId, gross_fare: Decimal) -> Result<DriverMode, LedgerError> {
        let settlement = TripSettlement::new(
            trip_id,
            self.driver_id,
            gross_fare,
            self.context.settings.commission_rate,
            self.currency,
            Utc::now(),
        )?;
        let record = self.context.store.record_trip(settlement)?;

        let mut session = self.session.lock();
        session.absorb_record(&record);
        Ok(session.reevaluate().clone())
    }

    pub fn capture_document(&self, image: CapturedImage) -> Result<KycStep, LedgerError> {
        self.session.lock().kyc.capture(image)
    }

    pub fn advance_verification(&self) -> Result<KycState, LedgerError> {
        self.session.lock().kyc.advance()
    }

    /// Uploads the captured documents and marks the driver pending review.
    ///
    /// If the store refuses the status change, the pipeline goes back to
    /// `Submitting` with its captures so the submission can be retried.
    pub fn submit_verification(&self) -> Result<DriverMode, LedgerError> {
        let mut session = self.session.lock();
        let checkpoint = session.kyc.clone();
        session
            .kyc
            .submit(self.context.uploader.as_ref(), self.driver_id)?;
        self.store_verification(&mut session, checkpoint, VerificationStatus::Pending)
    }

    /// Starts verification over after a rejection.
    pub fn restart_verification(&self) -> Result<DriverMode, LedgerError> {
        let mut session = self.session.lock();
        let checkpoint = session.kyc.clone();
        session.kyc.restart()?;
        self.store_verification(&mut session, checkpoint, VerificationStatus::NotStarted)
    }

    /// Writes a pipeline transition through to the store, restoring
    /// `checkpoint` if the write fails.
    fn store_verification(
        &self,
        session: &mut Session,
        checkpoint: VerificationPipeline,
        status: VerificationStatus,
    ) -> Result<DriverMode, LedgerError> {
        match self.context.store.set_verification_status(self.driver_id, status) {
            Ok(record) => {
                session.absorb_record(&record);
                Ok(session.reevaluate().clone())
            }
            Err(e) => {
                tracing::warn!(driver = %self.driver_id, status = status.as_str(), error = %e, "verification status not stored");
                session.kyc = checkpoint;
                Err(e)
            }
        }
    }

    /// Opens a payment attempt and sends the debit request to the provider.
    pub fn start_payment(&self, provider: Provider, amount: Decimal) -> Result<PaymentAttempt, LedgerError> {
        let mut session = self.session.lock();
        let now = Utc::now();
        let outstanding = session.sync.debt();
        let attempt_id = session
            .payments
            .initiate(provider, amount, outstanding, now)?;
        session
            .payments
            .submit(attempt_id, self.context.gateway.as_ref(), now)
    }

    pub fn cancel_payment(&self, attempt_id: AttemptId) -> Result<(), LedgerError> {
        self.session.lock().payments.cancel(attempt_id)
    }

    pub fn void_payment(&self, attempt_id: AttemptId) -> Result<(), LedgerError> {
        self.session.lock().payments.void(attempt_id)
    }

    /// Processes a provider callback and settles the ledger on confirmation.
    ///
    /// Callbacks for drivers without a session go straight to
    /// [`LedgerStore::apply_payment_callback`].
    pub fn handle_payment_callback(&self, callback: &PaymentCallback) -> Result<DriverMode, LedgerError> {
        if callback.driver_id != self.driver_id {
            tracing::warn!(driver = %self.driver_id, other = %callback.driver_id, "callback routed to another driver's session");
            return Err(LedgerError::UnknownAttempt);
        }
        let mut session = self.session.lock();
        let (effect, record) = self
            .context
            .store
            .apply_payment_callback(callback, &self.context.authenticator)?;
        match (effect, record) {
            (_, Some(record)) => session.absorb_record(&record),
            // Settled earlier; take whatever the store has published since.
            (CallbackEffect::Settle { .. }, None) => {
                for notification in self.subscription.drain() {
                    session.absorb(&notification);
                }
            }
            _ => {}
        }
        Ok(session.reevaluate().clone())
    }

    /// Times out payments whose deadline has passed.
    pub fn expire_payments(&self, now: DateTime<Utc>) -> Vec<AttemptId> {
        self.session.lock().payments.expire_overdue(now)
    }

    /// Ends the session and tears down its subscription.
    pub fn close(self) {
        tracing::info!(driver = %self.driver_id, "session closed");
    }
}
