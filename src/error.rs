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

//! Error types for ledger, verification and settlement processing.

use thiserror::Error;

/// Ledger processing errors.
///
/// No variant is fatal to the process; each one aborts a single operation
/// and leaves the affected state machine in a retry-capable state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Commission rate outside `[0, 1]` or negative fare
    #[error("invalid commission rate or fare")]
    InvalidRate,

    /// Payment amount is zero, negative or exceeds the outstanding debt
    #[error("invalid amount (must be positive and within outstanding debt)")]
    InvalidAmount,

    /// Debt limit is zero or negative
    #[error("debt threshold misconfigured (limit must be positive)")]
    ThresholdMisconfigured,

    /// Admin settings failed validation
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// Gateway did not acknowledge the debit request
    #[error("payment initiation failed: {0}")]
    PaymentInitiationFailed(String),

    /// Another attempt for this driver is still in flight
    #[error("a payment attempt is already in progress")]
    PaymentInProgress,

    /// Callback references an attempt this driver never had acknowledged
    #[error("unknown payment attempt")]
    UnknownAttempt,

    /// Attempt has already been settled
    #[error("duplicate payment confirmation")]
    DuplicateConfirmation,

    /// Callback signature did not verify
    #[error("unauthenticated payment callback")]
    UnauthenticatedCallback,

    /// Attempt was explicitly voided; late confirmations are ignored
    #[error("payment attempt was voided")]
    AttemptVoided,

    /// Trip has already been settled
    #[error("duplicate trip settlement")]
    DuplicateSettlement,

    /// Captured image is empty or unreadable
    #[error("verification image rejected")]
    ImageRejected,

    /// Current verification step has no captured image
    #[error("no image captured for the current verification step")]
    MissingCapture,

    /// Document upload did not complete
    #[error("verification upload failed: {0}")]
    UploadFailed(String),

    /// Requested transition is not allowed from the current state
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// Driver account does not exist
    #[error("driver not found")]
    DriverNotFound,

    /// Driver account already exists
    #[error("driver already registered")]
    DriverExists,

    /// Driver account has been deactivated
    #[error("driver account is deactivated")]
    AccountDeactivated,
}

/// Broad error category, used to route errors to logs, admins or drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Gateway,
    Reconciliation,
    Configuration,
    Security,
    State,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRate | Self::InvalidAmount | Self::ImageRejected | Self::MissingCapture => {
                ErrorKind::Validation
            }
            Self::PaymentInitiationFailed(_) | Self::UploadFailed(_) => ErrorKind::Gateway,
            Self::DuplicateSettlement => ErrorKind::Reconciliation,
            Self::ThresholdMisconfigured | Self::InvalidSettings(_) => ErrorKind::Configuration,
            Self::UnknownAttempt
            | Self::DuplicateConfirmation
            | Self::UnauthenticatedCallback
            | Self::AttemptVoided => ErrorKind::Security,
            Self::InvalidTransition(_)
            | Self::PaymentInProgress
            | Self::DriverNotFound
            | Self::DriverExists
            | Self::AccountDeactivated => ErrorKind::State,
        }
    }

    /// Whether the driver should be shown this error.
    ///
    /// Payment declines and timeouts surface through the attempt state
    /// rather than as errors.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::PaymentInitiationFailed(_)
                | Self::ImageRejected
                | Self::UploadFailed(_)
                | Self::InvalidAmount
        )
    }
}
