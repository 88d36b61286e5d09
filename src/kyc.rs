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

//! Identity verification (KYC) pipeline.
//!
//! ```text
//!  IdFront ─► IdBack ─► SelfieWithId ─► FaceCloseup ─► Submitting ─► Pending ─┬─► Verified
//!     ▲                                                   │  ▲                └─► Rejected
//!     │                                                   └──┘ upload failed      │
//!     └──────────────────────── restart (captures discarded) ─────────────────────┘
//! ```
//!
//! Advancing needs a capture for the current step, checked locally. The
//! four captures upload as one request; a failed upload keeps the pipeline
//! in `Submitting` with every capture intact. `Pending` only moves on when a
//! decision arrives through the notification channel.

use crate::account::VerificationStatus;
use crate::base::DriverId;
use crate::error::LedgerError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KycStep {
    IdFront,
    IdBack,
    SelfieWithId,
    FaceCloseup,
}

impl KycStep {
    pub const ALL: [KycStep; 4] = [
        KycStep::IdFront,
        KycStep::IdBack,
        KycStep::SelfieWithId,
        KycStep::FaceCloseup,
    ];

    fn next(self) -> Option<KycStep> {
        match self {
            KycStep::IdFront => Some(KycStep::IdBack),
            KycStep::IdBack => Some(KycStep::SelfieWithId),
            KycStep::SelfieWithId => Some(KycStep::FaceCloseup),
            KycStep::FaceCloseup => None,
        }
    }

    /// One-based position, for "step n of 4" prompts.
    pub fn position(self) -> usize {
        self as usize + 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KycStep::IdFront => "ID_FRONT",
            KycStep::IdBack => "ID_BACK",
            KycStep::SelfieWithId => "SELFIE_WITH_ID",
            KycStep::FaceCloseup => "FACE_CLOSEUP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KycState {
    Capturing(KycStep),
    Submitting,
    Pending,
    Verified,
    Rejected,
}

/// A captured photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl CapturedImage {
    pub fn new(content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            bytes,
        }
    }
}

/// All four artifacts, uploaded together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KycBundle {
    pub id_front: CapturedImage,
    pub id_back: CapturedImage,
    pub selfie_with_id: CapturedImage,
    pub face_closeup: CapturedImage,
}

/// Receives a driver's verification documents.
pub trait DocumentUploader: Send + Sync {
    /// Uploads the bundle atomically. Either every artifact is stored or the
    /// call fails.
    fn upload(&self, driver_id: DriverId, bundle: &KycBundle) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct VerificationPipeline {
    state: KycState,
    captures: BTreeMap<KycStep, CapturedImage>,
    failed_uploads: u32,
}

impl VerificationPipeline {
    pub fn new() -> Self {
        Self {
            state: KycState::Capturing(KycStep::IdFront),
            captures: BTreeMap::new(),
            failed_uploads: 0,
        }
    }

    /// Resumes from a stored status. Captures never survive a restart of
    /// the session, so `NotStarted` always begins at the first step.
    pub fn from_status(status: VerificationStatus) -> Self {
        let mut pipeline = Self::new();
        pipeline.state = match status {
            VerificationStatus::NotStarted => KycState::Capturing(KycStep::IdFront),
            VerificationStatus::Pending => KycState::Pending,
            VerificationStatus::Verified => KycState::Verified,
            VerificationStatus::Rejected => KycState::Rejected,
        };
        pipeline
    }

    pub fn state(&self) -> KycState {
        self.state
    }

    pub fn status(&self) -> VerificationStatus {
        match self.state {
            KycState::Capturing(_) | KycState::Submitting => VerificationStatus::NotStarted,
            KycState::Pending => VerificationStatus::Pending,
            KycState::Verified => VerificationStatus::Verified,
            KycState::Rejected => VerificationStatus::Rejected,
        }
    }

    pub fn capture_for(&self, step: KycStep) -> Option<&CapturedImage> {
        self.captures.get(&step)
    }

    pub fn capture_count(&self) -> usize {
        self.captures.len()
    }

    pub fn failed_uploads(&self) -> u32 {
        self.failed_uploads
    }

    /// Stores `image` for the current step, replacing any earlier capture.
    pub fn capture(&mut self, image: CapturedImage) -> Result<KycStep, LedgerError> {
        let KycState::Capturing(step) = self.state else {
            return Err(LedgerError::InvalidTransition("capture outside a capture step"));
        };
        if image.bytes.is_empty() {
            return Err(LedgerError::ImageRejected);
        }
        self.captures.insert(step, image);
        Ok(step)
    }

    /// Moves to the next step, or to `Submitting` after the last one.
    pub fn advance(&mut self) -> Result<KycState, LedgerError> {
        let KycState::Capturing(step) = self.state else {
            return Err(LedgerError::InvalidTransition("advance outside a capture step"));
        };
        if !self.captures.contains_key(&step) {
            return Err(LedgerError::MissingCapture);
        }
        self.state = match step.next() {
            Some(next) => KycState::Capturing(next),
            None => KycState::Submitting,
        };
        Ok(self.state)
    }

    /// Uploads all captures as one request.
    ///
    /// On failure the pipeline stays in `Submitting` with its captures, so
    /// the driver retries the upload rather than the photos.
    pub fn submit(
        &mut self,
        uploader: &dyn DocumentUploader,
        driver_id: DriverId,
    ) -> Result<KycState, LedgerError> {
        if self.state != KycState::Submitting {
            return Err(LedgerError::InvalidTransition("submit outside the submitting step"));
        }
        let bundle = self.bundle().ok_or(LedgerError::MissingCapture)?;

        if let Err(reason) = uploader.upload(driver_id, &bundle) {
            self.failed_uploads += 1;
            tracing::warn!(driver = %driver_id, attempts = self.failed_uploads, %reason, "verification upload failed");
            return Err(LedgerError::UploadFailed(reason));
        }

        tracing::info!(driver = %driver_id, "verification documents submitted");
        self.state = KycState::Pending;
        Ok(self.state)
    }

    /// Applies a reviewer's decision. Only meaningful while `Pending`;
    /// a decision matching the current terminal state is a no-op.
    pub fn apply_decision(&mut self, status: VerificationStatus) -> Result<KycState, LedgerError> {
        self.state = match (self.state, status) {
            (KycState::Pending, VerificationStatus::Verified) => KycState::Verified,
            (KycState::Pending, VerificationStatus::Rejected) => KycState::Rejected,
            (current, next) if self.status() == next => current,
            _ => return Err(LedgerError::InvalidTransition("decision without a pending review")),
        };
        Ok(self.state)
    }

    /// Starts over after a rejection, discarding every capture.
    pub fn restart(&mut self) -> Result<KycState, LedgerError> {
        if self.state != KycState::Rejected {
            return Err(LedgerError::InvalidTransition("restart is only allowed after rejection"));
        }
        self.captures.clear();
        self.failed_uploads = 0;
        self.state = KycState::Capturing(KycStep::IdFront);
        Ok(self.state)
    }

    fn bundle(&self) -> Option<KycBundle> {
        Some(KycBundle {
            id_front: self.captures.get(&KycStep::IdFront)?.clone(),
            id_back: self.captures.get(&KycStep::IdBack)?.clone(),
            selfie_with_id: self.captures.get(&KycStep::SelfieWithId)?.clone(),
            face_closeup: self.captures.get(&KycStep::FaceCloseup)?.clone(),
        })
    }
}

impl Default for VerificationPipeline {
    fn default() -> Self {
        Self::new()
    }
}
