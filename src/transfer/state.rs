//! Transfer state module
//!
//! Per-attempt bookkeeping for a DCC download. Phases only move forward.

use std::path::PathBuf;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::{IrcBookError, Result, TransferErrorKind};

/// Phase of one transfer attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    /// Offer accepted, socket not open yet
    Pending,
    /// Receiving bytes
    Transferring,
    /// Comparing received and declared size
    Verifying,
    /// Pulling target members out of an archive
    Extracting,
    /// Terminal success
    Succeeded,
    /// Terminal failure
    Failed,
}

impl TransferPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferPhase::Succeeded | TransferPhase::Failed)
    }

    /// Whether `next` is a legal successor of this phase
    pub fn can_advance_to(&self, next: TransferPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TransferPhase::Failed => true,
            TransferPhase::Succeeded => matches!(self, TransferPhase::Verifying | TransferPhase::Extracting),
            _ => next > *self,
        }
    }
}

impl Default for TransferPhase {
    fn default() -> Self {
        TransferPhase::Pending
    }
}

/// State of one download attempt
#[derive(Debug, Clone, Serialize)]
pub struct TransferState {
    pub filename: String,
    pub source: Option<String>,
    pub bytes_received: u64,
    pub expected_size: u64,
    pub temp_path: Option<PathBuf>,
    phase: TransferPhase,
    failure: Option<TransferErrorKind>,
}

impl TransferState {
    pub fn new(filename: impl Into<String>, expected_size: u64) -> Self {
        Self {
            filename: filename.into(),
            source: None,
            bytes_received: 0,
            expected_size,
            temp_path: None,
            phase: TransferPhase::Pending,
            failure: None,
        }
    }

    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    pub fn failure(&self) -> Option<TransferErrorKind> {
        self.failure
    }

    /// Move to the next phase; backward moves and moves out of a
    /// terminal phase are rejected
    pub fn advance(&mut self, next: TransferPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            error!("Illegal transfer transition {:?} -> {:?} for {}", self.phase, next, self.filename);
            return Err(IrcBookError::protocol_error(format!(
                "Illegal transfer transition {:?} -> {:?}",
                self.phase, next
            )));
        }
        debug!("Transfer {}: {:?} -> {:?}", self.filename, self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Mark the attempt failed unless it already finished
    pub fn fail(&mut self, kind: TransferErrorKind) {
        if self.phase.is_terminal() {
            return;
        }
        self.phase = TransferPhase::Failed;
        self.failure = Some(kind);
    }

    /// Received fraction in percent
    pub fn percent(&self) -> f64 {
        if self.expected_size == 0 {
            return 0.0;
        }
        (self.bytes_received as f64 / self.expected_size as f64) * 100.0
    }
}
