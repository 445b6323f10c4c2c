//! DCC file transfer
//!
//! Offer parsing, the per-attempt state machine, the receiving engine and
//! archive extraction.

pub mod engine;
pub mod extract;
pub mod offer;
pub mod state;

pub use engine::{DccTransferEngine, LocalFile};
pub use offer::DccOffer;
pub use state::{TransferPhase, TransferState};
