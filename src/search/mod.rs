//! Book search
//!
//! Queries, the bot response parser, format ranking, relevance selection,
//! DCC-delivered result listings and the coordinator tying them to a
//! session.

pub mod coordinator;
pub mod format;
pub mod listing;
pub mod parser;
pub mod query;
pub mod relevance;

pub use coordinator::SearchCoordinator;
pub use format::{format_priority, FileFormat};
pub use parser::{Candidate, SearchResultParser};
pub use query::{SearchQuery, SearchScope};
