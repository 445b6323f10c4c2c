//! ircbook
//!
//! Searches IRC ebook channels through a search bot and downloads the
//! chosen book over DCC, falling back across offering servers.

pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod irc;
pub mod search;
pub mod session;
pub mod transfer;

#[cfg(test)]
mod test_support;

pub use error::{IrcBookError, Result};

pub use config::IrcConfig;
pub use download::DownloadCoordinator;
pub use events::{EventBus, ProgressEvent};
pub use irc::{IrcLineCodec, IrcMessage};
pub use search::{Candidate, SearchCoordinator, SearchQuery, SearchResultParser, SearchScope};
pub use session::{ConnectionManager, Session, SessionId, SessionRegistry, SessionStatus};
pub use transfer::{DccOffer, DccTransferEngine, LocalFile};
pub use cli::{CliArgs, Config, ProgressDisplay};
