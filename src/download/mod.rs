//! Candidate download with fallback

pub mod coordinator;

pub use coordinator::DownloadCoordinator;
