//! IRC session management
//!
//! Connecting, registration, the per-session workers and the registry
//! that owns live sessions.

pub mod backoff;
pub mod connection;
pub mod handle;
pub mod nickname;
pub mod rate_limit;
pub mod registry;
pub mod state;

pub use backoff::RetryPolicy;
pub use connection::{BoxedStream, ConnectionManager, DialedStream, Dialer, TcpDialer};
pub use handle::{Session, SessionEvent, SessionParams};
pub use rate_limit::RateLimiter;
pub use registry::SessionRegistry;
pub use state::{ConnectionState, SessionId, SessionStatus};
