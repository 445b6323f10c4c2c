//! IRC protocol implementation
//!
//! Message parsing, CTCP framing and the line codec used on the server
//! connection.

pub mod codec;
pub mod ctcp;
pub mod message;

pub use codec::IrcLineCodec;
pub use ctcp::Ctcp;
pub use message::{reply, IrcMessage};
