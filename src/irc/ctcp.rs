//! CTCP framing
//!
//! CTCP requests travel inside PRIVMSG/NOTICE text delimited by `\x01`.
//! The engine needs VERSION (answered) and DCC (forwarded to the transfer
//! layer).

use super::IrcMessage;

/// CTCP delimiter byte
pub const CTCP_DELIM: char = '\x01';

/// A CTCP request or reply extracted from message text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ctcp<'a> {
    /// Upper-cased CTCP command (`VERSION`, `DCC`, ...)
    pub command: String,
    /// Everything after the command, if present
    pub params: Option<&'a str>,
}

impl<'a> Ctcp<'a> {
    /// Extract a CTCP payload; the closing delimiter is optional
    pub fn parse(text: &'a str) -> Option<Self> {
        let inner = text.strip_prefix(CTCP_DELIM)?;
        let inner = inner.strip_suffix(CTCP_DELIM).unwrap_or(inner);
        if inner.is_empty() {
            return None;
        }

        let (command, params) = match inner.split_once(' ') {
            Some((c, p)) => (c, Some(p.trim()).filter(|p| !p.is_empty())),
            None => (inner, None),
        };
        Some(Self {
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    pub fn is_version(&self) -> bool {
        self.command == "VERSION"
    }

    pub fn is_dcc(&self) -> bool {
        self.command == "DCC"
    }
}

/// Wrap a CTCP command in delimiters
pub fn encode(command: &str, params: Option<&str>) -> String {
    match params {
        Some(p) => format!("{}{} {}{}", CTCP_DELIM, command, p, CTCP_DELIM),
        None => format!("{}{}{}", CTCP_DELIM, command, CTCP_DELIM),
    }
}

/// VERSION reply sent as a NOTICE back to the asker
pub fn version_reply(target: &str, version: &str) -> IrcMessage {
    IrcMessage::notice(target, &encode("VERSION", Some(version)))
}
