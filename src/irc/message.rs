//! IRC protocol messages
//!
//! Parsing and serialisation of single IRC lines
//! (`[@tags] [:prefix] COMMAND params... [:trailing]`).

use std::fmt;
use tracing::trace;

/// Numeric replies the client reacts to
pub mod reply {
    pub const RPL_WELCOME: &str = "001";
    pub const RPL_MYINFO: &str = "004";
    pub const RPL_ENDOFNAMES: &str = "366";
    pub const ERR_ERRONEUSNICKNAME: &str = "432";
    pub const ERR_NICKNAMEINUSE: &str = "433";
    pub const ERR_NICKCOLLISION: &str = "436";
}

/// A parsed IRC message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    /// Source prefix without the leading colon
    pub prefix: Option<String>,
    /// Command word or three digit numeric, upper-cased
    pub command: String,
    /// Parameters, the trailing one included without its colon
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Create a message without prefix
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command: command.into(),
            params,
        }
    }

    /// Parse one line; returns `None` for empty or command-less input
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']).trim_start();

        // IRCv3 message tags carry nothing the engine needs
        if rest.starts_with('@') {
            let (_, after) = rest.split_once(' ')?;
            rest = after.trim_start();
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (p, after) = stripped.split_once(' ')?;
            prefix = Some(p.to_string());
            rest = after.trim_start();
        }

        let (command, mut rest) = match rest.split_once(' ') {
            Some((c, r)) => (c, r),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, after)) => {
                    params.push(param.to_string());
                    rest = after;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        trace!("Parsed IRC command {} with {} params", command, params.len());
        Some(Self {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Nickname part of the prefix (`nick!user@host`)
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split_once('!').map_or(prefix, |(nick, _)| nick))
    }

    /// Last parameter, usually the message text
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Parameter at `index`
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Whether the command is a three digit numeric reply
    pub fn is_numeric(&self) -> bool {
        self.command.len() == 3 && self.command.bytes().all(|b| b.is_ascii_digit())
    }

    /// Serialise without the line terminator
    pub fn to_line(&self) -> String {
        self.to_string()
    }

    pub fn nick(nickname: &str) -> Self {
        Self::new("NICK", vec![nickname.to_string()])
    }

    pub fn user(username: &str, realname: &str) -> Self {
        Self::new(
            "USER",
            vec![username.to_string(), "0".to_string(), "*".to_string(), realname.to_string()],
        )
    }

    pub fn join(channel: &str) -> Self {
        Self::new("JOIN", vec![channel.to_string()])
    }

    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new("PRIVMSG", vec![target.to_string(), text.to_string()])
    }

    pub fn notice(target: &str, text: &str) -> Self {
        Self::new("NOTICE", vec![target.to_string(), text.to_string()])
    }

    pub fn ping(token: &str) -> Self {
        Self::new("PING", vec![token.to_string()])
    }

    pub fn pong(token: &str) -> Self {
        Self::new("PONG", vec![token.to_string()])
    }

    pub fn quit(reason: &str) -> Self {
        Self::new("QUIT", vec![reason.to_string()])
    }
}

impl fmt::Display for IrcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        f.write_str(&self.command)?;

        let count = self.params.len();
        for (i, param) in self.params.iter().enumerate() {
            let last = i + 1 == count;
            if last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_privmsg_with_prefix() {
        let msg = IrcMessage::parse(":Ook!ook@only.ook PRIVMSG #ebooks :!Ook Some Book.epub\r\n").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("Ook!ook@only.ook"));
        assert_eq!(msg.source_nick(), Some("Ook"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#ebooks", "!Ook Some Book.epub"]);
        assert_eq!(msg.trailing(), Some("!Ook Some Book.epub"));
    }

    #[test]
    fn test_parse_numeric() {
        let msg = IrcMessage::parse(":irc.test 433 * reader :Nickname is already in use").unwrap();
        assert!(msg.is_numeric());
        assert_eq!(msg.command, reply::ERR_NICKNAMEINUSE);
        assert_eq!(msg.param(1), Some("reader"));
    }

    #[test]
    fn test_parse_without_prefix_and_tags() {
        let msg = IrcMessage::parse("PING :irc.test").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.params, vec!["irc.test"]);

        let msg = IrcMessage::parse("@time=2024-01-01T00:00:00Z :srv NOTICE * :hello there").unwrap();
        assert_eq!(msg.command, "NOTICE");
        assert_eq!(msg.trailing(), Some("hello there"));
    }

    #[test]
    fn test_parse_server_nick_without_user() {
        let msg = IrcMessage::parse(":irc.test NOTICE * :*** Looking up your hostname").unwrap();
        assert_eq!(msg.source_nick(), Some("irc.test"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(IrcMessage::parse("").is_none());
        assert!(IrcMessage::parse("   ").is_none());
        assert!(IrcMessage::parse(":prefix-only").is_none());
    }

    #[test]
    fn test_parse_lowercase_command() {
        let msg = IrcMessage::parse("privmsg #c :hi").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
    }

    #[test]
    fn test_serialise() {
        assert_eq!(IrcMessage::nick("reader").to_line(), "NICK reader");
        assert_eq!(IrcMessage::user("reader", "reader").to_line(), "USER reader 0 * reader");
        assert_eq!(
            IrcMessage::privmsg("#ebooks", "@search jane doe").to_line(),
            "PRIVMSG #ebooks :@search jane doe"
        );
        assert_eq!(IrcMessage::pong("irc.test").to_line(), "PONG irc.test");
        assert_eq!(IrcMessage::quit("").to_line(), "QUIT :");
    }
}
