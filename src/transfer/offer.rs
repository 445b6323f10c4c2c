//! DCC SEND offers
//!
//! `DCC SEND <filename> <ip> <port> <size>` where the filename may be
//! quoted and the IPv4 address is usually sent as a 32-bit integer.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::{debug, warn};

use crate::error::{IrcBookError, Result, TransferErrorKind};
use crate::irc::ctcp::CTCP_DELIM;

/// A parsed DCC SEND offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DccOffer {
    /// Offered filename, as declared by the sender
    pub filename: String,
    /// Peer address to connect to
    pub ip: IpAddr,
    /// Peer port
    pub port: u16,
    /// Declared size in bytes
    pub size: u64,
    /// Nickname that sent the offer, if known
    pub sender: Option<String>,
}

impl DccOffer {
    /// Parse CTCP text (`\x01DCC SEND ...\x01`) or the bare `SEND ...` payload
    pub fn parse(text: &str) -> Result<Self> {
        let malformed = |why: &str| {
            warn!("Malformed DCC offer ({}): {:?}", why, text);
            IrcBookError::transfer_error(TransferErrorKind::MalformedOffer, format!("{}: {}", why, text.trim()))
        };

        let body = text.trim().trim_matches(CTCP_DELIM).trim();
        let body = strip_prefix_ci(body, "DCC ").map(str::trim_start).unwrap_or(body);
        let rest = strip_prefix_ci(body, "SEND ").ok_or_else(|| malformed("not a DCC SEND"))?;

        // Peel the three numeric fields from the right so unquoted names may hold spaces
        let mut fields = [""; 3];
        let mut head = rest.trim();
        for slot in fields.iter_mut().rev() {
            let (before, last) = head
                .rsplit_once(char::is_whitespace)
                .ok_or_else(|| malformed("missing fields"))?;
            *slot = last;
            head = before.trim_end();
        }
        let [ip_field, port_field, size_field] = fields;

        let filename = unquote(head.trim());
        if filename.is_empty() {
            return Err(malformed("empty filename"));
        }

        let ip = match ip_field.parse::<u32>() {
            Ok(n) => IpAddr::V4(Ipv4Addr::from(n)),
            Err(_) => ip_field.parse::<IpAddr>().map_err(|_| malformed("bad address"))?,
        };
        let port: u16 = port_field.parse().map_err(|_| malformed("bad port"))?;
        if port == 0 {
            return Err(malformed("passive DCC is not supported"));
        }
        let size: u64 = size_field.parse().map_err(|_| malformed("bad size"))?;
        if size == 0 {
            return Err(malformed("zero size"));
        }

        debug!("Parsed DCC offer: {} from {}:{} ({} bytes)", filename, ip, port, size);
        Ok(Self {
            filename: filename.to_string(),
            ip,
            port,
            size,
            sender: None,
        })
    }

    /// Attach the nickname the offer came from
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Socket address of the sending peer
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Filename safe to create locally: no directories, no leading dots
    pub fn local_name(&self) -> String {
        let base = self
            .filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim_start_matches('.')
            .trim();
        let cleaned: String = base
            .chars()
            .map(|c| if c.is_control() || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') { '_' } else { c })
            .collect();
        if cleaned.is_empty() {
            "download.bin".to_string()
        } else {
            cleaned
        }
    }
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &text[prefix.len()..])
}

fn unquote(name: &str) -> &str {
    name.strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_integer_address() {
        let offer = DccOffer::parse(
            "\x01DCC SEND SearchOok_results_for__hp_lovecraft.txt.zip 1543751478 2043 784\x01",
        )
        .unwrap();
        assert_eq!(offer.filename, "SearchOok_results_for__hp_lovecraft.txt.zip");
        assert_eq!(offer.ip, IpAddr::V4(Ipv4Addr::new(92, 3, 199, 54)));
        assert_eq!(offer.port, 2043);
        assert_eq!(offer.size, 784);
    }

    #[test]
    fn test_parse_quoted_name_with_spaces() {
        let offer = DccOffer::parse("DCC SEND \"Jane Doe - Example Book.epub\" 2130706433 5000 1200000").unwrap();
        assert_eq!(offer.filename, "Jane Doe - Example Book.epub");
        assert_eq!(offer.addr(), "127.0.0.1:5000".parse().unwrap());
    }

    #[test]
    fn test_parse_unquoted_name_with_spaces_and_dotted_ip() {
        let offer = DccOffer::parse("SEND Example Book.epub 10.0.0.5 4000 900000").unwrap();
        assert_eq!(offer.filename, "Example Book.epub");
        assert_eq!(offer.ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[test]
    fn test_malformed_offers() {
        for text in [
            "DCC CHAT chat 2130706433 5000",
            "DCC SEND book.epub 2130706433 5000",
            "DCC SEND book.epub nowhere 5000 10",
            "DCC SEND book.epub 2130706433 0 10",
            "DCC SEND book.epub 2130706433 5000 0",
            "DCC SEND book.epub 2130706433 70000 10",
            "DCC SEND \"\" 2130706433 5000 10",
        ] {
            let err = DccOffer::parse(text).unwrap_err();
            assert_eq!(err.transfer_kind(), Some(TransferErrorKind::MalformedOffer), "{}", text);
        }
    }

    #[test]
    fn test_local_name_strips_directories() {
        let offer = DccOffer::parse("DCC SEND ../../etc/passwd 2130706433 5000 10").unwrap();
        assert_eq!(offer.local_name(), "passwd");
        let offer = DccOffer::parse("DCC SEND .hidden 2130706433 5000 10").unwrap();
        assert_eq!(offer.local_name(), "hidden");
    }
}
