//! Line codec for the IRC stream
//!
//! Frames CRLF (or bare LF) terminated lines. Invalid UTF-8 is decoded
//! lossily since bots and servers mix encodings freely.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Longest line accepted before the rest of it is discarded
pub const MAX_LINE_LENGTH: usize = 8192;

/// Codec turning the byte stream into text lines
#[derive(Debug)]
pub struct IrcLineCodec {
    max_length: usize,
    /// Skipping the remainder of an over-long line
    discarding: bool,
}

impl IrcLineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            discarding: false,
        }
    }

    fn decode_line(bytes: &[u8]) -> String {
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        String::from_utf8_lossy(bytes).into_owned()
    }
}

impl Default for IrcLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for IrcLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            let Some(pos) = buf.iter().position(|b| *b == b'\n') else {
                if buf.len() > self.max_length {
                    warn!("Discarding over-long IRC line ({} bytes buffered)", buf.len());
                    buf.clear();
                    self.discarding = true;
                }
                return Ok(None);
            };

            let line = buf.split_to(pos + 1);
            if self.discarding {
                self.discarding = false;
                continue;
            }

            let text = Self::decode_line(&line[..pos]);
            if text.is_empty() {
                continue;
            }
            return Ok(Some(text));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }
        let text = Self::decode_line(&buf[..]);
        buf.advance(buf.len());
        Ok(Some(text).filter(|t| !t.is_empty()))
    }
}

impl Encoder<String> for IrcLineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), io::Error> {
        if line.contains(['\r', '\n']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "IRC line must not contain CR or LF",
            ));
        }
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
