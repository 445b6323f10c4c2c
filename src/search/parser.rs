//! Search result parser
//!
//! Bots answer with lines of the form
//! `!<server> <filename>[ ::INFO:: <size>]`. Everything before `::INFO::`
//! is the trigger that requests the file. Channels are noisy, so anything
//! that does not fit the grammar is dropped quietly.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::format::{strip_extensions, FileFormat};

/// Marker separating the trigger from the metadata
pub const INFO_MARKER: &str = "::INFO::";

/// One offered file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Offering server nickname, without the `!`
    pub server: String,
    /// Declared filename
    pub filename: String,
    /// Declared size in bytes, when the bot reported one
    pub size: Option<u64>,
    /// Lower-cased format extension
    pub format: String,
    /// The book is wrapped in an archive
    pub archived: bool,
    /// Author split from the filename
    pub author: Option<String>,
    /// Title split from the filename
    pub title: Option<String>,
    /// Format rank, lower is preferred
    pub priority: u8,
    trigger: String,
}

impl Candidate {
    /// Exact text to send back to the bot to request this file
    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    /// Title used for relevance matching
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .unwrap_or_else(|| strip_extensions(&self.filename))
    }
}

/// Parser bound to the wanted file format
#[derive(Debug, Clone)]
pub struct SearchResultParser {
    target_extension: String,
}

impl SearchResultParser {
    pub fn new(target_extension: impl Into<String>) -> Self {
        Self {
            target_extension: target_extension.into().to_ascii_lowercase(),
        }
    }

    pub fn target_extension(&self) -> &str {
        &self.target_extension
    }

    /// Parse one line into a candidate, `None` when it does not match
    pub fn parse(&self, line: &str) -> Option<Candidate> {
        let cleaned = strip_formatting(line);
        let line = cleaned.trim();
        if !line.starts_with('!') {
            return None;
        }

        let (trigger, info) = match line.find(INFO_MARKER) {
            Some(i) => (line[..i].trim(), Some(line[i + INFO_MARKER.len()..].trim())),
            None => (line, None),
        };

        let Some((server, filename)) = trigger[1..].split_once(char::is_whitespace) else {
            debug!("Dropping result line without filename: {}", line);
            return None;
        };
        let filename = filename.trim();
        if server.is_empty() || filename.is_empty() {
            debug!("Dropping malformed result line: {}", line);
            return None;
        }

        let format = FileFormat::from_filename(filename);
        let (author, title) = split_author_title(strip_extensions(filename));
        let size = info.and_then(parse_size);
        trace!("Parsed candidate {} from {} ({:?} bytes)", filename, server, size);

        Some(Candidate {
            server: server.to_string(),
            filename: filename.to_string(),
            size,
            priority: format.priority(&self.target_extension),
            format: format.extension,
            archived: format.archived,
            author,
            title,
            trigger: trigger.to_string(),
        })
    }

    /// Parse every line, keeping arrival order
    pub fn parse_all<'a>(&self, lines: impl IntoIterator<Item = &'a str>) -> Vec<Candidate> {
        lines.into_iter().filter_map(|l| self.parse(l)).collect()
    }

    /// Drop non-target formats when `epub_only`, then order by priority.
    /// The sort is stable so ties keep arrival order.
    pub fn filter(&self, mut candidates: Vec<Candidate>, epub_only: bool) -> Vec<Candidate> {
        if epub_only {
            candidates.retain(|c| FileFormat::from_filename(&c.filename).is_target(&self.target_extension));
        }
        candidates.sort_by_key(|c| c.priority);
        candidates
    }
}

/// Split `Author - Title` out of a filename stem
fn split_author_title(stem: &str) -> (Option<String>, Option<String>) {
    match stem.split_once(" - ") {
        Some((author, title)) if !author.trim().is_empty() && !title.trim().is_empty() => {
            (Some(author.trim().to_string()), Some(title.trim().to_string()))
        }
        _ => (None, Some(stem.trim().to_string()).filter(|t| !t.is_empty())),
    }
}

/// Parse `332.7KB`, `1.2 MB`, `2043` or `1,234 bytes` into bytes (1024-based)
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim_start();
    let number_len = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(text.len());
    let number: f64 = text[..number_len].replace(',', "").parse().ok()?;

    let unit: String = text[number_len..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    let multiplier: u64 = match unit.as_str() {
        "" | "B" | "BYTE" | "BYTES" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        _ => return None,
    };
    if !number.is_finite() || number < 0.0 {
        return None;
    }
    Some((number * multiplier as f64).round() as u64)
}

/// Remove mIRC bold, colour, reset, reverse, italic and underline codes
pub fn strip_formatting(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\x02' | '\x0f' | '\x16' | '\x1d' | '\x1f' => {}
            '\x03' => {
                // \x03[fg[,bg]] with up to two digits each
                for _ in 0..2 {
                    if chars.peek().is_some_and(|d| d.is_ascii_digit()) {
                        chars.next();
                    }
                }
                if chars.peek() == Some(&',') {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                        chars.next();
                        for _ in 0..2 {
                            if chars.peek().is_some_and(|d| d.is_ascii_digit()) {
                                chars.next();
                            }
                        }
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}
