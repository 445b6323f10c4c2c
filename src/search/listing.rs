//! Result listings delivered over DCC
//!
//! Busy bots answer a search with a `SearchBot_results_for_<query>.txt.zip`
//! instead of channel lines. Each text member holds one result per line
//! in the usual `!server filename ::INFO:: size` grammar.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

use super::parser::{Candidate, SearchResultParser};
use crate::error::{IrcBookError, Result, TransferErrorKind};
use crate::transfer::extract::is_zip;

/// Whether an offered filename is a search result listing
pub fn is_result_listing(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    lower.contains("_results_for") && (lower.ends_with(".txt.zip") || lower.ends_with(".txt") || lower.ends_with(".zip"))
}

/// Parse every result line of a listing file, zipped or plain
pub fn read_listing(path: &Path, parser: &SearchResultParser) -> Result<Vec<Candidate>> {
    let mut candidates = Vec::new();

    if is_zip(path) {
        let mut archive = ZipArchive::new(File::open(path)?)?;
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            if entry.is_dir() || !entry.name().to_ascii_lowercase().ends_with(".txt") {
                debug!("Skipping listing member {}", entry.name());
                continue;
            }
            debug!("Reading listing member {}", entry.name());
            parse_lines(BufReader::new(entry), parser, &mut candidates)?;
        }
    } else {
        parse_lines(BufReader::new(File::open(path)?), parser, &mut candidates)?;
    }

    info!("Listing {} yielded {} candidates", path.display(), candidates.len());
    Ok(candidates)
}

/// Async wrapper running [`read_listing`] on the blocking pool
pub async fn read_listing_async(path: PathBuf, parser: SearchResultParser) -> Result<Vec<Candidate>> {
    tokio::task::spawn_blocking(move || read_listing(&path, &parser))
        .await
        .map_err(|e| IrcBookError::transfer_error(TransferErrorKind::IoFailure, format!("Listing task failed: {}", e)))?
}

fn parse_lines<R: Read>(reader: BufReader<R>, parser: &SearchResultParser, out: &mut Vec<Candidate>) -> Result<()> {
    // Listings are not reliably UTF-8
    for line in reader.split(b'\n') {
        let line = line?;
        if let Some(candidate) = parser.parse(&String::from_utf8_lossy(&line)) {
            out.push(candidate);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::extract::write_zip;

    #[test]
    fn test_is_result_listing() {
        assert!(is_result_listing("SearchBot_results_for__stephen_king.txt.zip"));
        assert!(is_result_listing("SearchOok_results_for__hp_lovecraft.txt.zip"));
        assert!(!is_result_listing("Jane Doe - Example Book.epub"));
        assert!(!is_result_listing("results.zip"));
    }

    #[test]
    fn test_read_zipped_listing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SearchBot_results_for__jane_doe.txt.zip");
        let text = b"Search results for jane doe\r\n\
            !A Jane Doe - Example Book.epub ::INFO:: 1.1MB\r\n\
            garbage line\r\n\
            !B Jane Doe - Example Book.mobi ::INFO:: 900KB\r\n";
        write_zip(&path, &[("SearchBot_results_for__jane_doe.txt", text), ("readme.nfo", b"!X ignored.epub")]);

        let parser = SearchResultParser::new("epub");
        let candidates = read_listing(&path, &parser).unwrap();
        let servers: Vec<_> = candidates.iter().map(|c| c.server.as_str()).collect();
        assert_eq!(servers, vec!["A", "B"]);
        assert_eq!(candidates[0].trigger(), "!A Jane Doe - Example Book.epub");
    }

    #[test]
    fn test_read_plain_listing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results_for_x.txt");
        std::fs::write(&path, b"!C Example Book.epub\n!D caf\xe9.epub\n").unwrap();
        let candidates = read_listing(&path, &SearchResultParser::new("epub")).unwrap();
        assert_eq!(candidates.len(), 2);
    }
}
