//! Progress display module
//!
//! Renders engine progress events and search results in the terminal.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::events::ProgressEvent;
use crate::search::Candidate;

/// Format bytes to human readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration to human readable string
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Progress display for CLI
pub struct ProgressDisplay {
    /// Start time of the run
    start_time: Instant,
    /// Quiet mode (no progress output)
    quiet: bool,
    /// Emit raw JSON events instead of text
    json: bool,
    /// A transfer progress line is on screen
    in_progress_line: bool,
}

impl ProgressDisplay {
    /// Create a new progress display
    pub fn new(quiet: bool, json: bool) -> Self {
        Self {
            start_time: Instant::now(),
            quiet,
            json,
            in_progress_line: false,
        }
    }

    /// Render one engine event
    pub fn handle_event(&mut self, event: &ProgressEvent) -> io::Result<()> {
        if self.json {
            let line = event.to_json().map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            println!("{}", line);
            return Ok(());
        }
        if self.quiet {
            return Ok(());
        }

        match event {
            ProgressEvent::TransferProgress { filename, received, expected } => {
                let percent = if *expected == 0 { 100.0 } else { *received as f64 / *expected as f64 * 100.0 };
                print!("\r\x1b[2K{} {:.1}% ({} / {})", filename, percent, format_bytes(*received), format_bytes(*expected));
                io::stdout().flush()?;
                self.in_progress_line = true;
            }
            other => {
                if let Some(message) = Self::describe(other) {
                    self.print_status(&message)?;
                }
            }
        }
        Ok(())
    }

    /// One-line description of a non-progress event
    pub fn describe(event: &ProgressEvent) -> Option<String> {
        let text = match event {
            ProgressEvent::Connecting { server, attempt } => format!("Connecting to {} (attempt {})", server, attempt),
            ProgressEvent::Registered { nickname, .. } => format!("Registered as {}", nickname),
            ProgressEvent::Searching { query, .. } => format!("Searching for {}", query),
            ProgressEvent::ResultCount { count, .. } => format!("{} result(s)", count),
            ProgressEvent::Downloading { server, filename, attempt, total } => {
                format!("Downloading {} from {} ({}/{})", filename, server, attempt, total)
            }
            ProgressEvent::AttemptFailed { server, reason } => format!("{} failed: {}", server, reason),
            ProgressEvent::Succeeded { path, .. } => format!("Saved {}", path.display()),
            ProgressEvent::Failed { reason, message } => format!("Failed ({}): {}", reason, message),
            ProgressEvent::TransferProgress { .. } => return None,
        };
        Some(text)
    }

    /// Print the ranked candidate table
    pub fn print_candidates(&mut self, candidates: &[Candidate]) -> io::Result<()> {
        if self.quiet || self.json {
            return Ok(());
        }
        self.print_status("")?;
        for (i, candidate) in candidates.iter().enumerate() {
            let size = candidate.size.map(format_bytes).unwrap_or_else(|| "?".to_string());
            println!("{:>3}. [{}] {} ({}, {})", i + 1, candidate.format, candidate.filename, size, candidate.server);
        }
        Ok(())
    }

    /// Print a status message
    pub fn print_status(&mut self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        if self.in_progress_line {
            println!();
            self.in_progress_line = false;
        }
        if !message.is_empty() {
            println!("\r\x1b[2K{}", message);
        }
        Ok(())
    }

    /// Print an error message
    pub fn print_error(&self, message: &str) -> io::Result<()> {
        eprintln!("\r\x1b[2KError: {}", message);
        Ok(())
    }

    /// Print the closing summary
    pub fn print_complete(&mut self, message: &str) -> io::Result<()> {
        let elapsed = format_duration(self.start_time.elapsed());
        self.print_status(&format!("{} in {}", message, elapsed))
    }

    /// Get the elapsed time since start
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}
