//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for the ebook searcher
#[derive(Debug, Parser)]
#[command(name = "ircbook")]
#[command(about = "Search IRC ebook channels and download books over DCC", long_about = None)]
pub struct CliArgs {
    /// Author to search for
    #[arg(value_name = "AUTHOR")]
    pub author: String,

    /// Search for one title instead of everything by the author
    #[arg(short, long, value_name = "TITLE")]
    pub title: Option<String>,

    /// Only keep results in the target format
    #[arg(long)]
    pub epub_only: bool,

    /// Download the best candidate, falling back through the rest
    #[arg(short, long)]
    pub download: bool,

    /// Maximum number of results to keep
    #[arg(short = 'n', long, value_name = "N")]
    pub max_results: Option<usize>,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Server as a URL, e.g. ircs://irc.irchighway.net:6697
    #[arg(short, long, value_name = "URL")]
    pub server: Option<String>,

    /// Channel to search in
    #[arg(long, value_name = "CHANNEL")]
    pub channel: Option<String>,

    /// Nickname to register with
    #[arg(long, value_name = "NICK")]
    pub nickname: Option<String>,

    /// Download directory
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Print progress events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_author_only() {
        let args = CliArgs::try_parse_from(["ircbook", "Jane Doe"]).unwrap();
        assert_eq!(args.author, "Jane Doe");
        assert!(args.title.is_none());
        assert!(!args.download);
        assert!(!args.epub_only);
        assert_eq!(args.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_title_download() {
        let args = CliArgs::try_parse_from([
            "ircbook",
            "Jane Doe",
            "--title",
            "Example Book",
            "--epub-only",
            "--download",
            "-n",
            "5",
            "-v",
        ])
        .unwrap();
        assert_eq!(args.title.as_deref(), Some("Example Book"));
        assert!(args.epub_only);
        assert!(args.download);
        assert_eq!(args.max_results, Some(5));
        assert_eq!(args.log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_author_required() {
        assert!(CliArgs::try_parse_from(["ircbook"]).is_err());
    }
}
