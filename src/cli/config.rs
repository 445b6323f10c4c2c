//! CLI configuration module
//!
//! Merges the optional TOML file with command-line overrides.

use crate::cli::args::CliArgs;
use crate::config::IrcConfig;
use crate::search::SearchQuery;
use anyhow::{Context, Result};
use tracing::debug;

/// Everything one CLI run needs
#[derive(Debug, Clone)]
pub struct Config {
    /// Engine configuration after overrides
    pub irc: IrcConfig,
    /// The search to run
    pub query: SearchQuery,
    /// Download after searching
    pub download: bool,
    /// Print events as JSON lines
    pub json: bool,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let mut irc = match &args.config {
            Some(path) => IrcConfig::load(path).context("Failed to load config file")?,
            None => IrcConfig::default(),
        };
        Self::apply_overrides(args, &mut irc)?;

        let query = match &args.title {
            Some(title) => SearchQuery::title(args.author.clone(), title.clone()),
            None => SearchQuery::author(args.author.clone()),
        }
        .with_epub_only(args.epub_only);
        let query = match args.max_results {
            Some(n) => query.with_max_results(n),
            None => query,
        };

        Ok(Self {
            irc,
            query,
            download: args.download,
            json: args.json,
            verbose: args.verbose,
            quiet: args.quiet,
        })
    }

    /// Apply flag overrides on top of file values
    fn apply_overrides(args: &CliArgs, irc: &mut IrcConfig) -> Result<()> {
        if let Some(server) = &args.server {
            irc.apply_server_url(server).context("Invalid --server URL")?;
        }
        if let Some(channel) = &args.channel {
            irc.channel = channel.clone();
        }
        if let Some(nickname) = &args.nickname {
            irc.nickname = Some(nickname.clone());
        }
        if let Some(dir) = &args.output_dir {
            irc.download_dir = dir.clone();
        }
        debug!("Effective server: {} (tls: {})", irc.address(), irc.tls);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.irc.validate().context("Invalid engine configuration")?;
        self.query.validate().context("Invalid query")?;
        Ok(())
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}
