//! Search query values

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{IrcBookError, Result};

/// What a search is looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    /// Every distinct title by an author
    Author,
    /// One specific title, from as many servers as possible
    Title,
}

/// Immutable query supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub scope: SearchScope,
    pub author: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub epub_only: bool,
    #[serde(default)]
    pub max_results: Option<usize>,
}

impl SearchQuery {
    /// Query for an author's titles
    pub fn author(author: impl Into<String>) -> Self {
        Self {
            scope: SearchScope::Author,
            author: author.into(),
            title: None,
            epub_only: false,
            max_results: None,
        }
    }

    /// Query for one title by an author
    pub fn title(author: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            scope: SearchScope::Title,
            author: author.into(),
            title: Some(title.into()),
            epub_only: false,
            max_results: None,
        }
    }

    pub fn with_epub_only(mut self, epub_only: bool) -> Self {
        self.epub_only = epub_only;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// Text placed after the bot prefix
    pub fn terms(&self) -> String {
        match self.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => format!("{} {}", self.author.trim(), title),
            None => self.author.trim().to_string(),
        }
    }

    /// Result cap, falling back to `default`
    pub fn result_cap(&self, default: usize) -> usize {
        self.max_results.unwrap_or(default)
    }

    pub fn validate(&self) -> Result<()> {
        if self.author.trim().is_empty() {
            return Err(IrcBookError::config_error_with_field("Query author cannot be empty", "author"));
        }
        if self.author.contains(['\r', '\n']) || self.title.as_deref().is_some_and(|t| t.contains(['\r', '\n'])) {
            return Err(IrcBookError::config_error("Query must not contain line breaks"));
        }
        if self.scope == SearchScope::Title && self.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err(IrcBookError::config_error_with_field("Title scope needs a title", "title"));
        }
        if self.max_results == Some(0) {
            return Err(IrcBookError::config_error_with_field("max_results must be at least 1", "max_results"));
        }
        Ok(())
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.terms())
    }
}
