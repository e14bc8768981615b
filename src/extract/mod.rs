pub mod forum;
pub mod profiles;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::cli::config::ExtractorSettings;
use crate::crawler::request::Page;

pub use forum::ForumExtractor;
pub use profiles::ProfileExtractor;

/// Identity of an extracted item, unique within a run's domain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// A structured unit of value found on a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: ItemKey,

    /// Auxiliary data carried to the exporter
    pub payload: Option<serde_json::Value>,
}

impl Item {
    pub fn new(key: impl Into<String>, payload: Option<serde_json::Value>) -> Self {
        Self {
            key: ItemKey::new(key),
            payload,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to parse {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("unsupported {kind} rule for {domain}")]
    UnsupportedRule { domain: String, kind: String },

    #[error("invalid selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },

    #[error("invalid xpath '{expression}': {reason}")]
    XPath { expression: String, reason: String },

    #[error("invalid URL pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("failed to read rules from {path}: {source}")]
    Rules {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed rule on line {line}: {content}")]
    MalformedRule { line: usize, content: String },
}

/// Turns a page into items
#[cfg_attr(test, mockall::automock)]
pub trait Extractor: Send + Sync {
    fn extract(&self, page: &Page) -> Result<Vec<Item>, ExtractError>;
}

/// Build the extractor selected in the configuration
pub fn build_extractor(settings: &ExtractorSettings) -> Result<Arc<dyn Extractor>, ExtractError> {
    match settings {
        ExtractorSettings::Forum => Ok(Arc::new(ForumExtractor::new()?)),
        ExtractorSettings::Profiles { rules_path } => {
            Ok(Arc::new(ProfileExtractor::from_path(rules_path)?))
        }
    }
}

/// Parse a CSS selector, keeping the source text in the error
pub(crate) fn parse_selector(selector: &str) -> Result<scraper::Selector, ExtractError> {
    scraper::Selector::parse(selector).map_err(|e| ExtractError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}
