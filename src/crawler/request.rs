use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crawler::run::{RunContext, RunId, UntaggedPage};

/// A unit of work for the fetcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRequest {
    /// URL to fetch
    pub url: String,

    /// HTTP method, upper case
    pub method: String,

    /// Request body, if any
    pub body: Option<String>,

    /// Run-scoped keys; `None` until the request is tagged
    pub run: Option<RunContext>,

    /// Scheduling priority (higher values = dispatched first within a lane)
    pub priority: i32,

    /// Current depth in the crawl tree (0 for seed URLs)
    pub depth: u32,

    /// URL of the page this request was discovered on (None for seeds)
    pub parent_url: Option<String>,
}

impl CrawlRequest {
    /// Create an untagged GET seed request
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            body: None,
            run: None,
            priority: 0,
            depth: 0,
            parent_url: None,
        }
    }

    /// Create a request for a link discovered on `parent`'s page.
    ///
    /// The child starts untagged: run identity is copied over by
    /// [`crate::crawler::run::propagate`].
    pub fn child(url: impl Into<String>, parent: &CrawlRequest, priority: i32) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            body: None,
            run: None,
            priority,
            depth: parent.depth + 1,
            parent_url: Some(parent.url.clone()),
        }
    }

    pub fn run_id(&self) -> Option<&RunId> {
        self.run.as_ref().map(|run| &run.run_id)
    }

    pub fn session_key(&self) -> Option<&str> {
        self.run.as_ref().map(|run| run.session_key.as_str())
    }

    pub fn lane_key(&self) -> Option<&str> {
        self.run.as_ref().map(|run| run.lane_key.as_str())
    }
}

/// A fetched response, tied to exactly one request and therefore one run
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects
    pub url: String,

    /// Request that produced this page
    pub request: CrawlRequest,

    /// HTTP status code
    pub status: u16,

    /// Value of the Content-Type header, empty when absent
    pub content_type: String,

    /// Decoded body
    pub body: String,

    /// Timestamp when the page was fetched
    pub fetched_at: DateTime<Utc>,
}

impl Page {
    pub fn new(
        request: CrawlRequest,
        url: impl Into<String>,
        status: u16,
        content_type: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            request,
            status,
            content_type: content_type.into(),
            body: body.into(),
            fetched_at: Utc::now(),
        }
    }

    /// Run identifier inherited from the originating request
    pub fn run_id(&self) -> Option<&RunId> {
        self.request.run_id()
    }

    /// Run identifier, or an error naming the page if its request was never tagged
    pub fn require_run(&self) -> Result<&RunId, UntaggedPage> {
        self.run_id().ok_or_else(|| UntaggedPage {
            url: self.url.clone(),
        })
    }

    /// Whether the body can be parsed as HTML
    pub fn is_html(&self) -> bool {
        let content_type = self.content_type.to_ascii_lowercase();
        content_type.is_empty()
            || content_type.starts_with("text/html")
            || content_type.starts_with("application/xhtml")
    }
}
