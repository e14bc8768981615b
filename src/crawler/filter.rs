use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::crawler::request::CrawlRequest;
use crate::crawler::run::RunId;
use crate::storage::seen_set::{SeenSet, SeenSetError};

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("fingerprint filter unavailable: {0}")]
    Unavailable(#[from] SeenSetError),
}

/// Request de-duplication scoped per run.
///
/// Fingerprints are prefixed with the run identifier before they reach the
/// shared seen-set, so the same URL requested by two runs never collides.
pub struct RunScopedFilter {
    seen: Arc<dyn SeenSet>,
}

impl RunScopedFilter {
    pub fn new(seen: Arc<dyn SeenSet>) -> Self {
        Self { seen }
    }

    /// Whether this run already issued an equivalent request
    pub async fn seen(&self, request: &CrawlRequest) -> Result<bool, FilterError> {
        Ok(self.seen.contains(&run_scoped_fingerprint(request)).await?)
    }

    /// Remember the request for its run
    pub async fn record(&self, request: &CrawlRequest) -> Result<(), FilterError> {
        self.seen.insert(&run_scoped_fingerprint(request)).await?;
        Ok(())
    }

    /// Record the request and report whether it is new for its run
    pub async fn check_and_record(&self, request: &CrawlRequest) -> Result<bool, FilterError> {
        let fingerprint = run_scoped_fingerprint(request);
        let is_new = self.seen.insert(&fingerprint).await?;

        if !is_new {
            debug!("Filtered duplicate request {} ({})", request.url, fingerprint);
        }

        Ok(is_new)
    }

    /// Number of fingerprints recorded across all runs
    pub async fn len(&self) -> Result<usize, FilterError> {
        Ok(self.seen.len().await?)
    }
}

/// Fingerprint of a request, prefixed with its run identifier.
///
/// Untagged requests get an empty prefix and so share one scope.
pub fn run_scoped_fingerprint(request: &CrawlRequest) -> String {
    let run = request.run_id().map(RunId::as_str).unwrap_or("");
    format!("{}-{}", run, request_fingerprint(request))
}

/// SHA-256 of method, canonical URL and body
pub fn request_fingerprint(request: &CrawlRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonicalize_url(&request.url).as_bytes());
    hasher.update(b"\n");
    if let Some(body) = &request.body {
        hasher.update(body.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Normalize a URL to avoid duplicates due to minor differences
pub fn canonicalize_url(url: &str) -> String {
    // Parsing lowercases the host and drops default ports
    let mut normalized = match Url::parse(url) {
        Ok(url) => url,
        Err(_) => return url.to_string(), // Can't normalize, return as is
    };

    normalized.set_fragment(None);

    // Sort query parameters if present
    match normalized.query() {
        Some("") => normalized.set_query(None),
        Some(_) => {
            let mut params: Vec<(String, String)> = normalized.query_pairs().into_owned().collect();
            params.sort();
            normalized.query_pairs_mut().clear().extend_pairs(params);
        }
        None => {}
    }

    let mut canonical = normalized.to_string();
    if normalized.path() == "/" && normalized.query().is_none() && canonical.ends_with('/') {
        canonical.pop();
    }
    canonical
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::run::tag_request;
    use crate::storage::seen_set::MemorySeenSet;

    fn tagged(url: &str, run: &str) -> CrawlRequest {
        let mut request = CrawlRequest::get(url);
        tag_request(&mut request, &RunId::new(run));
        request
    }

    #[test]
    fn test_canonicalize_url() {
        assert_eq!(canonicalize_url("https://EXAMPLE.com/path"), "https://example.com/path");
        assert_eq!(canonicalize_url("https://example.com:443/path"), "https://example.com/path");
        assert_eq!(canonicalize_url("https://example.com/"), "https://example.com");
        assert_eq!(
            canonicalize_url("https://example.com/search?b=2&a=1"),
            "https://example.com/search?a=1&b=2"
        );
        assert_eq!(canonicalize_url("https://example.com/page#section"), "https://example.com/page");
        assert_eq!(canonicalize_url("not a url"), "not a url");
    }

    #[test]
    fn test_fingerprint_ignores_url_noise() {
        let a = CrawlRequest::get("https://example.com/t?b=2&a=1#top");
        let b = CrawlRequest::get("https://EXAMPLE.com:443/t?a=1&b=2");
        assert_eq!(request_fingerprint(&a), request_fingerprint(&b));

        let mut post = b.clone();
        post.method = "POST".to_string();
        assert_ne!(request_fingerprint(&post), request_fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_is_prefixed_with_run() {
        let request = tagged("https://example.com/", "run-3");
        assert!(run_scoped_fingerprint(&request).starts_with("run-3-"));

        let untagged = CrawlRequest::get("https://example.com/");
        assert!(run_scoped_fingerprint(&untagged).starts_with('-'));
    }

    #[tokio::test]
    async fn test_same_url_is_duplicate_within_run_only() {
        let filter = RunScopedFilter::new(Arc::new(MemorySeenSet::new()));
        let run0 = tagged("https://example.com/thread/1", "run-0");
        let run1 = tagged("https://example.com/thread/1", "run-1");

        assert!(filter.check_and_record(&run0).await.unwrap());
        assert!(!filter.check_and_record(&run0.clone()).await.unwrap());

        assert!(!filter.seen(&run1).await.unwrap());
        assert!(filter.check_and_record(&run1).await.unwrap());
        assert_eq!(filter.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_record_then_seen() {
        let filter = RunScopedFilter::new(Arc::new(MemorySeenSet::new()));
        let request = tagged("https://example.com/a", "run-0");

        filter.record(&request).await.unwrap();
        assert!(filter.seen(&request).await.unwrap());
        assert!(!filter.seen(&tagged("https://example.com/a", "run-9")).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_check_and_record_admits_one() {
        let filter = Arc::new(RunScopedFilter::new(Arc::new(MemorySeenSet::new())));
        let request = tagged("https://example.com/race", "run-0");

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let filter = filter.clone();
                let request = request.clone();
                tokio::spawn(async move { filter.check_and_record(&request).await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
