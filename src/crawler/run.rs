//! Run identity and its propagation through the request graph.
//!
//! Every request that enters the frontier carries a [`RunContext`]. The
//! session key and the lane key are always equal to the run identifier, so a
//! run gets its own cookie jar and its own scheduling lane while sharing the
//! fetcher, the frontier and the fingerprint filter with every other run.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::crawler::request::{CrawlRequest, Page};

/// Opaque identifier of one logical crawl run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier of the `index`-th clone of a seed
    pub fn for_index(index: usize) -> Self {
        Self(format!("run-{}", index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Run-scoped keys attached to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: RunId,

    /// Cookie jar / HTTP session used to fetch the request
    pub session_key: String,

    /// Frontier lane the request is queued in
    pub lane_key: String,
}

impl RunContext {
    pub fn new(run_id: RunId) -> Self {
        let key = run_id.as_str().to_string();
        Self {
            run_id,
            session_key: key.clone(),
            lane_key: key,
        }
    }
}

/// A page reached run-aware code without having been produced by a tagged request
#[derive(Debug, Clone, Error)]
#[error("page {url} was not produced by a run-tagged request")]
pub struct UntaggedPage {
    pub url: String,
}

/// Tag `request` with `run_id`, forcing its session and lane keys to match
pub fn tag_request(request: &mut CrawlRequest, run_id: &RunId) {
    request.run = Some(RunContext::new(run_id.clone()));
}

/// Clone `seed` into `n` requests tagged `run-0` .. `run-{n-1}`
pub fn expand_seed(seed: &CrawlRequest, n: usize) -> Vec<CrawlRequest> {
    (0..n)
        .map(|index| {
            let mut request = seed.clone();
            tag_request(&mut request, &RunId::for_index(index));
            request
        })
        .collect()
}

/// Copy the run of `parent` onto every request derived from it
pub fn propagate(parent: &Page, children: &mut [CrawlRequest]) -> Result<(), UntaggedPage> {
    let run_id = parent.require_run()?;

    for child in children.iter_mut() {
        tag_request(child, run_id);
    }

    debug!("Propagated {} to {} requests from {}", run_id, children.len(), parent.url);

    Ok(())
}
