//! Reward strategies that turn fetched pages into a training signal.

pub mod extraction;
pub mod ledger;
pub mod memo;

use std::sync::Arc;
use thiserror::Error;

use crate::cli::config::GoalSettings;
use crate::crawler::request::Page;
use crate::crawler::run::UntaggedPage;
use crate::extract::{Extractor, ItemKey};

pub use extraction::ExtractionGoal;
pub use ledger::{DedupLedger, LedgerError};
pub use memo::RewardMemo;

/// Called with `(page url, item key, payload)` the first time a run finds an item
pub type ItemObserver = Arc<dyn Fn(&str, &ItemKey, Option<&serde_json::Value>) + Send + Sync>;

#[derive(Debug, Error)]
pub enum GoalError {
    #[error(transparent)]
    Untagged(#[from] UntaggedPage),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// What the crawl is trying to achieve, as seen by the policy
pub trait Goal: Send + Sync {
    /// Reward for a fetched page; the same page always gets the same value
    fn get_reward(&self, page: &Arc<Page>) -> Result<f64, GoalError>;

    /// Hook for strategies that react to processed pages without rewarding them
    fn observe_response(&self, page: &Page);
}

/// Build the goal configured for a crawl
pub fn build_goal(
    settings: &GoalSettings,
    extractor: Arc<dyn Extractor>,
    observer: Option<ItemObserver>,
) -> Arc<dyn Goal> {
    let mut goal = ExtractionGoal::new(extractor, settings.request_reward, settings.item_reward);
    if let Some(observer) = observer {
        goal = goal.with_observer(observer);
    }
    Arc::new(goal)
}
