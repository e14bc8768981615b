use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{DedupLedger, Goal, GoalError, ItemObserver, RewardMemo};
use crate::crawler::request::Page;
use crate::extract::Extractor;

/// Rewards pages for items their run has not found before.
///
/// A page earns `request_reward` plus `item_reward` for every item that is
/// new to the page's run. Runs share one ledger but never each other's credits.
pub struct ExtractionGoal {
    extractor: Arc<dyn Extractor>,
    ledger: Arc<DedupLedger>,
    memo: RewardMemo<Page>,
    request_reward: f64,
    item_reward: f64,
    observer: Option<ItemObserver>,
}

impl ExtractionGoal {
    pub fn new(extractor: Arc<dyn Extractor>, request_reward: f64, item_reward: f64) -> Self {
        Self {
            extractor,
            ledger: Arc::new(DedupLedger::new()),
            memo: RewardMemo::new(),
            request_reward,
            item_reward,
            observer: None,
        }
    }

    /// Share an existing ledger
    pub fn with_ledger(mut self, ledger: Arc<DedupLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    /// Notify `observer` of every first-seen item
    pub fn with_observer(mut self, observer: ItemObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn ledger(&self) -> &Arc<DedupLedger> {
        &self.ledger
    }

    fn compute_reward(&self, page: &Page) -> Result<f64, GoalError> {
        let run_id = page.require_run().map_err(|e| {
            error!("Refusing to reward {}: {}", page.url, e);
            e
        })?;

        let mut reward = self.request_reward;

        let items = match self.extractor.extract(page) {
            Ok(items) => items,
            Err(e) => {
                warn!("Extraction failed for {}: {}", page.url, e);
                Vec::new()
            }
        };

        let mut credited = 0;
        for item in &items {
            if self.ledger.insert_if_absent(run_id, &item.key)? {
                reward += self.item_reward;
                credited += 1;
                if let Some(observer) = &self.observer {
                    observer(&page.url, &item.key, item.payload.as_ref());
                }
            }
        }

        debug!(
            "Reward {:.2} for {} ({}: {} new of {} items)",
            reward, page.url, run_id, credited, items.len()
        );

        Ok(reward)
    }
}

impl Goal for ExtractionGoal {
    fn get_reward(&self, page: &Arc<Page>) -> Result<f64, GoalError> {
        self.memo.get_or_try_compute(page, |page| self.compute_reward(page))
    }

    fn observe_response(&self, _page: &Page) {}
}
