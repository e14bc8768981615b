use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::crawler::run::RunId;

/// Crawl metrics collector
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// In-memory metrics store
    metrics: Arc<Mutex<Metrics>>,
}

/// Metrics data structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metrics {
    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    /// Total requests made
    pub total_requests: usize,

    /// Successful requests
    pub successful_requests: usize,

    /// Failed requests
    pub failed_requests: usize,

    /// Total time spent waiting on responses, in milliseconds
    pub total_request_ms: u64,

    /// Bytes downloaded
    pub bytes_downloaded: usize,

    /// HTTP status code counts
    pub status_codes: HashMap<u16, usize>,

    /// Reward bookkeeping per run
    pub runs: BTreeMap<RunId, RunMetrics>,
}

/// Rewards observed for one run
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RunMetrics {
    /// Pages rewarded
    pub pages: usize,

    /// Sum of rewards
    pub total_reward: f64,

    /// Pages whose reward was above zero
    pub rewarding_pages: usize,
}

impl Metrics {
    /// Mean request duration in milliseconds
    pub fn mean_request_ms(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.total_request_ms as f64 / self.total_requests as f64
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let metrics = Metrics {
            start_time: Utc::now(),
            ..Default::default()
        };

        Self {
            metrics: Arc::new(Mutex::new(metrics)),
        }
    }

    /// Record a request
    pub async fn record_request(&self, success: bool, duration_ms: u64, status_code: Option<u16>, bytes: usize) {
        let mut metrics = self.metrics.lock().await;

        metrics.total_requests += 1;

        if success {
            metrics.successful_requests += 1;
        } else {
            metrics.failed_requests += 1;
        }

        metrics.bytes_downloaded += bytes;
        metrics.total_request_ms += duration_ms;

        if let Some(code) = status_code {
            *metrics.status_codes.entry(code).or_default() += 1;
        }
    }

    /// Record the reward a page earned for its run
    pub async fn record_reward(&self, run_id: &RunId, reward: f64) {
        let mut metrics = self.metrics.lock().await;
        let run = metrics.runs.entry(run_id.clone()).or_default();

        run.pages += 1;
        run.total_reward += reward;
        if reward > 0.0 {
            run.rewarding_pages += 1;
        }
    }

    /// Start timing a request
    pub fn start_timer(&self) -> RequestTimer {
        RequestTimer {
            start: Instant::now(),
        }
    }

    /// Get all metrics
    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Request timer for measuring request durations
pub struct RequestTimer {
    /// Start time of the request
    start: Instant,
}

impl RequestTimer {
    /// End timing and get the duration in milliseconds
    pub fn end(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_requests_and_rewards() {
        let collector = MetricsCollector::new();

        collector.record_request(true, 30, Some(200), 512).await;
        collector.record_request(false, 10, None, 0).await;
        collector.record_reward(&RunId::for_index(0), 1.0).await;
        collector.record_reward(&RunId::for_index(0), -1.0).await;
        collector.record_reward(&RunId::for_index(1), -1.0).await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.status_codes.get(&200), Some(&1));
        assert_eq!(metrics.mean_request_ms(), 20.0);
        assert_eq!(
            metrics.runs.get(&RunId::for_index(0)),
            Some(&RunMetrics { pages: 2, total_reward: 0.0, rewarding_pages: 1 })
        );
        assert_eq!(metrics.runs.get(&RunId::for_index(1)).map(|run| run.pages), Some(1));
    }
}
