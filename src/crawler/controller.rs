use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cli::config::CrawlerConfig;
use crate::crawler::filter::RunScopedFilter;
use crate::crawler::frontier::Frontier;
use crate::crawler::links::extract_links;
use crate::crawler::request::{CrawlRequest, Page};
use crate::crawler::run::{expand_seed, propagate};
use crate::crawler::scheduler::Scheduler;
use crate::crawler::session::SessionStore;
use crate::extract::{build_extractor, ItemKey};
use crate::goal::{build_goal, Goal, ItemObserver};
use crate::storage::export::{create_exporter, run_export, ExportRecord};
use crate::storage::seen_set::SeenSetFactory;
use crate::utils::metrics::{Metrics, MetricsCollector};

/// Outcome of a finished crawl
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub crawl_id: String,
    pub metrics: Metrics,
    pub exported_items: usize,
}

type Fetched = (CrawlRequest, Result<Page>, u64);

pub struct CrawlerController {
    config: CrawlerConfig,
    crawl_id: String,
    filter: RunScopedFilter,
    scheduler: Scheduler,
    sessions: Arc<SessionStore>,
    metrics: MetricsCollector,
    frontier: Frontier,
    goal: Arc<dyn Goal>,
    exporter: JoinHandle<Result<usize>>,
}

impl CrawlerController {
    /// Create a new crawler controller with the given configuration
    pub async fn new(config: CrawlerConfig) -> Result<Self> {
        config.validate()?;

        let crawl_id = Uuid::new_v4().to_string();

        let seen_set = SeenSetFactory::create(&config.storage.seen_set, &crawl_id).await?;
        let filter = RunScopedFilter::new(seen_set);

        let scheduler = Scheduler::new(config.crawler.clone());
        let sessions = Arc::new(SessionStore::new(&config.crawler));

        let extractor = build_extractor(&config.goal.extractor)
            .context("Failed to build item extractor")?;

        let exporter = create_exporter(&config.storage.export).await?;
        let (records, receiver) = mpsc::unbounded_channel();
        let exporter = tokio::spawn(run_export(exporter, receiver));

        let observer: ItemObserver = Arc::new(
            move |url: &str, key: &ItemKey, payload: Option<&serde_json::Value>| {
                let record = ExportRecord {
                    url: url.to_string(),
                    key: key.clone(),
                    item: payload.cloned(),
                };
                if records.send(record).is_err() {
                    warn!("Exporter stopped, dropping item {}", key);
                }
            },
        );

        let goal = build_goal(&config.goal, extractor, Some(observer));

        Ok(Self {
            config,
            crawl_id,
            filter,
            scheduler,
            sessions,
            metrics: MetricsCollector::new(),
            frontier: Frontier::new(),
            goal,
            exporter,
        })
    }

    pub fn crawl_id(&self) -> &str {
        &self.crawl_id
    }

    /// Crawl from `seeds`, each cloned into one request per run, until the
    /// frontier is empty or the page limit is reached
    pub async fn start_job(mut self, seeds: Vec<String>) -> Result<CrawlSummary> {
        info!(
            "Starting crawl {} with {} seeds and {} runs",
            self.crawl_id, seeds.len(), self.config.goal.run_count
        );

        let outcome = self.crawl(seeds).await;

        let Self { crawl_id, metrics, goal, exporter, .. } = self;

        // The goal holds the last sender of the export channel
        drop(goal);
        let exported_items = exporter.await
            .context("Exporter task failed")??;

        outcome?;

        let summary = CrawlSummary {
            crawl_id,
            metrics: metrics.get_metrics().await,
            exported_items,
        };

        info!(
            "Crawl {} finished: {} requests, {} unique items exported",
            summary.crawl_id, summary.metrics.total_requests, summary.exported_items
        );

        Ok(summary)
    }

    async fn crawl(&mut self, seeds: Vec<String>) -> Result<()> {
        self.enqueue_seeds(seeds).await?;

        let concurrency = self.config.crawler.concurrency;
        let max_pages = self.config.crawler.max_pages;
        let delay = Duration::from_millis(self.config.crawler.politeness_delay);

        let mut in_flight = FuturesUnordered::new();
        let mut dispatched: u32 = 0;

        loop {
            while in_flight.len() < concurrency && (max_pages == 0 || dispatched < max_pages) {
                let request = match self.frontier.pop() {
                    Some(request) => request,
                    None => break,
                };
                dispatched += 1;
                in_flight.push(self.dispatch(request, delay));
            }

            let (request, result, duration_ms) = match in_flight.next().await {
                Some(fetched) => fetched,
                None => break,
            };

            match result {
                Ok(page) => {
                    let success = (200..300).contains(&page.status);
                    self.metrics
                        .record_request(success, duration_ms, Some(page.status), page.body.len())
                        .await;

                    if success {
                        self.process_page(page).await?;
                    } else {
                        debug!("Not processing {} (status {})", page.url, page.status);
                    }
                }
                Err(e) => {
                    warn!("Request to {} failed: {:#}", request.url, e);
                    self.metrics.record_request(false, duration_ms, None, 0).await;
                }
            }
        }

        if !self.frontier.is_empty() {
            info!("Page limit reached with {} requests left in the frontier", self.frontier.len());
        }

        Ok(())
    }

    async fn enqueue_seeds(&mut self, seeds: Vec<String>) -> Result<()> {
        for seed in seeds {
            if self.config.crawler.stay_in_domain {
                self.scheduler.allow_domain_of(&seed);
            }

            let seed = CrawlRequest::get(seed);
            for request in expand_seed(&seed, self.config.goal.run_count) {
                if self.filter.check_and_record(&request).await? {
                    self.frontier.push(request);
                }
            }
        }

        debug!(
            "Frontier holds {} seed requests over {} lanes",
            self.frontier.len(), self.frontier.lane_count()
        );

        Ok(())
    }

    fn dispatch(
        &self,
        request: CrawlRequest,
        delay: Duration,
    ) -> impl std::future::Future<Output = Fetched> {
        let sessions = self.sessions.clone();
        let metrics = self.metrics.clone();

        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let timer = metrics.start_timer();
            let result = sessions.fetch(&request).await;
            (request, result, timer.end())
        }
    }

    async fn process_page(&mut self, page: Page) -> Result<()> {
        let page = Arc::new(page);

        let reward = match self.goal.get_reward(&page) {
            Ok(reward) => reward,
            Err(e) => {
                error!("Reward computation failed for {}: {}", page.url, e);
                return Err(e).context(format!("Aborting crawl {}", self.crawl_id));
            }
        };
        self.goal.observe_response(&page);

        if let Some(run_id) = page.run_id() {
            self.metrics.record_reward(run_id, reward).await;
        }

        let links = extract_links(&page);
        let mut children = self.scheduler.links_to_requests(&page.request, links);
        propagate(&page, &mut children)?;

        let mut scheduled = 0;
        for child in children {
            if !self.scheduler.should_schedule(&child) {
                continue;
            }
            if self.filter.check_and_record(&child).await? {
                self.frontier.push(child);
                scheduled += 1;
            }
        }

        debug!("Scheduled {} new requests from {}", scheduled, page.url);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::ExtractorSettings;
    use crate::crawler::run::RunId;
    use crate::storage::jsonlines::JsonLines;
    use std::collections::HashSet;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_html(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html"))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_runs_are_rewarded_independently_and_items_exported_once() {
        let server = MockServer::start().await;
        mount_html(
            &server,
            "/",
            r#"<a href="/forum">Forum</a> <a href="/missing">Gone</a>"#,
        )
        .await;
        mount_html(
            &server,
            "/forum",
            r#"<a id="tid-link-1" href="/topic">Hello</a>
               <a id="tid-link-2" href="/">Again</a>"#,
        )
        .await;
        mount_html(
            &server,
            "/topic",
            r#"<table><tr><td id="post-main-10">first</td></tr></table>
               <a id="tid-link-1" href="/forum">Hello</a>"#,
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("items.jl");

        let mut config = CrawlerConfig::default();
        config.crawler.politeness_delay = 0;
        config.crawler.concurrency = 2;
        config.goal.run_count = 2;
        config.goal.extractor = ExtractorSettings::Forum;
        config.storage.export.path = output.clone();

        let controller = CrawlerController::new(config).await.unwrap();
        let summary = controller.start_job(vec![format!("{}/", server.uri())]).await.unwrap();

        // Each run fetches /, /forum, /topic and /missing exactly once
        assert_eq!(summary.metrics.total_requests, 8);
        assert_eq!(summary.metrics.failed_requests, 2);

        for index in 0..2 {
            let run = summary.metrics.runs.get(&RunId::for_index(index)).unwrap();
            assert_eq!(run.pages, 3);
            // -3 for the pages, +2 threads on /forum, +1 post on /topic
            assert_eq!(run.total_reward, 0.0);
            assert_eq!(run.rewarding_pages, 1);
        }

        assert_eq!(summary.exported_items, 3);
        let keys: HashSet<String> = JsonLines::open(&output)
            .unwrap()
            .filter_map(|line| line["key"].as_str().map(str::to_string))
            .collect();
        assert_eq!(
            keys,
            HashSet::from([
                "thread:tid-link-1".to_string(),
                "thread:tid-link-2".to_string(),
                "post:post-main-10".to_string(),
            ])
        );
    }

    #[tokio::test]
    async fn test_page_limit_stops_dispatch() {
        let server = MockServer::start().await;
        mount_html(&server, "/", r#"<a href="/a">a</a><a href="/b">b</a>"#).await;
        mount_html(&server, "/a", "a").await;
        mount_html(&server, "/b", "b").await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = CrawlerConfig::default();
        config.crawler.politeness_delay = 0;
        config.crawler.max_pages = 2;
        config.goal.run_count = 1;
        config.storage.export.path = dir.path().join("items.jl");

        let controller = CrawlerController::new(config).await.unwrap();
        let summary = controller.start_job(vec![server.uri()]).await.unwrap();

        assert_eq!(summary.metrics.total_requests, 2);
        assert_eq!(summary.exported_items, 0);
    }
}
