use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::cli::config::{CrawlerConfig, ExtractorSettings};
use crate::cli::scripts;
use crate::crawler::controller::CrawlerController;

/// Command line overrides for a crawl
#[derive(Debug, Default)]
pub struct CrawlOptions {
    pub profile: Option<String>,
    pub runs: Option<usize>,
    pub request_penalty: Option<f64>,
    pub extractor: Option<String>,
    pub rules: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub depth: Option<u32>,
    pub limit: Option<u32>,
}

impl CrawlOptions {
    /// Apply the overrides on top of a loaded configuration
    pub fn apply(self, config: &mut CrawlerConfig) -> Result<()> {
        if let Some(runs) = self.runs {
            config.goal.run_count = runs;
        }

        if let Some(penalty) = self.request_penalty {
            // The penalty is given as a positive cost
            config.goal.request_reward = -penalty.abs();
        }

        match self.extractor.as_deref() {
            None => {}
            Some("forum") => config.goal.extractor = ExtractorSettings::Forum,
            Some("profiles") => {
                let rules_path = self.rules
                    .context("--rules is required with the profiles extractor")?;
                config.goal.extractor = ExtractorSettings::Profiles { rules_path };
            }
            Some(other) => anyhow::bail!("Unknown extractor: {}", other),
        }

        if let Some(output) = self.output {
            config.storage.export.path = output;
        }

        if let Some(depth) = self.depth {
            config.crawler.max_depth = depth;
        }

        if let Some(limit) = self.limit {
            config.crawler.max_pages = limit;
        }

        config.validate()?;
        Ok(())
    }
}

/// Read seed URLs, one per line; blank lines and `#` comments are skipped
pub fn read_seeds_file(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .context(format!("Failed to read seeds file: {}", path.display()))?;

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Run a crawl to completion and print its summary
pub async fn crawl(mut urls: Vec<String>, seeds_file: Option<PathBuf>, options: CrawlOptions) -> Result<()> {
    if let Some(path) = &seeds_file {
        urls.extend(read_seeds_file(path)?);
    }
    if urls.is_empty() {
        anyhow::bail!("No seed URLs given");
    }

    let mut config = match &options.profile {
        Some(profile) => CrawlerConfig::load_profile(profile)
            .context(format!("Failed to load profile: {}", profile))?,
        None => CrawlerConfig::load_default()?,
    };
    options.apply(&mut config)?;

    let controller = CrawlerController::new(config).await?;
    info!("Crawl started with ID: {}", controller.crawl_id());

    let summary = controller.start_job(urls).await?;
    let metrics = &summary.metrics;

    println!("Crawl ID: {}", summary.crawl_id);
    println!(
        "Requests: {} ({} failed, {:.0} ms mean)",
        metrics.total_requests, metrics.failed_requests, metrics.mean_request_ms()
    );
    println!("Unique items exported: {}", summary.exported_items);
    println!("Rewards by run:");
    for (run_id, run) in &metrics.runs {
        println!(
            "  {:<10} pages {:>6}  reward {:>10.2}  rewarding pages {:>6}",
            run_id, run.pages, run.total_reward, run.rewarding_pages
        );
    }

    Ok(())
}

/// Collect exported items into a CSV and print counts per domain
pub async fn export_profiles(root: PathBuf, output: PathBuf) -> Result<()> {
    let stats = tokio::task::spawn_blocking(move || scripts::export_profiles(&root, &output))
        .await??;

    println!("Stat by domain:");
    for (domain, count) in stats {
        println!("{:<30} {:>8}", domain, count);
    }

    Ok(())
}

/// Sample item archives for manual review
pub async fn sample(root: PathBuf, output: PathBuf, n: usize) -> Result<()> {
    let out = output.clone();
    let written = tokio::task::spawn_blocking(move || scripts::sample_profiles(&root, &out, n))
        .await??;

    info!("Sampled {} archives into {}", written, output.display());

    Ok(())
}

/// List all available configuration profiles
pub async fn list_profiles() -> Result<()> {
    let profiles = CrawlerConfig::list_profiles().await?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Manage a specific configuration profile
pub async fn manage_profile(profile_name: String) -> Result<()> {
    match CrawlerConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{}", serde_yaml::to_string(&config)?);
        }
        Err(_) => {
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = CrawlerConfig::default();
            config.save_as_profile(&profile_name).await?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub async fn show_config() -> Result<()> {
    let config = CrawlerConfig::load_default()?;
    println!("Current configuration:");
    println!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_are_applied() {
        let mut config = CrawlerConfig::default();
        let options = CrawlOptions {
            runs: Some(3),
            request_penalty: Some(0.5),
            extractor: Some("profiles".to_string()),
            rules: Some(PathBuf::from("rules.csv")),
            limit: Some(0),
            ..Default::default()
        };

        options.apply(&mut config).unwrap();

        assert_eq!(config.goal.run_count, 3);
        assert_eq!(config.goal.request_reward, -0.5);
        assert_eq!(
            config.goal.extractor,
            ExtractorSettings::Profiles { rules_path: PathBuf::from("rules.csv") }
        );
        assert_eq!(config.crawler.max_pages, 0);
    }

    #[test]
    fn test_invalid_overrides_are_rejected() {
        let options = CrawlOptions {
            runs: Some(0),
            ..Default::default()
        };
        assert!(options.apply(&mut CrawlerConfig::default()).is_err());

        let options = CrawlOptions {
            extractor: Some("profiles".to_string()),
            ..Default::default()
        };
        assert!(options.apply(&mut CrawlerConfig::default()).is_err());
    }

    #[test]
    fn test_read_seeds_file_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seeds.txt");
        fs::write(&path, "# forums\nhttp://a.example/\n\n  http://b.example/  \n").unwrap();

        let seeds = read_seeds_file(&path).unwrap();
        assert_eq!(seeds, vec!["http://a.example/", "http://b.example/"]);
    }
}
