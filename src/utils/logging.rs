use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose info logs drown out the crawl itself
const NOISY_CRATES: &[&str] = &["hyper", "reqwest", "sqlx", "html5ever", "selectors"];

fn crawl_filter(verbose: bool) -> Result<EnvFilter> {
    let level = if verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::from_default_env()
        .add_directive(format!("deep_crawler={}", level).parse()?);

    for name in NOISY_CRATES {
        filter = filter.add_directive(format!("{}=warn", name).parse()?);
    }

    Ok(filter.add_directive("warn".parse()?))
}

fn open_log_file(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create log directory: {}", parent.display()))?;
        }
    }

    // Successive crawls append to the same log
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context(format!("Failed to open log file: {}", path.display()))
}

/// Log to stderr, and to `log_file` as plain text when given
pub fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = Arc::new(open_log_file(&path)?);
            Some(fmt::layer().with_ansi(false).with_writer(file))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(crawl_filter(verbose)?)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Logging was already initialized")?;

    Ok(())
}

/// Log file used when `--log-file` is given without a path
pub fn default_log_file() -> PathBuf {
    directories::ProjectDirs::from("com", "deep-crawler", "deep-crawler")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./logs"))
        .join("crawler.log")
}
