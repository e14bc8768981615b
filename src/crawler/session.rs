use anyhow::{Context, Result};
use reqwest::{header::CONTENT_TYPE, Client, Method};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cli::config::CrawlerSettings;
use crate::crawler::request::{CrawlRequest, Page};

/// Session used by requests that carry no run context
const SHARED_SESSION: &str = "shared";

/// HTTP clients keyed by session, each with its own cookie jar
pub struct SessionStore {
    clients: Mutex<HashMap<String, Client>>,
    user_agent: String,
    timeout: Duration,
}

impl SessionStore {
    pub fn new(settings: &CrawlerSettings) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            user_agent: settings.user_agent.clone(),
            timeout: Duration::from_secs(settings.request_timeout),
        }
    }

    /// Client for `session_key`, created on first use
    pub async fn client_for(&self, session_key: &str) -> Result<Client> {
        let mut clients = self.clients.lock().await;

        if let Some(client) = clients.get(session_key) {
            return Ok(client.clone());
        }

        let client = Client::builder()
            .cookie_store(true)
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        debug!("Opened session {}", session_key);
        clients.insert(session_key.to_string(), client.clone());

        Ok(client)
    }

    /// Number of sessions opened so far
    pub async fn session_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Fetch a request within its run's session
    pub async fn fetch(&self, request: &CrawlRequest) -> Result<Page> {
        let session_key = request.session_key().unwrap_or(SHARED_SESSION);
        let client = self.client_for(session_key).await?;

        let method = Method::from_bytes(request.method.as_bytes())
            .context(format!("Invalid HTTP method: {}", request.method))?;

        let mut builder = client.request(method, &request.url);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await
            .context(format!("Failed to fetch {}", request.url))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response.headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let body = response.text().await
            .context(format!("Failed to read body of {}", request.url))?;

        debug!("Fetched {} ({}, {} bytes)", final_url, status, body.len());

        Ok(Page::new(request.clone(), final_url, status, content_type, body))
    }
}
