//! CLI command implementations.

pub mod builds;
pub mod ids;
pub mod run;

use anyhow::{Context, Result, bail};
use hookci_config::parse_system_config;
use serde::de::DeserializeOwned;
use url::Url;

/// Thin client for the hookci server API.
pub struct ApiClient {
    base: Url,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let base = Url::parse(api_url).with_context(|| format!("Invalid API URL: {}", api_url))?;
        Ok(Self {
            base,
            http: reqwest::Client::new(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("Invalid API path: {}", path))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.http.get(self.url(path)?).send().await?;
        Self::json(response).await
    }

    pub async fn get_text(&self, path: &str) -> Result<String> {
        let response = Self::check(self.http.get(self.url(path)?).send().await?).await?;
        Ok(response.text().await?)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: Option<&B>) -> Result<T>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.http.post(self.url(path)?);
        if let Some(body) = body {
            request = request.json(body);
        }
        Self::json(request.send().await?).await
    }

    async fn json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Turn a non-2xx response into an error carrying the server's message.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message = body
            .get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("no details");
        bail!("Server returned {}: {}", status, message)
    }
}

pub fn validate(path: &str) -> Result<()> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    match parse_system_config(&content) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  listen:      {}", config.server.listen);
            println!("  log root:    {}", config.storage.log_root.display());
            println!("  work dir:    {}", config.storage.work_dir.display());
            println!(
                "  store:       {}",
                if config.storage.database_url.is_some() {
                    "postgres"
                } else {
                    "memory"
                }
            );
            println!("  workers:     {}", config.workers.pool_size);
            println!("  step limit:  {}s", config.workers.step_timeout.as_secs());
            println!("  steps:");
            for step in &config.steps {
                println!("    {} ({:?}): {}", step.name, step.dir, step.command.join(" "));
            }
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
