//! REST backfill after a gap in the live connection
//!
//! Nothing is buffered while a client is offline, so after every reconnect
//! the durable state (unread counts, recent notifications, conversations)
//! is fetched again from the REST layer.

use futures::future::BoxFuture;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;

/// Request timeout for each backfill fetch
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{path} returned HTTP {status}")]
    Status { path: String, status: u16 },
}

/// Fresh copies of the durable resources, keyed by REST path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Backfill {
    pub resources: BTreeMap<String, serde_json::Value>,
}

impl Backfill {
    pub fn get(&self, path: &str) -> Option<&serde_json::Value> {
        self.resources.get(path)
    }
}

/// Re-synchronizes durable state after a reconnect
pub trait Resync: Send + Sync {
    fn resync<'a>(&'a self, token: Option<&'a str>) -> BoxFuture<'a, Result<Backfill, BackfillError>>;
}

/// Fetches a fixed list of REST paths with the session's bearer token
#[derive(Debug, Clone)]
pub struct HttpBackfill {
    http_client: Client,
    base_url: String,
    paths: Vec<String>,
}

impl HttpBackfill {
    pub fn new<I, S>(base_url: impl Into<String>, paths: I) -> Result<Self, BackfillError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            paths: paths.into_iter().map(Into::into).collect(),
        })
    }

    async fn fetch_all(&self, token: Option<&str>) -> Result<Backfill, BackfillError> {
        let mut backfill = Backfill::default();
        for path in &self.paths {
            let mut request = self.http_client.get(format!("{}{}", self.base_url, path));
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(BackfillError::Status {
                    path: path.clone(),
                    status: status.as_u16(),
                });
            }

            let body: serde_json::Value = response.json().await?;
            backfill.resources.insert(path.clone(), body);
        }

        tracing::debug!(resources = backfill.resources.len(), "Backfill complete");
        Ok(backfill)
    }
}

impl Resync for HttpBackfill {
    fn resync<'a>(&'a self, token: Option<&'a str>) -> BoxFuture<'a, Result<Backfill, BackfillError>> {
        Box::pin(self.fetch_all(token))
    }
}
