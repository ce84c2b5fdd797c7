//! HTTP client for the controller API
//!
//! All endpoints live under `{url}/collectors/{name}` and use basic auth.
//! Every request is bounded by the client's timeout so a stalled controller
//! cannot hold up heartbeats or batch completion.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::{Controller, CycleConfig, Heartbeat, ResultSink};
use crate::call::Summary;
use crate::descriptor::RawDescriptor;
use crate::report::{Failure, Sample};
use crate::{Error, Result};

/// Controller reached over HTTP/JSON
pub struct HttpController {
    base_url: String,
    username: String,
    password: Option<SecretString>,
    collector: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SamplesPayload<'a> {
    samples: &'a [Sample],
}

impl HttpController {
    /// Create a new controller client whose requests give up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str, collector: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: String::new(),
            password: None,
            collector: collector.to_string(),
            client,
        })
    }

    /// Authenticate requests with basic auth
    #[must_use]
    pub fn with_credentials(mut self, username: &str, password: Option<SecretString>) -> Self {
        self.username = username.to_string();
        self.password = password;
        self
    }

    fn url(&self, collector: &str, path: &str) -> String {
        format!("{}/collectors/{collector}/{path}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.request(method, url);
        if self.username.is_empty() {
            request
        } else {
            request.basic_auth(
                &self.username,
                self.password.as_ref().map(|p| p.expose_secret()),
            )
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Controller(format!("controller error {status}: {body}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl Controller for HttpController {
    async fn fetch_descriptors(&self, collector: &str, kind: &str) -> Result<Vec<RawDescriptor>> {
        let url = self.url(collector, "descriptors");
        let response = self
            .send(self.request(reqwest::Method::GET, &url).query(&[("kind", kind)]))
            .await?;
        let descriptors: Vec<RawDescriptor> = response.json().await?;

        tracing::debug!(count = descriptors.len(), "fetched descriptors");
        Ok(descriptors)
    }

    async fn fetch_cycle_config(&self, collector: &str) -> Result<CycleConfig> {
        let url = self.url(collector, "config");
        let response = self.send(self.request(reqwest::Method::GET, &url)).await?;
        Ok(response.json().await?)
    }

    async fn post_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()> {
        let url = self.url(&self.collector, "heartbeat");
        self.send(self.request(reqwest::Method::POST, &url).json(heartbeat))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for HttpController {
    async fn post_summary(&self, summary: &Summary) -> Result<()> {
        let samples = summary.samples();
        if samples.is_empty() {
            tracing::debug!(call_id = %summary.call_id, "no samples to post");
            return Ok(());
        }

        let url = self.url(&self.collector, "results");
        self.send(
            self.request(reqwest::Method::POST, &url)
                .json(&SamplesPayload { samples: &samples }),
        )
        .await?;
        Ok(())
    }

    async fn post_failure(&self, failure: &Failure) -> Result<()> {
        let url = self.url(&self.collector, "events");
        self.send(self.request(reqwest::Method::POST, &url).json(failure))
            .await?;
        Ok(())
    }
}
