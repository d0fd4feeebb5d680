//! Outbound HTTP for remote image references.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::application::render::{HttpFetcher, HttpResponse};
use crate::config::RenderSettings;
use crate::domain::error::JobError;

use super::error::InfraError;

/// [`HttpFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_settings(settings: &RenderSettings) -> Result<Self, InfraError> {
        Self::new(settings.fetch_timeout, &settings.user_agent)
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &Url) -> Result<HttpResponse, JobError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|err| JobError::transport(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| JobError::Transport {
                status: Some(status),
                message: format!("failed to read body: {err}"),
            })?;

        debug!(
            target = "infra::http",
            op = "get",
            url = %url,
            status,
            bytes = body.len(),
            "Fetched remote resource"
        );
        Ok(HttpResponse { status, body })
    }
}
