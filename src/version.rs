//! Remote version check against the recorder's HTTP API.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Version record reported by `GET /api/0/version`.
///
/// Both fields are empty when the recorder could not be asked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct VersionInfo {
    pub version: String,
    pub git: String,
}

/// Client for the recorder's version endpoint.
#[derive(Debug, Clone)]
pub struct VersionClient {
    client: reqwest::Client,
    url: String,
}

impl VersionClient {
    /// Build a client for the recorder at `base_url`, with a per-request timeout.
    ///
    /// Proxy environment variables are ignored; the recorder is expected to
    /// be reachable directly.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            url: version_url(base_url),
        })
    }

    /// The full URL that [`fetch`](Self::fetch) requests.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ask the recorder for its version.
    ///
    /// Never fails: any network, status or decoding problem yields
    /// `VersionInfo::default()`.
    pub async fn fetch(&self) -> VersionInfo {
        match self.try_fetch().await {
            Ok(info) => info,
            Err(e) => {
                tracing::debug!(error = %e, url = %self.url, "version check failed");
                VersionInfo::default()
            }
        }
    }

    async fn try_fetch(&self) -> Result<VersionInfo, reqwest::Error> {
        self.client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<VersionInfo>()
            .await
    }
}

fn version_url(base_url: &str) -> String {
    format!("{}/api/0/version", base_url.trim_end_matches('/'))
}
