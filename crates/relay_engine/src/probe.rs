use std::time::Duration;

use futures_util::StreamExt;
use relay_core::{CanonicalAddress, ProbeFailure, ProbeTarget};
use reqwest::header::{ACCEPT, USER_AGENT};
use thiserror::Error;

use crate::fetch::{BROWSER_ACCEPT, BROWSER_USER_AGENT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body_non_empty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("invalid probe target: {0}")]
    InvalidTarget(String),
    #[error("could not build probe client: {0}")]
    Client(String),
    #[error("probe cancelled")]
    Cancelled,
}

impl From<ProbeError> for ProbeFailure {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Timeout => ProbeFailure::Timeout,
            ProbeError::Connection(message) => ProbeFailure::Connection(message),
            ProbeError::InvalidTarget(message) => ProbeFailure::InvalidTarget(message),
            ProbeError::Client(message) => ProbeFailure::Client(message),
            ProbeError::Cancelled => ProbeFailure::Cancelled,
        }
    }
}

/// Issues one request to `target` using `candidate` as a forward relay.
#[async_trait::async_trait]
pub trait ProbeClient: Send + Sync {
    async fn probe(
        &self,
        candidate: &CanonicalAddress,
        target: &ProbeTarget,
        timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError>;
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub connect_timeout: Duration,
    /// Body bytes read before the body is considered present.
    pub max_body_bytes: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Builds a fresh client for every probe with idle pooling disabled, so no
/// connection ever outlives the probe that opened it.
#[derive(Debug, Clone, Default)]
pub struct ReqwestProbeClient {
    settings: ProbeSettings,
}

impl ReqwestProbeClient {
    pub fn new(settings: ProbeSettings) -> Self {
        Self { settings }
    }

    fn build_client(
        &self,
        candidate: &CanonicalAddress,
        timeout: Duration,
    ) -> Result<reqwest::Client, ProbeError> {
        let proxy = reqwest::Proxy::all(candidate.proxy_uri())
            .map_err(|err| ProbeError::Client(err.to_string()))?;
        reqwest::Client::builder()
            .proxy(proxy)
            .pool_max_idle_per_host(0)
            .connect_timeout(self.settings.connect_timeout.min(timeout))
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| ProbeError::Client(err.to_string()))
    }
}

#[async_trait::async_trait]
impl ProbeClient for ReqwestProbeClient {
    async fn probe(
        &self,
        candidate: &CanonicalAddress,
        target: &ProbeTarget,
        timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError> {
        let url = reqwest::Url::parse(&target.uri)
            .map_err(|err| ProbeError::InvalidTarget(err.to_string()))?;
        let client = self.build_client(candidate, timeout)?;

        let response = client
            .get(url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(ACCEPT, BROWSER_ACCEPT)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status().as_u16();

        // Relays that truncate bodies commonly answer with whitespace only.
        let mut body_non_empty = false;
        let mut read = 0usize;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            if chunk.iter().any(|b| !b.is_ascii_whitespace()) {
                body_non_empty = true;
            }
            read += chunk.len();
            if body_non_empty || read >= self.settings.max_body_bytes {
                break;
            }
        }

        Ok(ProbeResponse {
            status,
            body_non_empty,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ProbeError {
    if err.is_timeout() {
        return ProbeError::Timeout;
    }
    ProbeError::Connection(err.to_string())
}
