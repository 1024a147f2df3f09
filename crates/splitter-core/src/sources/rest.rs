//! HTTP-based quantum randomness providers.
//!
//! Each provider issues one GET per sample. The provider is trusted for
//! entropy quality; the whole response body is reduced to an integer with
//! FNV-1a 64, which is only a byte-to-integer reduction.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::source::{EntropySource, Sample};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_IDLE_PER_HOST: usize = 5;

const ANU_API_BASE_URL: &str = "https://api.quantumnumbers.anu.edu.au";
const ANU_LENGTH: usize = 1024;
const ETHZ_API_URL: &str = "http://qrng.ethz.ch/api/randint";
const ETHZ_SIZE: usize = 256;
const NIST_BEACON_URL: &str = "https://beacon.nist.gov/beacon/2.0/pulse/last";

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a, 64-bit.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    data.iter()
        .fold(FNV_OFFSET_BASIS, |h, &b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// Entropy source backed by an HTTP GET endpoint.
#[derive(Debug, Clone)]
pub struct RestSource {
    name: String,
    url: String,
    headers: HeaderMap,
    client: reqwest::Client,
}

impl RestSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self, SourceError> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .user_agent(concat!("universe-splitter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::InvalidConfig {
                provider: name.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            name,
            url: url.into(),
            headers: HeaderMap::new(),
            client,
        })
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, key: &'static str, value: &str) -> Result<Self, SourceError> {
        let value = HeaderValue::from_str(value).map_err(|e| SourceError::InvalidConfig {
            provider: self.name.clone(),
            reason: format!("header {key}: {e}"),
        })?;
        self.headers.insert(HeaderName::from_static(key), value);
        Ok(self)
    }

    /// ANU quantum numbers API (vacuum fluctuation measurements).
    pub fn anu(api_key: &str) -> Result<Self, SourceError> {
        if api_key.is_empty() {
            return Err(SourceError::InvalidConfig {
                provider: "ANU".to_string(),
                reason: "api key is empty".to_string(),
            });
        }
        Self::new(
            "ANU",
            format!("{ANU_API_BASE_URL}?length={ANU_LENGTH}&type=uint16"),
        )?
        .with_header("x-api-key", api_key)
    }

    /// ETH Zürich QRNG, full `i32` range.
    pub fn ethz() -> Result<Self, SourceError> {
        Self::new(
            "ETHZ",
            format!(
                "{ETHZ_API_URL}?size={ETHZ_SIZE}&min={}&max={}",
                i32::MIN,
                i32::MAX
            ),
        )
    }

    /// NIST randomness beacon, latest pulse.
    pub fn nist_beacon() -> Result<Self, SourceError> {
        Self::new("NIST", NIST_BEACON_URL)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<u64, SourceError> {
        let response = self
            .client
            .get(&self.url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|source| SourceError::Transport {
                provider: self.name.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                provider: self.name.clone(),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| SourceError::Transport {
                provider: self.name.clone(),
                source,
            })?;
        Ok(fnv1a_64(&body))
    }
}

#[async_trait]
impl EntropySource for RestSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_random(&self, cancel: &CancellationToken) -> Result<Sample, SourceError> {
        let hash = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            hash = self.fetch() => hash?,
        };
        Ok(Sample::new(hash as i64, self.name.clone()))
    }
}
