//! URL reputation gate backed by the VirusTotal v2 URL API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::config::VirusTotalConfig;

const DEFAULT_BASE_URL: &str = "https://www.virustotal.com/vtapi/v2";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// What the reputation service knows about a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationResult {
    pub resource_scanned: bool,
    pub scan_link: Option<String>,
    pub scan_date: Option<String>,
    pub positives: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReputationDecision {
    /// Scanned and clean; render may proceed.
    Approved(ReputationResult),
    /// Not scanned yet; a scan has been submitted. Retry later.
    Pending(ReputationResult),
    /// Scanned with at least one positive. Final.
    Rejected(ReputationResult),
}

#[derive(Debug, Error)]
pub enum ReputationError {
    #[error("Reputation service request failed: {0}")]
    Transport(String),

    #[error("Reputation service returned HTTP {0}")]
    Status(u16),

    #[error("Reputation service quota exhausted")]
    QuotaExhausted,

    #[error("Unexpected reputation service response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for ReputationError {
    fn from(e: reqwest::Error) -> Self {
        // reqwest errors may carry the request URL; keep only the kind.
        ReputationError::Transport(e.without_url().to_string())
    }
}

/// Remote URL reputation lookups.
#[async_trait]
pub trait ReputationService: Send + Sync {
    async fn lookup(&self, url: &str) -> Result<ReputationResult, ReputationError>;

    async fn submit_scan(&self, url: &str) -> Result<(), ReputationError>;
}

/// Decides whether a URL may be rendered.
#[derive(Clone)]
pub struct ReputationGate {
    service: Arc<dyn ReputationService>,
}

impl std::fmt::Debug for ReputationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReputationGate").finish_non_exhaustive()
    }
}

impl ReputationGate {
    pub fn new(service: Arc<dyn ReputationService>) -> Self {
        Self { service }
    }

    /// One lookup per call, no caching. An unscanned URL triggers a
    /// background scan submission whose outcome is only logged.
    pub async fn check(&self, url: &str) -> Result<ReputationDecision, ReputationError> {
        let result = self.service.lookup(url).await?;

        if !result.resource_scanned {
            info!("URL not scanned yet, submitting for scan");
            let service = Arc::clone(&self.service);
            let target = url.to_string();
            tokio::spawn(async move {
                if let Err(e) = service.submit_scan(&target).await {
                    warn!("Scan submission failed: {}", e);
                }
            });
            return Ok(ReputationDecision::Pending(result));
        }

        if result.positives > 0 {
            info!(
                positives = result.positives,
                total = result.total,
                "URL rejected by reputation check"
            );
            return Ok(ReputationDecision::Rejected(result));
        }

        debug!(total = result.total, "URL passed reputation check");
        Ok(ReputationDecision::Approved(result))
    }
}

#[derive(Debug, Deserialize)]
struct UrlReport {
    response_code: i64,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    scan_date: Option<String>,
    #[serde(default)]
    verbose_msg: Option<String>,
    #[serde(default)]
    positives: Option<u32>,
    #[serde(default)]
    total: Option<u32>,
}

impl TryFrom<UrlReport> for ReputationResult {
    type Error = ReputationError;

    /// A scanned report must carry its counts; a missing count is never read
    /// as clean.
    fn try_from(report: UrlReport) -> Result<Self, Self::Error> {
        let resource_scanned = report.response_code == 1;
        let (positives, total) = match (report.positives, report.total) {
            (Some(positives), Some(total)) => (positives, total),
            _ if resource_scanned => {
                return Err(ReputationError::Protocol(
                    "scanned report without positives/total".to_string(),
                ));
            }
            _ => (0, 0),
        };
        Ok(Self {
            resource_scanned,
            scan_link: report.permalink,
            scan_date: report.scan_date,
            positives,
            total,
        })
    }
}

/// VirusTotal v2 client: `url/report` for lookups, `url/scan` for submission.
pub struct VirusTotalClient {
    base_url: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl std::fmt::Debug for VirusTotalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirusTotalClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl VirusTotalClient {
    pub fn new(config: &VirusTotalConfig) -> Result<Self, ReputationError> {
        let timeout = Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReputationError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: SecretString::from(config.api_key.expose_secret().to_string()),
            client,
        })
    }

    async fn post(&self, endpoint: &str, form: &[(&str, &str)]) -> Result<UrlReport, ReputationError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self.client.post(&url).form(form).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Err(ReputationError::QuotaExhausted);
        }
        if !status.is_success() {
            return Err(ReputationError::Status(status.as_u16()));
        }

        let report: UrlReport = response
            .json()
            .await
            .map_err(|e| ReputationError::Protocol(e.without_url().to_string()))?;
        if let Some(msg) = &report.verbose_msg {
            debug!(endpoint, response_code = report.response_code, "{}", msg);
        }
        Ok(report)
    }
}

#[async_trait]
impl ReputationService for VirusTotalClient {
    async fn lookup(&self, url: &str) -> Result<ReputationResult, ReputationError> {
        let report = self
            .post(
                "url/report",
                &[("apikey", self.api_key.expose_secret()), ("resource", url)],
            )
            .await?;
        report.try_into()
    }

    async fn submit_scan(&self, url: &str) -> Result<(), ReputationError> {
        let report = self
            .post("url/scan", &[("apikey", self.api_key.expose_secret()), ("url", url)])
            .await?;
        if report.response_code != 1 {
            return Err(ReputationError::Protocol(format!(
                "scan submission returned response_code {}",
                report.response_code
            )));
        }
        Ok(())
    }
}
