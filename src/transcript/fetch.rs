use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info};

use super::types::{parse_entries, TranscriptEntry};
use crate::config::TranscriptApiConfig;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("either --bot-id or --sample-file must be provided")]
    NoSource,
    #[error("TRANSCRIPT_API_ENDPOINT is not configured")]
    MissingEndpoint,
}

/// Where this run's transcript comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptSource {
    Bot(String),
    File(PathBuf),
}

impl TranscriptSource {
    /// Exactly one of the two inputs must be set.
    pub fn from_args(bot_id: Option<String>, sample_file: Option<PathBuf>) -> Result<Self, SourceError> {
        match (bot_id, sample_file) {
            (Some(id), _) if !id.trim().is_empty() => Ok(Self::Bot(id.trim().to_string())),
            (_, Some(path)) => Ok(Self::File(path)),
            _ => Err(SourceError::NoSource),
        }
    }

    pub async fn load(&self, api: &TranscriptApi) -> Result<Vec<TranscriptEntry>> {
        match self {
            Self::Bot(id) => api.fetch(id).await,
            Self::File(path) => read_sample_file(path),
        }
    }
}

/// HTTP client for the bot transcript endpoint.
pub struct TranscriptApi {
    client: reqwest::Client,
    config: TranscriptApiConfig,
}

impl TranscriptApi {
    pub fn new(config: TranscriptApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, config })
    }

    fn url(&self, bot_id: &str) -> Result<String> {
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .ok_or(SourceError::MissingEndpoint)?;
        Ok(format!(
            "{}/api/v1/bots/{}/get_transcript",
            endpoint.trim_end_matches('/'),
            bot_id
        ))
    }

    /// One GET, no retry. Any transport or status failure is fatal.
    pub async fn fetch(&self, bot_id: &str) -> Result<Vec<TranscriptEntry>> {
        let url = self.url(bot_id)?;
        info!(bot_id, "Fetching transcript");

        let mut req = self
            .client
            .get(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.config.api_key {
            req = req.header("Authorization", format!("Token {}", key));
        }

        let body = async {
            let resp = req.send().await?.error_for_status()?;
            resp.text().await
        }
        .await
        .with_context(|| format!("Failed to fetch transcript data for bot {}", bot_id))?;

        debug!(bytes = body.len(), "Transcript response received");
        parse_entries(&body).context("Failed to parse transcript response")
    }
}

/// Read a local JSON file with the same shape as the API response.
pub fn read_sample_file(path: &Path) -> Result<Vec<TranscriptEntry>> {
    info!(path = %path.display(), "Reading sample transcript");
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sample file {}", path.display()))?;
    parse_entries(&text).with_context(|| format!("Failed to parse sample file {}", path.display()))
}
