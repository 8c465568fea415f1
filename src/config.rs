use anyhow::{Context, Result};

const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TEMPERATURE: f64 = 0.3;

/// Where and how to reach the transcript API.
#[derive(Debug, Clone, Default)]
pub struct TranscriptApiConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

/// Chat completion settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    /// Ask the service for a bare JSON object (`response_format`).
    pub json_mode: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key: None,
            temperature: DEFAULT_TEMPERATURE,
            json_mode: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub transcript_api: TranscriptApiConfig,
    pub llm: LlmConfig,
}

impl Config {
    /// Load from the process environment, after reading `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();
        Self::from_vars(|key| dotenv::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let transcript_api = TranscriptApiConfig {
            endpoint: get("TRANSCRIPT_API_ENDPOINT"),
            api_key: get("TRANSCRIPT_API_KEY"),
        };

        let temperature = match get("LLM_TEMPERATURE") {
            Some(raw) => raw
                .parse::<f64>()
                .with_context(|| format!("LLM_TEMPERATURE is not a number: {}", raw))?,
            None => DEFAULT_TEMPERATURE,
        };

        let json_mode = get("LLM_JSON_MODE")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        let llm = LlmConfig {
            base_url: get("LLM_BASE_URL")
                .or_else(|| get("OPENAI_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            api_key: get("LLM_API_KEY").or_else(|| get("OPENAI_API_KEY")),
            temperature,
            json_mode,
        };

        Ok(Self {
            transcript_api,
            llm,
        })
    }
}
