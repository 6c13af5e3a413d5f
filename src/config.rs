//! Environment-driven configuration.
//!
//! Configuration is read once at startup into an explicit [`Config`] value and shared through an
//! `Arc`. [`Config::from_source`] accepts any key lookup so tests can supply a map instead of
//! touching the process environment.

use crate::feedback::RiskPolicy;
use crate::resilience::RetryPolicy;
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
const DEFAULT_TWILIO_URL: &str = "https://api.twilio.com";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Watched document directories and the cache location.
    pub directories: DirectoryConfig,
    /// Embedding provider settings.
    pub embedding: EmbeddingConfig,
    /// Generative provider settings.
    pub generation: GenerationConfig,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// OpenAI-compatible endpoint settings.
    pub openai: OpenAiConfig,
    /// Chunk budgets and tokenizer selection.
    pub chunking: ChunkingConfig,
    /// Number of passages retrieved per question.
    pub retrieval_top_k: usize,
    /// Timeout and retry policy applied to every external call.
    pub resilience: RetryPolicy,
    /// Risk scoring thresholds and cut points.
    pub risk: RiskPolicy,
    /// Messaging gateway credentials; `None` disables the relay.
    pub messaging: Option<TwilioConfig>,
}

/// Filesystem layout used by ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryConfig {
    /// Directory scanned for paginated documents.
    pub paginated: PathBuf,
    /// Directory scanned for spreadsheets.
    pub tabular: PathBuf,
    /// Directory holding the cache manifest and the index snapshot.
    pub cache: PathBuf,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI-compatible embeddings API.
    OpenAI,
    /// Deterministic offline hashing embedder.
    Hash,
}

/// Supported generative backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI-compatible chat completions API.
    OpenAI,
}

/// Embedding capability configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Backend used to embed passages and questions.
    pub provider: EmbeddingProvider,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Expected vector dimensionality.
    pub dimension: usize,
    /// Maximum number of texts per embedding request.
    pub batch_size: usize,
}

/// Generative capability configuration.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Backend used for answers and feedback analysis.
    pub provider: GenerationProvider,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Sampling temperature used for answers.
    pub temperature: f32,
}

/// OpenAI-compatible endpoint settings.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API base URL without the `/v1` suffix.
    pub base_url: String,
    /// Bearer token; required when any OpenAI provider is selected.
    pub api_key: Option<String>,
}

/// Chunking configuration.
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Token budget for chunks of paginated documents.
    pub paginated_chunk_size: usize,
    /// Token budget for chunks of spreadsheets.
    pub tabular_chunk_size: usize,
    /// Fraction of the budget repeated between adjacent chunks.
    pub overlap_ratio: f32,
    /// `whitespace` or a tiktoken model/encoding name.
    pub tokenizer: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            paginated_chunk_size: 512,
            tabular_chunk_size: 384,
            overlap_ratio: 0.15,
            tokenizer: "whitespace".into(),
        }
    }
}

/// Twilio WhatsApp credentials.
#[derive(Clone)]
pub struct TwilioConfig {
    /// Account SID used in request paths and basic auth.
    pub account_sid: String,
    /// Auth token used for basic auth.
    pub auth_token: String,
    /// Sender number, with or without the `whatsapp:` prefix.
    pub whatsapp_number: String,
    /// API base URL.
    pub base_url: String,
}

impl std::fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"***")
            .field("whatsapp_number", &self.whatsapp_number)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Config {
    /// Load `.env` (when present) and then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        tracing::debug!(
            paginated_dir = %config.directories.paginated.display(),
            tabular_dir = %config.directories.tabular.display(),
            cache_dir = %config.directories.cache.display(),
            embedding_provider = ?config.embedding.provider,
            generation_provider = ?config.generation.provider,
            messaging = config.messaging.is_some(),
            server_port = ?config.server_port,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source(&lookup);

        let embedding_provider = source.parse_or("EMBEDDING_PROVIDER", EmbeddingProvider::Ollama)?;
        let generation_provider =
            source.parse_or("GENERATION_PROVIDER", GenerationProvider::Ollama)?;

        let openai = OpenAiConfig {
            base_url: source.string_or("OPENAI_BASE_URL", DEFAULT_OPENAI_URL),
            api_key: source.optional("OPENAI_API_KEY"),
        };
        let needs_openai_key = embedding_provider == EmbeddingProvider::OpenAI
            || generation_provider == GenerationProvider::OpenAI;
        if needs_openai_key && openai.api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".into()));
        }

        let embedding = EmbeddingConfig {
            provider: embedding_provider,
            model: source.string_or("EMBEDDING_MODEL", "nomic-embed-text"),
            dimension: source.positive_or("EMBEDDING_DIMENSION", 768)?,
            batch_size: source.positive_or("EMBEDDING_BATCH_SIZE", 16)?,
        };

        let generation = GenerationConfig {
            provider: generation_provider,
            model: source.string_or("GENERATION_MODEL", "llama3.1"),
            temperature: source.parse_or("GENERATION_TEMPERATURE", 0.2_f32)?,
        };

        let chunking = ChunkingConfig {
            paginated_chunk_size: source.positive_or("CHUNK_SIZE_PAGINATED", 512)?,
            tabular_chunk_size: source.positive_or("CHUNK_SIZE_TABULAR", 384)?,
            overlap_ratio: source.parse_or("CHUNK_OVERLAP_RATIO", 0.15_f32)?,
            tokenizer: source.string_or("TOKENIZER", "whitespace"),
        };
        if !(0.0..0.5).contains(&chunking.overlap_ratio) {
            return Err(ConfigError::InvalidValue(
                "CHUNK_OVERLAP_RATIO must be within [0, 0.5)".into(),
            ));
        }

        let defaults = RetryPolicy::default();
        let resilience = RetryPolicy {
            max_attempts: source.positive_or("EXTERNAL_MAX_ATTEMPTS", defaults.max_attempts)?,
            timeout: Duration::from_secs(
                source.positive_or("EXTERNAL_TIMEOUT_SECS", defaults.timeout.as_secs())?,
            ),
            initial_backoff: Duration::from_millis(source.parse_or(
                "EXTERNAL_BACKOFF_MS",
                defaults.initial_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(source.parse_or(
                "EXTERNAL_MAX_BACKOFF_MS",
                defaults.max_backoff.as_millis() as u64,
            )?),
        };

        let risk_defaults = RiskPolicy::default();
        let risk = RiskPolicy {
            wait_threshold_min: source
                .parse_or("RISK_WAIT_THRESHOLD_MIN", risk_defaults.wait_threshold_min)?,
            wait_ramp_min: source.positive_or("RISK_WAIT_RAMP_MIN", risk_defaults.wait_ramp_min)?,
            low_cut: source.parse_or("RISK_LOW_CUT", risk_defaults.low_cut)?,
            high_cut: source.parse_or("RISK_HIGH_CUT", risk_defaults.high_cut)?,
        };
        if risk.low_cut >= risk.high_cut || risk.high_cut > 100.0 || risk.low_cut < 0.0 {
            return Err(ConfigError::InvalidValue(
                "RISK_LOW_CUT must be below RISK_HIGH_CUT within [0, 100]".into(),
            ));
        }

        let messaging = match (
            source.optional("TWILIO_ACCOUNT_SID"),
            source.optional("TWILIO_AUTH_TOKEN"),
            source.optional("TWILIO_WHATSAPP_NUMBER"),
        ) {
            (Some(account_sid), Some(auth_token), Some(whatsapp_number)) => Some(TwilioConfig {
                account_sid,
                auth_token,
                whatsapp_number,
                base_url: source.string_or("TWILIO_BASE_URL", DEFAULT_TWILIO_URL),
            }),
            _ => None,
        };

        Ok(Self {
            server_port: source.optional_parse("SERVER_PORT")?,
            directories: DirectoryConfig {
                paginated: source.string_or("PAGINATED_DIR", "data/pdfs").into(),
                tabular: source.string_or("TABULAR_DIR", "data/spreadsheets").into(),
                cache: source.string_or("CACHE_DIR", "data/cache").into(),
            },
            embedding,
            generation,
            ollama_url: source.string_or("OLLAMA_URL", DEFAULT_OLLAMA_URL),
            openai,
            chunking,
            retrieval_top_k: source.positive_or("RETRIEVAL_TOP_K", 4)?,
            resilience,
            risk,
            messaging,
        })
    }
}

struct Source<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Source<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn optional_parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.optional(key)
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string()))
            })
            .transpose()
    }

    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.optional_parse(key)?.unwrap_or(default))
    }

    fn positive_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default,
    {
        let value = self.parse_or(key, default)?;
        if value <= T::default() {
            return Err(ConfigError::InvalidValue(format!(
                "{key} must be greater than zero"
            )));
        }
        Ok(value)
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

impl FromStr for GenerationProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}
