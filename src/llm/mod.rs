pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum LlmError {
    ConnectionError(String),
    ResponseError(String),
    ConfigError(String),
    Timeout(u64),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ConnectionError(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::ResponseError(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::ConfigError(msg) => write!(f, "LLM configuration error: {}", msg),
            LlmError::Timeout(secs) => write!(f, "LLM call timed out after {}s", secs),
        }
    }
}

impl Error for LlmError {}

/// The text-completion oracle: one prompt in, one completion out. No output
/// format is guaranteed - callers parse defensively.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Wraps the configured provider and bounds every call with a timeout so a
/// hung oracle surfaces as an ordinary error on the caller's failure path.
pub struct LlmManager {
    provider: Box<dyn TextCompletion>,
    timeout: Duration,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider: Box<dyn TextCompletion> = match config.backend.as_str() {
            "remote" => Box::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )));
            }
        };

        Ok(Self {
            provider,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Builds a manager around an arbitrary provider. Used by tests to
    /// substitute a scripted oracle.
    pub fn with_provider(provider: Box<dyn TextCompletion>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        match tokio::time::timeout(self.timeout, self.provider.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.timeout.as_secs())),
        }
    }

    /// Best-effort reachability probe for health reporting: a trivial bounded
    /// completion, where any error counts as unreachable.
    pub async fn health_check(&self) -> bool {
        self.complete("Respond with the single word OK.").await.is_ok()
    }
}
