use crate::ConfigError;
use jobpulse_core::OAuthProfile;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub version: u32,
    pub oauth: OAuthConfig,
    pub classifier: ClassifierConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_url: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub pacing_delay_ms: u64,
    pub snippet_head_chars: usize,
    pub snippet_tail_chars: usize,
    pub default_fetch_limit: usize,
    pub max_fetch_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub token_file: String,
    pub max_stored_tokens: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            oauth: OAuthConfig {
                client_id: String::new(),
                auth_url: "https://accounts.google.com/o/oauth2/auth".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                redirect_url: "http://localhost:8000/auth/callback".to_string(),
                scopes: vec![GMAIL_READONLY_SCOPE.to_string()],
            },
            classifier: ClassifierConfig {
                endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
                model: "llama-3.1-8b-instant".to_string(),
                max_tokens: 2000,
                temperature: 0.0,
            },
            pipeline: PipelineConfig {
                batch_size: 5,
                pacing_delay_ms: 1000,
                snippet_head_chars: 300,
                snippet_tail_chars: 200,
                default_fetch_limit: 20,
                max_fetch_limit: 100,
            },
            storage: StorageConfig {
                token_file: "tokens.json".to_string(),
                max_stored_tokens: 3,
            },
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.batch_size must be at least 1".to_string(),
            ));
        }
        if self.pipeline.max_fetch_limit == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_fetch_limit must be at least 1".to_string(),
            ));
        }
        if self.storage.max_stored_tokens == 0 {
            return Err(ConfigError::Invalid(
                "storage.max_stored_tokens must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.classifier.temperature) {
            return Err(ConfigError::Invalid(
                "classifier.temperature must be within 0.0..=2.0".to_string(),
            ));
        }
        Url::parse(&self.classifier.endpoint)?;
        self.oauth.profile()?;
        Ok(())
    }
}

impl OAuthConfig {
    pub fn profile(&self) -> Result<OAuthProfile, ConfigError> {
        Ok(OAuthProfile {
            client_id: self.client_id.clone(),
            auth_url: Url::parse(&self.auth_url)?,
            token_url: Url::parse(&self.token_url)?,
            redirect_url: Url::parse(&self.redirect_url)?,
            scopes: self.scopes.clone(),
        })
    }
}

impl PipelineConfig {
    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn clamp_fetch_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_fetch_limit)
            .clamp(1, self.max_fetch_limit.max(1))
    }
}
