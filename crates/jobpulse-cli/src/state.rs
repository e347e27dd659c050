use anyhow::Context;
use jobpulse_ai::{ChatCompletionsBackend, Classifier};
use jobpulse_config::{AppConfig, ConfigManager};
use jobpulse_jobs::{JobOrchestrator, MemoryJobStore, PipelineSettings};
use jobpulse_mail::{GmailMailSource, Normalizer};
use jobpulse_security::{AuthFlow, CredentialStore, FileTokenStore, OAuthTokenEndpoint, SecretKey, SecretStore};
use std::sync::Arc;

const SECRET_SERVICE: &str = "io.jobpulse.cli";

/// Secrets that never go into `config.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum SecretName {
    ClientSecret,
    AiApiKey,
}

impl SecretName {
    pub(crate) fn key(self) -> SecretKey {
        match self {
            Self::ClientSecret => SecretKey::new("oauth", "client_secret"),
            Self::AiApiKey => SecretKey::new("classifier", "api_key"),
        }
    }

    pub(crate) fn env_var(self) -> &'static str {
        match self {
            Self::ClientSecret => "JOBPULSE_CLIENT_SECRET",
            Self::AiApiKey => "JOBPULSE_AI_API_KEY",
        }
    }
}

pub struct AppState {
    pub(crate) config: AppConfig,
    pub(crate) orchestrator: JobOrchestrator,
}

impl AppState {
    pub async fn initialize() -> anyhow::Result<Self> {
        let config_manager = ConfigManager::new().context("initialize config manager")?;
        let config = config_manager.load().context("load app config")?;
        tracing::debug!(path = %config_manager.config_path().display(), "config loaded");

        let secrets = secret_store();
        let client_secret = require_secret(&secrets, SecretName::ClientSecret)?;
        let api_key = require_secret(&secrets, SecretName::AiApiKey)?;

        let profile = config.oauth.profile().context("read oauth profile")?;
        let endpoint = OAuthTokenEndpoint::new(profile.clone(), client_secret)
            .context("build oauth token endpoint")?;
        let auth = AuthFlow::new(profile, Arc::new(endpoint)).context("configure oauth flow")?;

        let token_path = config_manager.data_dir().join(&config.storage.token_file);
        let credentials = CredentialStore::new(
            Arc::new(FileTokenStore::new(token_path)),
            Arc::new(auth),
            config.storage.max_stored_tokens,
        );

        let backend = ChatCompletionsBackend::new(
            config.classifier.endpoint.clone(),
            config.classifier.model.clone(),
            api_key,
        )
        .context("configure completion backend")?;
        let classifier = Classifier::new(Arc::new(backend))
            .with_decoding(config.classifier.temperature, config.classifier.max_tokens);

        let settings = PipelineSettings {
            batch_size: config.pipeline.batch_size,
            pacing_delay: config.pipeline.pacing_delay(),
            normalizer: Normalizer::new(
                config.pipeline.snippet_head_chars,
                config.pipeline.snippet_tail_chars,
            ),
        };

        let orchestrator = JobOrchestrator::new(
            Arc::new(credentials),
            Arc::new(GmailMailSource::new()),
            classifier,
            Arc::new(MemoryJobStore::new()),
            settings,
        );

        Ok(Self {
            config,
            orchestrator,
        })
    }
}

pub(crate) fn secret_store() -> SecretStore {
    SecretStore::new(SECRET_SERVICE)
}

fn require_secret(secrets: &SecretStore, name: SecretName) -> anyhow::Result<String> {
    secrets
        .get_or_env(&name.key(), name.env_var())
        .with_context(|| format!("read {} from keychain", name.key().as_username()))?
        .with_context(|| {
            format!(
                "{} is not configured; set {} or run `jobpulse set-secret`",
                name.key().as_username(),
                name.env_var()
            )
        })
}
