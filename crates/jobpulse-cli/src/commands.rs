use crate::state::{AppState, SecretName};
use jobpulse_core::UserKey;
use jobpulse_jobs::{JobReport, StartOutcome};
use jobpulse_security::SecretStore;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Started,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StartJobResponse {
    Status { status: StartStatus },
    AuthUrl { auth_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CompleteAuthResponse {
    Connected { status: &'static str, message: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub health: &'static str,
}

pub fn health() -> HealthResponse {
    HealthResponse { health: "nice" }
}

pub fn auth_url(state: &AppState, user: &str) -> Result<StartJobResponse, String> {
    let user_key = parse_user_key(user)?;
    let auth_url = state
        .orchestrator
        .credentials()
        .auth_flow()
        .build_auth_url(&user_key);
    Ok(StartJobResponse::AuthUrl { auth_url })
}

pub async fn start_job(
    state: &AppState,
    user: &str,
    limit: Option<usize>,
) -> Result<StartJobResponse, String> {
    let user_key = parse_user_key(user)?;
    let limit = state.config.pipeline.clamp_fetch_limit(limit);

    let outcome = state
        .orchestrator
        .start(&user_key, limit)
        .await
        .map_err(to_error_string)?;

    Ok(match outcome {
        StartOutcome::Started { .. } => StartJobResponse::Status {
            status: StartStatus::Started,
        },
        StartOutcome::AlreadyProcessing => StartJobResponse::Status {
            status: StartStatus::Processing,
        },
        StartOutcome::NeedsAuth { auth_url } => StartJobResponse::AuthUrl { auth_url },
    })
}

pub async fn get_status(state: &AppState, user: &str) -> Result<JobReport, String> {
    let user_key = parse_user_key(user)?;
    Ok(state.orchestrator.poll(&user_key).await)
}

/// OAuth callback: `oauth_state` is the user key the authorization URL was
/// built for.
pub async fn complete_auth(state: &AppState, code: &str, oauth_state: &str) -> CompleteAuthResponse {
    let user_key = match parse_user_key(oauth_state) {
        Ok(user_key) => user_key,
        Err(error) => return CompleteAuthResponse::Failed { error },
    };

    match state.orchestrator.complete_auth(code, &user_key).await {
        Ok(()) => CompleteAuthResponse::Connected {
            status: "success",
            message: format!("Mailbox {user_key} connected; scans can start now."),
        },
        Err(err) => {
            tracing::warn!(user_key = %user_key, "oauth callback failed: {err}");
            CompleteAuthResponse::Failed {
                error: err.to_string(),
            }
        }
    }
}

pub fn set_secret(secrets: &SecretStore, name: SecretName, value: &str) -> Result<(), String> {
    validate_secret(value)?;
    secrets.set(&name.key(), value.trim()).map_err(to_error_string)?;
    tracing::info!(service = secrets.service_name(), secret = ?name, "secret stored");
    Ok(())
}

pub fn clear_secret(secrets: &SecretStore, name: SecretName) -> Result<(), String> {
    secrets.delete(&name.key()).map_err(to_error_string)?;
    tracing::info!(service = secrets.service_name(), secret = ?name, "secret removed");
    Ok(())
}

fn validate_secret(value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err("secret value cannot be empty".to_string());
    }
    if value.len() > 16_384 {
        return Err("secret value is too long".to_string());
    }
    Ok(())
}

fn parse_user_key(raw: &str) -> Result<UserKey, String> {
    UserKey::parse(raw).map_err(to_error_string)
}

fn to_error_string<E>(error: E) -> String
where
    E: std::fmt::Display,
{
    error.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_responses_match_the_query_contract() {
        let started = StartJobResponse::Status {
            status: StartStatus::Started,
        };
        let processing = StartJobResponse::Status {
            status: StartStatus::Processing,
        };
        let auth = StartJobResponse::AuthUrl {
            auth_url: "https://accounts.example.com/auth?state=a%40x.com".to_string(),
        };

        assert_eq!(serde_json::to_value(started).expect("json"), json!({"status": "started"}));
        assert_eq!(
            serde_json::to_value(processing).expect("json"),
            json!({"status": "processing"})
        );
        assert_eq!(
            serde_json::to_value(auth).expect("json"),
            json!({"auth_url": "https://accounts.example.com/auth?state=a%40x.com"})
        );
    }

    #[test]
    fn complete_auth_responses_are_status_or_error() {
        let ok = CompleteAuthResponse::Connected {
            status: "success",
            message: "connected".to_string(),
        };
        let failed = CompleteAuthResponse::Failed {
            error: "authorization failed".to_string(),
        };

        assert_eq!(
            serde_json::to_value(ok).expect("json"),
            json!({"status": "success", "message": "connected"})
        );
        assert_eq!(
            serde_json::to_value(failed).expect("json"),
            json!({"error": "authorization failed"})
        );
    }

    #[test]
    fn health_reports_nice() {
        assert_eq!(serde_json::to_value(health()).expect("json"), json!({"health": "nice"}));
    }

    #[test]
    fn invalid_user_keys_are_rejected_at_the_boundary() {
        assert!(parse_user_key("not an address").is_err());
        assert_eq!(
            parse_user_key("  A@X.com ").expect("valid").as_str(),
            "a@x.com"
        );
    }

    #[test]
    fn blank_secrets_are_rejected() {
        assert!(validate_secret("   ").is_err());
        assert!(validate_secret(&"x".repeat(20_000)).is_err());
        assert!(validate_secret("gsk_live").is_ok());
    }
}
