use crate::SecurityError;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jobpulse_core::{OAuthProfile, UserKey, UserToken};
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, RedirectUrl, RefreshToken, RequestTokenError, Scope,
    TokenResponse, TokenUrl,
};
use std::sync::Arc;

type TokenClient = BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Upper bound for provider-reported lifetimes.
const MAX_EXPIRES_IN_SECS: u64 = 60 * 60 * 24 * 365;

/// Known overly-broad scopes that should be rejected.
const DANGEROUS_SCOPES: &[&str] = &["*", "admin", "root", "full_access"];

#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_secs: Option<u64>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in_secs", &self.expires_in_secs)
            .finish()
    }
}

/// The provider's token endpoint: code exchange and refresh grants.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, SecurityError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, SecurityError>;
}

pub struct OAuthTokenEndpoint {
    profile: OAuthProfile,
    client_secret: String,
    http: reqwest::Client,
}

impl OAuthTokenEndpoint {
    pub fn new(profile: OAuthProfile, client_secret: impl Into<String>) -> Result<Self, SecurityError> {
        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            profile,
            client_secret: client_secret.into(),
            http,
        })
    }

    fn client(&self) -> TokenClient {
        BasicClient::new(ClientId::new(self.profile.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_token_uri(TokenUrl::from_url(self.profile.token_url.clone()))
            .set_redirect_uri(RedirectUrl::from_url(self.profile.redirect_url.clone()))
    }
}

#[async_trait]
impl TokenEndpoint for OAuthTokenEndpoint {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, SecurityError> {
        let token = self
            .client()
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|err| match err {
                RequestTokenError::Parse(_, _) => {
                    SecurityError::Auth("token response did not contain an access token".to_string())
                }
                other => SecurityError::Auth(other.to_string()),
            })?;

        Ok(TokenGrant {
            access_token: token.access_token().secret().to_string(),
            refresh_token: token.refresh_token().map(|token| token.secret().to_string()),
            expires_in_secs: token.expires_in().map(|duration| duration.as_secs()),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, SecurityError> {
        let token = self
            .client()
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|err| SecurityError::RefreshFailed(err.to_string()))?;

        Ok(TokenGrant {
            access_token: token.access_token().secret().to_string(),
            refresh_token: token.refresh_token().map(|token| token.secret().to_string()),
            expires_in_secs: token.expires_in().map(|duration| duration.as_secs()),
        })
    }
}

/// Authorization-code flow for a web callback. The OAuth `state` carries the
/// user key, so the callback correlates without a server-side session.
#[derive(Clone)]
pub struct AuthFlow {
    profile: OAuthProfile,
    endpoint: Arc<dyn TokenEndpoint>,
}

impl std::fmt::Debug for AuthFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFlow")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl AuthFlow {
    /// Create a new flow, validating the profile for security issues.
    pub fn new(profile: OAuthProfile, endpoint: Arc<dyn TokenEndpoint>) -> Result<Self, SecurityError> {
        Self::validate_profile(&profile)?;
        Ok(Self { profile, endpoint })
    }

    fn validate_profile(profile: &OAuthProfile) -> Result<(), SecurityError> {
        if profile.auth_url.scheme() != "https" {
            return Err(SecurityError::Profile(
                "authorization URL must use HTTPS".to_string(),
            ));
        }
        if profile.token_url.scheme() != "https" {
            return Err(SecurityError::Profile("token URL must use HTTPS".to_string()));
        }
        if profile.auth_url.host_str().is_none() || profile.token_url.host_str().is_none() {
            return Err(SecurityError::Profile(
                "authorization and token URLs must have a host".to_string(),
            ));
        }

        let client_id = profile.client_id.trim();
        if client_id.is_empty() {
            return Err(SecurityError::Profile("client ID is required".to_string()));
        }
        if client_id.len() > 512 {
            return Err(SecurityError::Profile(
                "client ID appears invalid (too long)".to_string(),
            ));
        }

        for scope in &profile.scopes {
            let lower = scope.to_lowercase();
            if DANGEROUS_SCOPES.iter().any(|&d| lower == d) {
                return Err(SecurityError::Profile(format!(
                    "scope '{scope}' is too broad and not allowed"
                )));
            }
        }

        Ok(())
    }

    pub fn build_auth_url(&self, user_key: &UserKey) -> String {
        let client = BasicClient::new(ClientId::new(self.profile.client_id.clone()))
            .set_auth_uri(AuthUrl::from_url(self.profile.auth_url.clone()))
            .set_redirect_uri(RedirectUrl::from_url(self.profile.redirect_url.clone()));

        let state = user_key.to_string();
        let mut request = client.authorize_url(move || CsrfToken::new(state));
        for scope in &self.profile.scopes {
            request = request.add_scope(Scope::new(scope.to_string()));
        }

        let (url, _) = request
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .url();
        url.to_string()
    }

    pub async fn exchange_code(&self, code: &str, user_key: &UserKey) -> Result<UserToken, SecurityError> {
        if code.trim().is_empty() {
            return Err(SecurityError::Auth("authorization code is empty".to_string()));
        }

        let grant = self.endpoint.exchange_code(code).await?;
        if grant.access_token.trim().is_empty() {
            return Err(SecurityError::Auth(
                "token response did not contain an access token".to_string(),
            ));
        }

        tracing::info!(user_key = %user_key, "authorization code exchanged");
        Ok(token_from_grant(user_key.clone(), grant, None))
    }

    /// Refreshes an expired token. The provider usually omits the refresh
    /// token on refresh grants, in which case the old one is kept.
    pub async fn refresh(&self, token: &UserToken) -> Result<UserToken, SecurityError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| SecurityError::RefreshFailed("no refresh token stored".to_string()))?;

        let grant = self.endpoint.refresh(refresh_token).await?;
        if grant.access_token.trim().is_empty() {
            return Err(SecurityError::RefreshFailed(
                "refresh response did not contain an access token".to_string(),
            ));
        }

        Ok(token_from_grant(
            token.user_key.clone(),
            grant,
            token.refresh_token.clone(),
        ))
    }
}

fn token_from_grant(user_key: UserKey, grant: TokenGrant, previous_refresh: Option<String>) -> UserToken {
    UserToken {
        user_key,
        access_token: grant.access_token,
        refresh_token: grant.refresh_token.or(previous_refresh),
        expires_at: grant
            .expires_in_secs
            .map(|secs| Utc::now() + Duration::seconds(secs.min(MAX_EXPIRES_IN_SECS) as i64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use url::Url;

    struct StaticEndpoint {
        grant: TokenGrant,
    }

    #[async_trait]
    impl TokenEndpoint for StaticEndpoint {
        async fn exchange_code(&self, _code: &str) -> Result<TokenGrant, SecurityError> {
            Ok(self.grant.clone())
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, SecurityError> {
            Ok(self.grant.clone())
        }
    }

    fn profile() -> OAuthProfile {
        OAuthProfile {
            client_id: "client-123".to_string(),
            auth_url: Url::parse("https://accounts.example.com/o/oauth2/auth").expect("url"),
            token_url: Url::parse("https://oauth2.example.com/token").expect("url"),
            redirect_url: Url::parse("http://localhost:8000/auth/callback").expect("url"),
            scopes: vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()],
        }
    }

    fn flow(grant: TokenGrant) -> AuthFlow {
        AuthFlow::new(profile(), Arc::new(StaticEndpoint { grant })).expect("valid profile")
    }

    fn grant(access: &str, refresh: Option<&str>) -> TokenGrant {
        TokenGrant {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_in_secs: Some(3600),
        }
    }

    #[test]
    fn auth_url_carries_offline_consent_and_user_state() {
        let flow = flow(grant("a", None));
        let key = UserKey::parse("a@x.com").expect("key");
        let raw = flow.build_auth_url(&key);
        assert_eq!(raw, flow.build_auth_url(&key));

        let url = Url::parse(&raw).expect("auth url parses");
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(params.get("client_id").map(String::as_str), Some("client-123"));
        assert_eq!(params.get("response_type").map(String::as_str), Some("code"));
        assert_eq!(params.get("access_type").map(String::as_str), Some("offline"));
        assert_eq!(params.get("prompt").map(String::as_str), Some("consent"));
        assert_eq!(params.get("state").map(String::as_str), Some("a@x.com"));
        assert_eq!(
            params.get("redirect_uri").map(String::as_str),
            Some("http://localhost:8000/auth/callback")
        );
        assert_eq!(
            params.get("scope").map(String::as_str),
            Some("https://www.googleapis.com/auth/gmail.readonly")
        );
    }

    #[test]
    fn insecure_token_endpoint_is_rejected() {
        let mut insecure = profile();
        insecure.token_url = Url::parse("http://oauth2.example.com/token").expect("url");
        let endpoint = Arc::new(StaticEndpoint { grant: grant("a", None) });
        assert!(matches!(
            AuthFlow::new(insecure, endpoint),
            Err(SecurityError::Profile(_))
        ));
    }

    #[tokio::test]
    async fn exchange_without_access_token_is_an_auth_error() {
        let flow = flow(grant("", Some("refresh")));
        let key = UserKey::parse("a@x.com").expect("key");
        let err = flow.exchange_code("code", &key).await.expect_err("must fail");
        assert!(matches!(err, SecurityError::Auth(_)));
    }

    #[tokio::test]
    async fn refresh_keeps_previous_refresh_token_when_omitted() {
        let flow = flow(grant("new-access", None));
        let token = UserToken {
            user_key: UserKey::parse("a@x.com").expect("key"),
            access_token: "old-access".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Some(Utc::now() - Duration::seconds(10)),
        };

        let refreshed = flow.refresh(&token).await.expect("refresh");
        assert_eq!(refreshed.access_token, "new-access");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));
        assert!(refreshed.expires_at.is_some_and(|at| at > Utc::now()));
    }
}
