use crate::AiError;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A text-completion model: one prompt in, one completion string out.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, AiError>;
}

/// OpenAI-compatible `chat/completions` endpoint (Groq, OpenAI, Mistral,
/// OpenRouter all accept the same shape).
#[derive(Clone)]
pub struct ChatCompletionsBackend {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for ChatCompletionsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsBackend")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl ChatCompletionsBackend {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, AiError> {
        let endpoint = endpoint.into();
        let model = model.into();
        let api_key = api_key.into();

        if endpoint.trim().is_empty() {
            return Err(AiError::Config("completion endpoint is missing".to_string()));
        }
        if model.trim().is_empty() {
            return Err(AiError::Config("completion model is missing".to_string()));
        }
        if api_key.trim().is_empty() {
            return Err(AiError::Config("completion API key is missing".to_string()));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            model,
            api_key,
        })
    }
}

#[async_trait]
impl CompletionBackend for ChatCompletionsBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, AiError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "user", "content": request.prompt}
                ],
                "temperature": request.temperature,
                "max_tokens": request.max_tokens,
            }))
            .send()
            .await?
            .error_for_status()?;

        let json: serde_json::Value = response.json().await?;
        json.pointer("/choices/0/message/content")
            .and_then(|value| value.as_str())
            .map(str::to_string)
            .ok_or_else(|| AiError::Upstream("completion response has no message content".to_string()))
    }
}
