use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::config::GeminiConfig;
use crate::error::GenerationError;
use crate::prompt::InstructionPair;

/// One call to the generative text service.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_instruction: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 8192,
        }
    }
}

impl From<&GeminiConfig> for SamplingParams {
    fn from(c: &GeminiConfig) -> Self {
        Self {
            temperature: c.temperature,
            top_p: c.top_p,
            top_k: c.top_k,
            max_output_tokens: c.max_output_tokens,
        }
    }
}

impl GenerationRequest {
    pub fn new(pair: InstructionPair, sampling: SamplingParams) -> Self {
        Self {
            system_instruction: pair.system,
            user_prompt: pair.user,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            top_k: sampling.top_k,
            max_output_tokens: sampling.max_output_tokens,
        }
    }
}

/// Sends instructions to the generative service and returns its raw text.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self, GenerationError> {
        if config.api_key.is_empty() {
            return Err(GenerationError::NotConfigured(
                "GEMINI_API_KEY not set".into(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn build_request_body(request: &GenerationRequest) -> serde_json::Value {
        json!({
            "system_instruction": {
                "parts": [{ "text": request.system_instruction }],
            },
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.user_prompt }],
            }],
            "generationConfig": {
                "temperature": request.temperature,
                "topP": request.top_p,
                "topK": request.top_k,
                "maxOutputTokens": request.max_output_tokens,
            },
        })
    }

    /// Concatenate the text parts of the first candidate.
    fn response_text(resp: &serde_json::Value) -> Option<String> {
        let parts = resp["candidates"][0]["content"]["parts"].as_array()?;
        let text: String = parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("");
        (!text.trim().is_empty()).then_some(text)
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key,
        );
        let body = Self::build_request_body(request);

        debug!(model = %self.model, "generation request");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let resp: serde_json::Value = response.json().await?;
        Self::response_text(&resp).ok_or(GenerationError::EmptyResponse)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    pub enum Reply {
        Text(String),
        Status(u16),
    }

    /// Replays canned replies in order and records every request.
    #[derive(Default)]
    pub struct ScriptedClient {
        replies: Mutex<VecDeque<Reply>>,
        pub requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedClient {
        pub fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn texts<I, S>(texts: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self::new(texts.into_iter().map(|t| Reply::Text(t.into())).collect())
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedClient {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
            self.requests.lock().unwrap().push(request.clone());
            match self.replies.lock().unwrap().pop_front() {
                Some(Reply::Text(t)) if !t.trim().is_empty() => Ok(t),
                Some(Reply::Text(_)) | None => Err(GenerationError::EmptyResponse),
                Some(Reply::Status(status)) => Err(GenerationError::Api {
                    status,
                    body: "scripted failure".into(),
                }),
            }
        }
    }
}
