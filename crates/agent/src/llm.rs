use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use autostream_core::config::{LlmConfig, LlmProvider};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::warn;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 1024;
const RETRY_BASE_DELAY_MS: u64 = 250;

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, temperature: f32) -> Self {
        Self { prompt: prompt.into(), temperature }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// Runs one completion under `limit`; an elapsed timer is reported as an error.
pub async fn complete_within(
    client: &dyn LlmClient,
    request: CompletionRequest,
    limit: Duration,
) -> Result<String> {
    match tokio::time::timeout(limit, client.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("completion timed out after {}ms", limit.as_millis())),
    }
}

/// Completion client for the hosted and local providers over HTTP.
pub struct HttpLlmClient {
    client: reqwest::Client,
    provider: LlmProvider,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(attempt_timeout(config.timeout_secs, config.max_retries))
            .build()
            .context("failed to build http client")?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| config.provider.default_base_url().to_string());

        Ok(Self {
            client,
            provider: config.provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .ok_or_else(|| anyhow!("{} provider requires an api key", self.provider.as_str()))
    }

    fn endpoint(&self) -> String {
        match self.provider {
            LlmProvider::Gemini => {
                format!("{}/models/{}:generateContent", self.base_url, self.model)
            }
            LlmProvider::OpenAi => format!("{}/chat/completions", self.base_url),
            LlmProvider::Anthropic => format!("{}/messages", self.base_url),
            LlmProvider::Ollama => format!("{}/api/generate", self.base_url),
        }
    }

    fn build_request(&self, request: &CompletionRequest) -> Result<reqwest::RequestBuilder> {
        let endpoint = self.endpoint();
        let builder = match self.provider {
            LlmProvider::Gemini => self
                .client
                .post(endpoint)
                .query(&[("key", self.api_key()?)])
                .json(&gemini_body(request)),
            LlmProvider::OpenAi => self
                .client
                .post(endpoint)
                .bearer_auth(self.api_key()?)
                .json(&openai_body(&self.model, request)),
            LlmProvider::Anthropic => self
                .client
                .post(endpoint)
                .header("x-api-key", self.api_key()?)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&anthropic_body(&self.model, request)),
            LlmProvider::Ollama => {
                self.client.post(endpoint).json(&ollama_body(&self.model, request))
            }
        };
        Ok(builder)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let mut attempt = 0;
        loop {
            let outcome = self.build_request(&request)?.send().await;
            let retry_reason = match outcome {
                Ok(response) if response.status().is_success() => {
                    let body: Value =
                        response.json().await.context("completion response was not json")?;
                    return extract_text(self.provider, &body);
                }
                Ok(response) => {
                    let status = response.status();
                    let detail = response.text().await.unwrap_or_default();
                    if !is_retryable_status(status) {
                        bail!("completion request rejected with {status}: {detail}");
                    }
                    format!("status {status}")
                }
                Err(error) => format!("transport error: {error}"),
            };

            if attempt >= self.max_retries {
                bail!(
                    "completion request failed after {} attempts ({retry_reason})",
                    attempt + 1
                );
            }
            warn!(
                event_name = "agent.llm.retry",
                provider = self.provider.as_str(),
                attempt = attempt + 1,
                reason = %retry_reason,
                "retrying completion request"
            );
            tokio::time::sleep(Duration::from_millis(RETRY_BASE_DELAY_MS << attempt.min(4))).await;
            attempt += 1;
        }
    }
}

/// Each attempt gets an equal share of the call budget, so retries fit inside the
/// `complete_within` limit the runtime applies to the whole sequence.
fn attempt_timeout(timeout_secs: u64, max_retries: u32) -> Duration {
    Duration::from_secs(timeout_secs) / max_retries.saturating_add(1)
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn gemini_body(request: &CompletionRequest) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        "generationConfig": { "temperature": request.temperature },
    })
}

fn openai_body(model: &str, request: &CompletionRequest) -> Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": request.prompt }],
        "temperature": request.temperature,
    })
}

fn anthropic_body(model: &str, request: &CompletionRequest) -> Value {
    json!({
        "model": model,
        "max_tokens": ANTHROPIC_MAX_TOKENS,
        "temperature": request.temperature,
        "messages": [{ "role": "user", "content": request.prompt }],
    })
}

fn ollama_body(model: &str, request: &CompletionRequest) -> Value {
    json!({
        "model": model,
        "prompt": request.prompt,
        "stream": false,
        "options": { "temperature": request.temperature },
    })
}

fn extract_text(provider: LlmProvider, body: &Value) -> Result<String> {
    let text = match provider {
        LlmProvider::Gemini => body
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .map(|parts| join_text_parts(parts)),
        LlmProvider::OpenAi => body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string),
        LlmProvider::Anthropic => body.get("content").and_then(Value::as_array).map(|blocks| {
            let text_blocks: Vec<Value> = blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .cloned()
                .collect();
            join_text_parts(&text_blocks)
        }),
        LlmProvider::Ollama => body.get("response").and_then(Value::as_str).map(str::to_string),
    };

    text.ok_or_else(|| anyhow!("malformed {} completion response", provider.as_str()))
}

fn join_text_parts(parts: &[Value]) -> String {
    parts.iter().filter_map(|part| part.get("text").and_then(Value::as_str)).collect()
}

enum ScriptedReply {
    Text(String),
    Fail(String),
}

/// Deterministic client: the first rule whose needle occurs in the prompt answers it.
#[derive(Default)]
pub struct ScriptedLlmClient {
    rules: Vec<(String, ScriptedReply)>,
    fallback: Option<String>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), ScriptedReply::Text(reply.into())));
        self
    }

    pub fn fail_on(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push((needle.into(), ScriptedReply::Fail(message.into())));
        self
    }

    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        match self.prompts.lock() {
            Ok(prompts) => prompts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.prompts().len()
    }

    fn record(&self, prompt: &str) {
        match self.prompts.lock() {
            Ok(mut prompts) => prompts.push(prompt.to_string()),
            Err(poisoned) => poisoned.into_inner().push(prompt.to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.record(&request.prompt);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let rule = self.rules.iter().find(|(needle, _)| request.prompt.contains(needle.as_str()));
        match rule {
            Some((_, ScriptedReply::Text(reply))) => Ok(reply.clone()),
            Some((_, ScriptedReply::Fail(message))) => Err(anyhow!(message.clone())),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow!("no scripted completion for prompt")),
        }
    }
}
