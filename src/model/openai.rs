//! OpenAI Responses API client.
//!
//! Speaks to `/v1/responses` over a curl subprocess (no HTTP crate in the
//! dependency tree; curl handles TLS and timeouts). The retry policy, in
//! order of precedence:
//!
//! - quota exhaustion (`insufficient_quota`) is never retried
//! - unsupported `temperature` / `text.verbosity` parameters are stripped
//!   and the request retried
//! - 429 and 5xx retry with exponential backoff (capped)
//! - timeouts retry with the read timeout scaled up
//! - a response marked incomplete from `max_output_tokens` bumps the token
//!   budget on a gradual schedule; at the cap, one continuation request is
//!   made via `previous_response_id`
//!
//! Everything is tunable through `OPENAI_*` environment variables.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ModelClient, ModelOutcome};
use crate::config::{env_f64, env_flag, env_u64};

/// Default API endpoint.
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
/// Default model when `OPENAI_MODEL` is unset.
const DEFAULT_MODEL: &str = "gpt-4.1";
/// Floor for the output-token budget.
const MIN_OUTPUT_TOKENS: u64 = 512;
/// Backoff ceiling between retries.
const MAX_BACKOFF_SECS: u64 = 30;
/// Read-timeout ceiling under adaptive scaling.
const MAX_READ_TIMEOUT_SECS: u64 = 600;

/// System message sent with every request.
const SYSTEM_MESSAGE: &str = "You output complete file content using \
===FILE_START: path=== ... ===FILE_END: path=== format. Preserve all \
existing functionality when modifying files.";

/// Client for the OpenAI Responses API.
#[derive(Debug, Clone)]
pub struct OpenAiResponsesClient {
    model: String,
    api_key_env: String,
    api_base: String,
    connect_timeout_s: u64,
    read_timeout_s: u64,
    start_tokens: u64,
    cap_tokens: u64,
    retries: u64,
    backoff_s: u64,
    temperature: Option<f64>,
    verbosity: Option<String>,
}

impl OpenAiResponsesClient {
    /// Default environment variable holding the API key.
    pub const DEFAULT_API_KEY_ENV: &'static str = "OPENAI_API_KEY";

    /// Build a client from the `OPENAI_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let model = std::env::var("OPENAI_MODEL")
            .ok()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let cap_tokens = env_u64("OPENAI_MAX_OUTPUT_TOKENS_CAP", 20_000);
        let start_tokens = clamp_tokens(env_u64("OPENAI_MAX_OUTPUT_TOKENS", 4_000), cap_tokens);

        // Temperature is opt-in; several model families reject it outright.
        let temperature = if env_flag("OPENAI_ENABLE_TEMPERATURE") {
            env_f64("OPENAI_TEMPERATURE")
        } else {
            None
        };
        let verbosity = std::env::var("OPENAI_TEXT_VERBOSITY")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Self {
            model,
            api_key_env: Self::DEFAULT_API_KEY_ENV.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            connect_timeout_s: env_u64("OPENAI_CONNECT_TIMEOUT_S", 15),
            read_timeout_s: env_u64("OPENAI_READ_TIMEOUT_S", 120),
            start_tokens,
            cap_tokens,
            retries: env_u64("OPENAI_RETRIES", 3).max(1),
            backoff_s: env_u64("OPENAI_BACKOFF_S", 2).max(1),
            temperature,
            verbosity,
        }
    }

    /// Set a custom API base URL (proxies, compatible servers).
    #[must_use]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Set the environment variable name for the API key.
    #[must_use]
    pub fn with_api_key_env(mut self, env_var: &str) -> Self {
        self.api_key_env = env_var.to_string();
        self
    }

    fn base_body(&self, prompt: &str, max_output_tokens: u64) -> Value {
        let mut body = json!({
            "model": self.model,
            "input": [
                { "role": "system", "content": SYSTEM_MESSAGE },
                { "role": "user", "content": prompt },
            ],
            "max_output_tokens": max_output_tokens,
            "text": { "format": { "type": "text" } },
        });
        if let Some(verbosity) = &self.verbosity {
            body["text"]["verbosity"] = json!(verbosity);
        }
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    /// POST the body via curl; returns `(http_status, parsed_body)`.
    async fn post(
        &self,
        api_key: &str,
        body: &Value,
        read_timeout_s: u64,
    ) -> Result<(u16, Value), PostError> {
        let mut body_file = tempfile::NamedTempFile::new()
            .map_err(|e| PostError::Invocation(format!("create request file: {e}")))?;
        body_file
            .write_all(body.to_string().as_bytes())
            .map_err(|e| PostError::Invocation(format!("write request file: {e}")))?;

        let url = format!("{}/responses", self.api_base);
        let data_arg = format!("@{}", body_file.path().display());
        let auth = format!("Authorization: Bearer {api_key}");
        let output = tokio::process::Command::new("curl")
            .args([
                "-sS",
                "-X",
                "POST",
                &url,
                "-H",
                &auth,
                "-H",
                "Content-Type: application/json",
                "--data-binary",
                &data_arg,
                "--connect-timeout",
                &self.connect_timeout_s.to_string(),
                "--max-time",
                &read_timeout_s.to_string(),
                "-w",
                "\n%{http_code}",
            ])
            .output()
            .await
            .map_err(|e| PostError::Invocation(format!("failed to execute curl: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            // curl exit 28 is its timeout code.
            if output.status.code() == Some(28) {
                return Err(PostError::Timeout);
            }
            return Err(PostError::Connection(stderr.trim().to_string()));
        }

        let raw = String::from_utf8_lossy(&output.stdout).to_string();
        let (body_text, status_line) = raw
            .rsplit_once('\n')
            .ok_or_else(|| PostError::Invocation("curl produced no status line".to_string()))?;
        let status: u16 = status_line
            .trim()
            .parse()
            .map_err(|_| PostError::Invocation(format!("bad status line '{status_line}'")))?;
        let payload: Value = serde_json::from_str(body_text.trim()).unwrap_or(Value::Null);
        Ok((status, payload))
    }
}

enum PostError {
    Timeout,
    Connection(String),
    Invocation(String),
}

#[async_trait]
impl ModelClient for OpenAiResponsesClient {
    async fn generate(&self, prompt: &str) -> ModelOutcome {
        let Ok(api_key) = std::env::var(&self.api_key_env) else {
            return ModelOutcome::FatalFailure(format!(
                "API key not found in environment variable '{}'",
                self.api_key_env
            ));
        };

        let mut body = self.base_body(prompt, self.start_tokens);
        let mut backoff = self.backoff_s;
        let mut read_timeout = self.read_timeout_s;
        let mut last_detail = String::new();

        let mut attempt = 0;
        while attempt < self.retries {
            attempt += 1;
            debug!(
                "openai request: model={} attempt={}/{} max_output_tokens={} timeout=({},{})",
                self.model,
                attempt,
                self.retries,
                body["max_output_tokens"],
                self.connect_timeout_s,
                read_timeout
            );

            let (status, payload) = match self.post(&api_key, &body, read_timeout).await {
                Ok(pair) => pair,
                Err(PostError::Timeout) => {
                    warn!("openai request timed out after {read_timeout}s");
                    last_detail = format!("request timed out after {read_timeout}s");
                    read_timeout = (read_timeout * 2).min(MAX_READ_TIMEOUT_SECS);
                    sleep_backoff(&mut backoff).await;
                    continue;
                }
                Err(PostError::Connection(detail)) => {
                    warn!("openai connection error: {detail}");
                    last_detail = detail;
                    sleep_backoff(&mut backoff).await;
                    continue;
                }
                Err(PostError::Invocation(detail)) => {
                    return ModelOutcome::FatalFailure(detail);
                }
            };

            if status == 200 {
                let text = extract_text(&payload);
                if !text.trim().is_empty() {
                    return ModelOutcome::from_text(&text);
                }

                if is_incomplete_max_tokens(&payload) {
                    let current = body["max_output_tokens"].as_u64().unwrap_or(self.start_tokens);
                    let bumped = bump_tokens(current, self.cap_tokens);
                    if bumped > current {
                        debug!("incomplete at {current} output tokens; bumping to {bumped}");
                        body["max_output_tokens"] = json!(bumped);
                        // Do not consume a retry for a token bump.
                        attempt -= 1;
                        continue;
                    }

                    // Already at the cap: one continuation via the response id.
                    if let Some(response_id) = payload.get("id").and_then(Value::as_str) {
                        debug!("no text at token cap; attempting continuation");
                        let mut continuation = body.clone();
                        continuation["previous_response_id"] = json!(response_id);
                        continuation["input"] = json!([{
                            "role": "user",
                            "content": "Continue. Output ONLY the patch content, with no commentary.",
                        }]);
                        let cont_timeout = read_timeout.max(300);
                        if let Ok((200, cont_payload)) =
                            self.post(&api_key, &continuation, cont_timeout).await
                        {
                            let cont_text = extract_text(&cont_payload);
                            if !cont_text.trim().is_empty() {
                                return ModelOutcome::from_text(&cont_text);
                            }
                        }
                    }
                }

                return ModelOutcome::FatalFailure(
                    "model returned no usable content".to_string(),
                );
            }

            // Non-200: inspect the error payload.
            let err = payload.get("error").cloned().unwrap_or(Value::Null);
            let err_type = err.get("type").and_then(Value::as_str).unwrap_or("");
            let err_code = err.get("code").and_then(Value::as_str).unwrap_or("");
            let err_param = err.get("param").and_then(Value::as_str).unwrap_or("");
            let err_msg = err.get("message").and_then(Value::as_str).unwrap_or("");

            if err_code == "insufficient_quota" || err_type == "insufficient_quota" {
                warn!("openai quota exhausted; not retrying");
                return ModelOutcome::FatalFailure(
                    "quota exhausted / billing not active (insufficient_quota)".to_string(),
                );
            }

            let msg_lower = err_msg.to_lowercase();
            if (err_param == "temperature" || msg_lower.contains("temperature"))
                && body.get("temperature").is_some()
            {
                debug!("model rejected temperature; stripping and retrying");
                if let Some(obj) = body.as_object_mut() {
                    obj.remove("temperature");
                }
                sleep_backoff(&mut backoff).await;
                continue;
            }
            if (err_param == "text.verbosity" || msg_lower.contains("verbosity"))
                && body["text"].get("verbosity").is_some()
            {
                debug!("model rejected text.verbosity; stripping and retrying");
                if let Some(obj) = body["text"].as_object_mut() {
                    obj.remove("verbosity");
                }
                sleep_backoff(&mut backoff).await;
                continue;
            }

            if matches!(status, 429 | 500 | 502 | 503 | 504) {
                warn!("openai transient status {status}; retrying");
                last_detail = format!("HTTP {status}: {err_msg}");
                sleep_backoff(&mut backoff).await;
                continue;
            }

            return ModelOutcome::FatalFailure(format!("HTTP {status}: {err_msg}"));
        }

        ModelOutcome::TransientFailure(format!(
            "retries exhausted after {} attempts: {last_detail}",
            self.retries
        ))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

async fn sleep_backoff(backoff: &mut u64) {
    tokio::time::sleep(Duration::from_secs(*backoff)).await;
    *backoff = (*backoff * 2).min(MAX_BACKOFF_SECS);
}

fn clamp_tokens(tokens: u64, cap: u64) -> u64 {
    tokens.clamp(MIN_OUTPUT_TOKENS, cap.max(MIN_OUTPUT_TOKENS))
}

/// Gradual bump schedule for an output budget that proved too small.
fn bump_tokens(current: u64, cap: u64) -> u64 {
    clamp_tokens((current * 3).max(current + 2_000), cap)
}

/// Whether the payload reports truncation from `max_output_tokens`.
fn is_incomplete_max_tokens(payload: &Value) -> bool {
    payload.get("status").and_then(Value::as_str) == Some("incomplete")
        && payload
            .pointer("/incomplete_details/reason")
            .and_then(Value::as_str)
            == Some("max_output_tokens")
}

/// Extract the primary text from a Responses API payload.
///
/// Either `output_text` directly, or the concatenated `output_text` items
/// inside `output[].content[]`.
fn extract_text(payload: &Value) -> String {
    if let Some(text) = payload.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return text.trim().to_string();
        }
    }

    let mut parts: Vec<&str> = Vec::new();
    if let Some(items) = payload.get("output").and_then(Value::as_array) {
        for item in items {
            if let Some(content) = item.get("content").and_then(Value::as_array) {
                for piece in content {
                    let kind = piece.get("type").and_then(Value::as_str).unwrap_or("");
                    if matches!(kind, "output_text" | "text") {
                        if let Some(text) = piece.get("text").and_then(Value::as_str) {
                            parts.push(text);
                        }
                    }
                }
            }
        }
    }
    parts.join("\n").trim().to_string()
}
