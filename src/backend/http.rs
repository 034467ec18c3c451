//! Chat-Completions Backend
//!
//! Concrete [`LmBackend`] over the OpenAI-compatible chat-completions wire
//! shape, including the Azure deployment variant (`api-key` header plus
//! `api-version` query parameter). Constructed from a [`ModelConfig`] by the
//! default backend factory.
//!
//! The backend renders a stage's input fields into a single user message and
//! asks for a JSON object carrying exactly the signature's output fields.
//! Responses are parsed leniently: fenced code blocks are unwrapped, and a
//! single-output signature accepts the raw completion text as its value.

use super::{BackendError, FieldMap, LmBackend, StageSignature};
use crate::routing::{Credentials, ModelConfig, RoutingError};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Chat-completions backend for OpenAI-compatible and Azure endpoints
#[derive(Debug, Clone)]
pub struct ChatCompletionsBackend {
    /// Provider-side model identifier (Azure deployment name)
    model: String,
    /// Provider tag ("azure" switches URL and auth scheme)
    provider: String,
    /// Endpoint base URL
    base_url: String,
    /// Azure api-version query parameter
    api_version: Option<String>,
    /// Sampling temperature from the model config
    temperature: f64,
    /// Optional completion token ceiling
    max_tokens: Option<usize>,
    /// Request timeout
    timeout: Duration,
    /// HTTP client with auth headers
    client: Client,
}

impl ChatCompletionsBackend {
    /// Build a backend from a registered model configuration
    ///
    /// Fails with [`RoutingError::MissingCredentials`] when the config
    /// carries no credential bundle — hosted chat endpoints always need one.
    pub fn from_config(key: &str, config: &ModelConfig) -> Result<Self, RoutingError> {
        let credentials =
            config
                .credentials
                .as_ref()
                .ok_or_else(|| RoutingError::MissingCredentials {
                    key: key.to_string(),
                    provider: config.provider.clone(),
                })?;

        let client = Self::build_client(&config.provider, credentials).map_err(|message| {
            RoutingError::ClientConstruction {
                key: key.to_string(),
                message,
            }
        })?;

        Ok(Self {
            model: config.name.clone(),
            provider: config.provider.clone(),
            base_url: credentials.api_base.trim_end_matches('/').to_string(),
            api_version: credentials.api_version.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: DEFAULT_TIMEOUT,
            client,
        })
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_client(provider: &str, credentials: &Credentials) -> Result<Client, String> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if provider == "azure" {
            headers.insert(
                "api-key",
                HeaderValue::from_str(&credentials.api_key)
                    .map_err(|e| format!("invalid api key: {}", e))?,
            );
        } else {
            let bearer = format!("Bearer {}", credentials.api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&bearer).map_err(|e| format!("invalid api key: {}", e))?,
            );
        }

        Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| format!("failed to create http client: {}", e))
    }

    /// The full request URL for this backend
    fn request_url(&self) -> String {
        if self.provider == "azure" {
            let version = self.api_version.as_deref().unwrap_or("2024-06-01");
            format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url, self.model, version
            )
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }
}

/// Render stage inputs into the user message for the completion request
///
/// Each input field becomes a labeled section; the message closes with the
/// exact output fields the signature requires.
pub(crate) fn build_prompt(signature: StageSignature, inputs: &FieldMap) -> String {
    let mut sections = Vec::with_capacity(signature.inputs.len() + 2);
    sections.push(format!("Stage: {}", signature.name));

    for name in signature.inputs {
        let rendered = match inputs.get(*name) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        sections.push(format!("{}:\n{}", name, rendered));
    }

    sections.push(format!(
        "Respond with a single JSON object (no markdown) containing exactly these fields: {}.",
        signature.outputs.join(", ")
    ));

    sections.join("\n\n")
}

/// Parse a completion into the signature's output fields
///
/// Unwraps fenced code blocks, then parses a JSON object. When parsing
/// fails and the signature has exactly one output field, the raw text is
/// used as that field's value; otherwise the raw text is preserved under
/// `_raw` and the missing fields surface at the stage boundary.
pub(crate) fn parse_output_fields(signature: StageSignature, content: &str) -> FieldMap {
    let json_str = extract_json(content);

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(json_str) {
        return map.into_iter().collect();
    }

    let mut fields = FieldMap::new();
    if let [only] = signature.outputs {
        fields.insert((*only).to_string(), Value::String(content.trim().to_string()));
    } else {
        fields.insert("_raw".to_string(), Value::String(content.to_string()));
    }
    fields
}

/// Extract JSON from a response that might contain markdown code blocks
fn extract_json(response: &str) -> &str {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```json") {
        if let Some(end) = trimmed[start + 7..].find("```") {
            return trimmed[start + 7..start + 7 + end].trim();
        }
    }

    if let Some(start) = trimmed.find("```") {
        if let Some(end) = trimmed[start + 3..].find("```") {
            let inner = trimmed[start + 3..start + 3 + end].trim();
            if let Some(newline) = inner.find('\n') {
                return inner[newline + 1..].trim();
            }
            return inner;
        }
    }

    trimmed
}

/// Map an HTTP status to the backend error taxonomy
///
/// 429 and 5xx are transient; other non-success statuses are rejections.
pub(crate) fn map_status(status: u16, message: String) -> BackendError {
    if status == 429 || status >= 500 {
        BackendError::Unavailable {
            message: format!("status {}: {}", status, message),
        }
    } else {
        BackendError::Rejected { status, message }
    }
}

/// Request body for chat completions
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Response body from chat completions
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl LmBackend for ChatCompletionsBackend {
    fn invoke(
        &self,
        signature: StageSignature,
        inputs: FieldMap,
    ) -> Pin<Box<dyn Future<Output = Result<FieldMap, BackendError>> + Send + '_>> {
        Box::pin(async move {
            let request = ChatRequest {
                model: self.model.clone(),
                messages: vec![ChatMessage {
                    role: "user".to_string(),
                    content: build_prompt(signature, &inputs),
                }],
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };

            let response = self
                .client
                .post(self.request_url())
                .json(&request)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        BackendError::Timeout
                    } else {
                        BackendError::Unavailable {
                            message: e.to_string(),
                        }
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                let message = response
                    .json::<ErrorResponse>()
                    .await
                    .map(|e| e.error.message)
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(map_status(status.as_u16(), message));
            }

            let chat_response: ChatResponse =
                response.json().await.map_err(|e| BackendError::Rejected {
                    status: status.as_u16(),
                    message: format!("unparseable response body: {}", e),
                })?;

            let content = chat_response
                .choices
                .first()
                .map(|c| c.message.content.as_str())
                .unwrap_or_default();

            tracing::debug!(
                stage = signature.name,
                model = %self.model,
                chars = content.len(),
                "chat completion received"
            );

            Ok(parse_output_fields(signature, content))
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fields;
    use serde_json::json;

    const VERIFY: StageSignature = StageSignature {
        name: "verify",
        inputs: &["goal", "result"],
        outputs: &["is_valid", "feedback"],
    };

    const EXECUTE: StageSignature = StageSignature {
        name: "execute",
        inputs: &["task"],
        outputs: &["result"],
    };

    fn azure_config() -> ModelConfig {
        ModelConfig::new("gpt-4o", "azure")
            .with_temperature(0.7)
            .with_credentials(
                Credentials::new("https://res.openai.azure.com/", "test-key")
                    .with_api_version("2025-01-01-preview"),
            )
    }

    // ==========================================
    // Construction Tests
    // ==========================================

    #[test]
    fn test_from_config_requires_credentials() {
        let config = ModelConfig::new("gpt-4o", "azure");
        let err = ChatCompletionsBackend::from_config("gpt4o", &config).unwrap_err();
        assert!(matches!(err, RoutingError::MissingCredentials { .. }));
    }

    #[test]
    fn test_azure_request_url() {
        let backend = ChatCompletionsBackend::from_config("gpt4o", &azure_config()).unwrap();
        assert_eq!(
            backend.request_url(),
            "https://res.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2025-01-01-preview"
        );
    }

    #[test]
    fn test_openai_compatible_request_url() {
        let config = ModelConfig::new("llama3", "openai")
            .with_credentials(Credentials::new("https://api.example.com/v1", "k"));
        let backend = ChatCompletionsBackend::from_config("local", &config).unwrap();
        assert_eq!(
            backend.request_url(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_model_name() {
        let backend = ChatCompletionsBackend::from_config("gpt4o", &azure_config()).unwrap();
        assert_eq!(backend.model_name(), "gpt-4o");
    }

    #[test]
    fn test_cache_flag_is_catalogue_metadata_only() {
        // The caching flag is provider-side catalogue info; it must not
        // change what this backend sends
        let cached = ChatCompletionsBackend::from_config("gpt4o", &azure_config()).unwrap();
        let uncached =
            ChatCompletionsBackend::from_config("gpt4o", &azure_config().with_cache(false))
                .unwrap();
        assert_eq!(cached.request_url(), uncached.request_url());
    }

    // ==========================================
    // Prompt Construction Tests
    // ==========================================

    #[test]
    fn test_build_prompt_includes_fields_and_outputs() {
        let prompt = build_prompt(
            VERIFY,
            &fields(&[
                ("goal", json!("What is 2+2?")),
                ("result", json!("4")),
            ]),
        );

        assert!(prompt.contains("Stage: verify"));
        assert!(prompt.contains("goal:\nWhat is 2+2?"));
        assert!(prompt.contains("result:\n4"));
        assert!(prompt.contains("is_valid, feedback"));
    }

    #[test]
    fn test_build_prompt_renders_structured_inputs_as_json() {
        let signature = StageSignature {
            name: "aggregate",
            inputs: &["original_goal", "subtask_results"],
            outputs: &["synthesized_result"],
        };
        let prompt = build_prompt(
            signature,
            &fields(&[
                ("original_goal", json!("g")),
                ("subtask_results", json!([{"task": "t", "result": "r"}])),
            ]),
        );

        assert!(prompt.contains(r#"[{"result":"r","task":"t"}]"#));
    }

    // ==========================================
    // Output Parsing Tests
    // ==========================================

    #[test]
    fn test_parse_output_json_object() {
        let output = parse_output_fields(
            VERIFY,
            r#"{"is_valid": "true", "feedback": "looks right"}"#,
        );
        assert_eq!(output.get("is_valid"), Some(&json!("true")));
        assert_eq!(output.get("feedback"), Some(&json!("looks right")));
    }

    #[test]
    fn test_parse_output_fenced_code_block() {
        let output = parse_output_fields(
            VERIFY,
            "Here you go:\n```json\n{\"is_valid\": true, \"feedback\": \"ok\"}\n```\n",
        );
        assert_eq!(output.get("is_valid"), Some(&json!(true)));
    }

    #[test]
    fn test_parse_output_single_field_raw_fallback() {
        let output = parse_output_fields(EXECUTE, "The answer is 4.");
        assert_eq!(output.get("result"), Some(&json!("The answer is 4.")));
    }

    #[test]
    fn test_parse_output_multi_field_unparseable_keeps_raw() {
        let output = parse_output_fields(VERIFY, "not json at all");
        assert!(output.get("is_valid").is_none());
        assert_eq!(output.get("_raw"), Some(&json!("not json at all")));
    }

    // ==========================================
    // Status Mapping Tests
    // ==========================================

    #[test]
    fn test_map_status_transient() {
        assert!(map_status(429, "rate limited".to_string()).is_retryable());
        assert!(map_status(503, "unavailable".to_string()).is_retryable());
    }

    #[test]
    fn test_map_status_rejection() {
        let err = map_status(401, "bad key".to_string());
        assert!(!err.is_retryable());
        assert!(matches!(err, BackendError::Rejected { status: 401, .. }));
    }
}
