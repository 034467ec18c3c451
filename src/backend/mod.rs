//! LM Backend Abstraction
//!
//! A uniform capability interface over LM invocation backends: given a stage
//! signature name and named input fields, a backend returns filled output
//! fields or fails. The pipeline stays backend-agnostic; variants per
//! provider live behind this trait.
//!
//! ```text
//! Orchestrator → LmBackend trait → [ChatCompletionsBackend, MockBackend, ...]
//! ```

pub mod http;
pub mod retry;

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use http::ChatCompletionsBackend;
pub use retry::{invoke_with_retry, RetryConfig};

/// Named fields passed to and returned from a backend invocation
pub type FieldMap = HashMap<String, Value>;

/// Typed input/output contract for one pipeline stage
///
/// A signature names the stage and declares which input fields the backend
/// receives and which output fields it must fill. The five pipeline
/// signatures are defined in [`crate::pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSignature {
    /// Stage name ("atomize", "plan", "execute", "aggregate", "verify")
    pub name: &'static str,
    /// Required input field names
    pub inputs: &'static [&'static str],
    /// Required output field names
    pub outputs: &'static [&'static str],
}

/// Build a field map from (name, value) pairs
pub fn fields(pairs: &[(&str, Value)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Errors from an LM backend invocation
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Transient fault (network, 5xx, rate limit) — safe to retry
    Unavailable { message: String },
    /// The call exceeded its deadline
    Timeout,
    /// Non-retriable rejection (invalid credentials, malformed config, 4xx)
    Rejected { status: u16, message: String },
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "Backend unavailable: {}", message),
            Self::Timeout => write!(f, "Backend call timed out"),
            Self::Rejected { status, message } => {
                write!(f, "Backend rejected request ({}): {}", status, message)
            }
        }
    }
}

impl std::error::Error for BackendError {}

impl BackendError {
    /// Whether retrying the same call may succeed
    ///
    /// Transient faults and timeouts are retryable; rejections are not —
    /// resending the same request will not fix credentials or config.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Timeout => true,
            Self::Rejected { .. } => false,
        }
    }
}

/// Unified trait for LM invocation backends
///
/// Implementations fulfill a stage contract: they receive the signature name
/// and its input fields, and must return the signature's output fields. The
/// trait is object-safe through explicit boxing of the async return type.
pub trait LmBackend: Send + Sync {
    /// Invoke the backend for one stage
    ///
    /// # Arguments
    /// * `signature` - The stage contract to fulfill
    /// * `inputs` - Named input fields for the stage
    ///
    /// # Returns
    /// * `Ok(FieldMap)` - The filled output fields
    /// * `Err(BackendError)` - Invocation failed
    fn invoke(
        &self,
        signature: StageSignature,
        inputs: FieldMap,
    ) -> Pin<Box<dyn Future<Output = Result<FieldMap, BackendError>> + Send + '_>>;

    /// The model identifier this backend serves
    fn model_name(&self) -> &str;
}

impl std::fmt::Debug for dyn LmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmBackend")
            .field("model", &self.model_name())
            .finish()
    }
}

/// Async handler used by [`MockBackend`] for input-dependent responses
pub type MockHandler = Arc<
    dyn Fn(FieldMap) -> Pin<Box<dyn Future<Output = Result<FieldMap, BackendError>> + Send>>
        + Send
        + Sync,
>;

/// Scripted mock backend for testing
///
/// Responses are registered per signature name and cycle when exhausted, or
/// an async handler can compute responses from the inputs (useful for
/// simulating staggered latencies). Every call is recorded for assertions
/// on invocation order.
#[derive(Clone, Default)]
pub struct MockBackend {
    model: String,
    scripts: Arc<Mutex<HashMap<String, Vec<Result<FieldMap, BackendError>>>>>,
    counters: Arc<Mutex<HashMap<String, Arc<AtomicUsize>>>>,
    handlers: Arc<Mutex<HashMap<String, MockHandler>>>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<(String, FieldMap)>>>,
}

impl MockBackend {
    /// Create a new mock backend
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            ..Default::default()
        }
    }

    /// Set the reported model name
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Append one successful scripted response for a signature
    pub fn with_response(self, signature: &str, response: FieldMap) -> Self {
        self.with_outcome(signature, Ok(response))
    }

    /// Append one scripted error for a signature
    pub fn with_error(self, signature: &str, error: BackendError) -> Self {
        self.with_outcome(signature, Err(error))
    }

    /// Append one scripted outcome for a signature
    pub fn with_outcome(self, signature: &str, outcome: Result<FieldMap, BackendError>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(signature.to_string())
            .or_default()
            .push(outcome);
        self
    }

    /// Register an async handler for a signature (takes precedence over scripts)
    pub fn with_handler(self, signature: &str, handler: MockHandler) -> Self {
        self.handlers
            .lock()
            .unwrap()
            .insert(signature.to_string(), handler);
        self
    }

    /// Add a fixed delay before every response
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// All recorded calls in invocation order
    pub fn calls(&self) -> Vec<(String, FieldMap)> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls recorded for a signature
    pub fn call_count(&self, signature: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(sig, _)| sig == signature)
            .count()
    }
}

impl LmBackend for MockBackend {
    fn invoke(
        &self,
        signature: StageSignature,
        inputs: FieldMap,
    ) -> Pin<Box<dyn Future<Output = Result<FieldMap, BackendError>> + Send + '_>> {
        let signature = signature.name;
        self.calls
            .lock()
            .unwrap()
            .push((signature.to_string(), inputs.clone()));

        let handler = self.handlers.lock().unwrap().get(signature).cloned();
        if let Some(handler) = handler {
            let delay = self.delay;
            let fut = handler(inputs);
            return Box::pin(async move {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                fut.await
            });
        }

        let outcome = {
            let scripts = self.scripts.lock().unwrap();
            match scripts.get(signature) {
                Some(outcomes) if !outcomes.is_empty() => {
                    let counter = self
                        .counters
                        .lock()
                        .unwrap()
                        .entry(signature.to_string())
                        .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
                        .clone();
                    let idx = counter.fetch_add(1, Ordering::SeqCst);
                    outcomes[idx % outcomes.len()].clone()
                }
                _ => Err(BackendError::Rejected {
                    status: 0,
                    message: format!("no scripted response for signature '{}'", signature),
                }),
            }
        };

        let delay = self.delay;
        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            outcome
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("model", &self.model)
            .field("calls", &self.calls.lock().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sig(name: &'static str) -> StageSignature {
        StageSignature {
            name,
            inputs: &[],
            outputs: &[],
        }
    }

    // ==========================================
    // BackendError Tests
    // ==========================================

    #[test]
    fn test_error_display() {
        let errors = vec![
            BackendError::Unavailable {
                message: "connection refused".to_string(),
            },
            BackendError::Timeout,
            BackendError::Rejected {
                status: 401,
                message: "bad key".to_string(),
            },
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_error_retryability() {
        assert!(BackendError::Unavailable {
            message: "503".to_string()
        }
        .is_retryable());
        assert!(BackendError::Timeout.is_retryable());
        assert!(!BackendError::Rejected {
            status: 401,
            message: "invalid credentials".to_string()
        }
        .is_retryable());
    }

    // ==========================================
    // fields Helper Tests
    // ==========================================

    #[test]
    fn test_fields_helper() {
        let map = fields(&[("goal", json!("What is 2+2?")), ("depth", json!(0))]);
        assert_eq!(map.get("goal"), Some(&json!("What is 2+2?")));
        assert_eq!(map.len(), 2);
    }

    // ==========================================
    // MockBackend Tests
    // ==========================================

    #[tokio::test]
    async fn test_mock_scripted_response() {
        let backend = MockBackend::new()
            .with_response("execute", fields(&[("result", json!("4"))]));

        let output = backend
            .invoke(sig("execute"), fields(&[("task", json!("2+2"))]))
            .await
            .unwrap();

        assert_eq!(output.get("result"), Some(&json!("4")));
    }

    #[tokio::test]
    async fn test_mock_responses_cycle() {
        let backend = MockBackend::new()
            .with_response("execute", fields(&[("result", json!("a"))]))
            .with_response("execute", fields(&[("result", json!("b"))]));

        let first = backend.invoke(sig("execute"), FieldMap::new()).await.unwrap();
        let second = backend.invoke(sig("execute"), FieldMap::new()).await.unwrap();
        let third = backend.invoke(sig("execute"), FieldMap::new()).await.unwrap();

        assert_eq!(first.get("result"), Some(&json!("a")));
        assert_eq!(second.get("result"), Some(&json!("b")));
        assert_eq!(third.get("result"), Some(&json!("a"))); // cycles
    }

    #[tokio::test]
    async fn test_mock_scripted_error() {
        let backend = MockBackend::new().with_error(
            "plan",
            BackendError::Unavailable {
                message: "down".to_string(),
            },
        );

        let result = backend.invoke(sig("plan"), FieldMap::new()).await;
        assert!(matches!(result, Err(BackendError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_mock_unscripted_signature_rejected() {
        let backend = MockBackend::new();
        let result = backend.invoke(sig("verify"), FieldMap::new()).await;
        assert!(matches!(result, Err(BackendError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_mock_records_calls_in_order() {
        let backend = MockBackend::new()
            .with_response("atomize", fields(&[("is_atomic", json!("true"))]))
            .with_response("execute", fields(&[("result", json!("done"))]));

        backend
            .invoke(sig("atomize"), fields(&[("goal", json!("g"))]))
            .await
            .unwrap();
        backend
            .invoke(sig("execute"), fields(&[("task", json!("g"))]))
            .await
            .unwrap();

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "atomize");
        assert_eq!(calls[1].0, "execute");
        assert_eq!(backend.call_count("execute"), 1);
    }

    #[tokio::test]
    async fn test_mock_handler_overrides_scripts() {
        let handler: MockHandler = Arc::new(|inputs: FieldMap| {
            Box::pin(async move {
                let task = inputs
                    .get("task")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(fields(&[("result", json!(format!("echo: {}", task)))]))
            })
        });

        let backend = MockBackend::new()
            .with_response("execute", fields(&[("result", json!("scripted"))]))
            .with_handler("execute", handler);

        let output = backend
            .invoke(sig("execute"), fields(&[("task", json!("hello"))]))
            .await
            .unwrap();

        assert_eq!(output.get("result"), Some(&json!("echo: hello")));
    }

    #[tokio::test]
    async fn test_mock_delay() {
        let backend = MockBackend::new()
            .with_response("execute", FieldMap::new())
            .with_delay(Duration::from_millis(50));

        let start = std::time::Instant::now();
        backend.invoke(sig("execute"), FieldMap::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_trait_is_object_safe() {
        fn _accepts_trait_object(_backend: &dyn LmBackend) {}
        let backend = MockBackend::new();
        _accepts_trait_object(&backend);
    }
}
