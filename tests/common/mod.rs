#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use parking_lot::Mutex;
use tokenizers::Tokenizer;
use tower::ServiceExt;

use cheri_ml_service::{
    AppConfig, CausalLm, ModelRegistry, ServiceError, build_router,
    model::{GenerateOptions, ModelDescriptor},
    precision::Precision,
};

pub const EOS: u32 = 1;

/// "the cat sat on the mat" followed by `</s>`.
pub const CONTINUATION: [u32; 7] = [4, 5, 6, 7, 4, 8, EOS];

const TOKENIZER_JSON: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [
    {"id": 1, "content": "</s>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
  ],
  "normalizer": null,
  "pre_tokenizer": {"type": "Whitespace"},
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {
      "[UNK]": 0, "</s>": 1, "hello": 2, "world": 3, "the": 4, "cat": 5,
      "sat": 6, "on": 7, "mat": 8, "once": 9, "upon": 10, "a": 11, "time": 12
    },
    "unk_token": "[UNK]"
  }
}"#;

pub fn test_tokenizer() -> Tokenizer {
    TOKENIZER_JSON.parse().expect("test tokenizer json")
}

/// In-memory model that replays a fixed continuation and records every call.
pub struct ScriptedLm {
    descriptor: ModelDescriptor,
    continuation: Vec<u32>,
    failure: Option<String>,
    panics: bool,
    truncates: bool,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<GenerateOptions>>,
}

impl ScriptedLm {
    pub fn new() -> Self {
        Self {
            descriptor: ModelDescriptor {
                model_id: "test/scripted".to_string(),
                precision: Precision::F32,
                device: "Cpu".to_string(),
                size_bytes: 0,
            },
            continuation: CONTINUATION.to_vec(),
            failure: None,
            panics: false,
            truncates: false,
            delay: Duration::ZERO,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::new()
        }
    }

    /// Returns fewer tokens than it was given.
    pub fn truncating() -> Self {
        Self {
            truncates: true,
            ..Self::new()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<GenerateOptions> {
        self.calls.lock().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl CausalLm for ScriptedLm {
    fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn generate(
        &self,
        input_ids: &[u32],
        options: &GenerateOptions,
    ) -> Result<Vec<u32>, ServiceError> {
        self.calls.lock().push(options.clone());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.panics {
            panic!("scripted model panicked");
        }
        if let Some(message) = &self.failure {
            return Err(ServiceError::Inference(message.clone()));
        }
        if self.truncates {
            return Ok(input_ids[..input_ids.len() - 1].to_vec());
        }

        let mut output = input_ids.to_vec();
        for &token in self.continuation.iter().take(options.max_new_tokens) {
            output.push(token);
            if options.eos_token_id == Some(token) {
                break;
            }
        }
        Ok(output)
    }
}

pub fn registry_with(model: Arc<ScriptedLm>, config: &AppConfig) -> Arc<ModelRegistry> {
    Arc::new(ModelRegistry::new(test_tokenizer(), model, config))
}

pub fn app_with(model: Arc<ScriptedLm>, config: AppConfig) -> Router {
    let registry = registry_with(model, &config);
    build_router(Arc::new(config), registry)
}

pub async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, body.to_vec())
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
        )
        .await
        .expect("response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, body.to_vec())
}

pub fn json(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).expect("json body")
}
