use serde::{Deserialize, Serialize};

use crate::precision::Precision;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub generated_text: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextResponse {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub model_id: String,
    pub precision: Precision,
    pub device: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampling {
    /// Always pick the most likely next token.
    Greedy,
    /// Sample from the softmax of `logits / temperature`.
    Temperature(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub max_new_tokens: usize,
    pub sampling: Sampling,
    pub eos_token_id: Option<u32>,
}

/// Result of one generation call, already cut down to the new tokens.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
}
