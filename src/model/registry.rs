use std::sync::Arc;

use tokenizers::Tokenizer;
use tokio::{sync::Semaphore, task};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        CausalLm, Completion, GenerateOptions, ModelDescriptor, Sampling,
        loader::{load_tokenizer, resolve_eos_token},
    },
};

/// The loaded tokenizer and model, shared read-only by every request.
///
/// Generation work runs on the blocking pool behind a semaphore, so at most
/// `max_concurrent_generations` decodes touch the model at once and the rest
/// wait their turn.
pub struct ModelRegistry {
    tokenizer: Arc<Tokenizer>,
    model: Arc<dyn CausalLm>,
    eos_token_id: Option<u32>,
    gate: Arc<Semaphore>,
}

impl ModelRegistry {
    #[cfg(feature = "tch-backend")]
    pub fn initialize(config: &AppConfig) -> Result<Self, ServiceError> {
        let tokenizer = load_tokenizer(config)?;
        let model = crate::model::loader::TorchModel::load(config)?;
        Ok(Self::new(tokenizer, Arc::new(model), config))
    }

    #[cfg(not(feature = "tch-backend"))]
    pub fn initialize(config: &AppConfig) -> Result<Self, ServiceError> {
        // Fail on the tokenizer first so a bad identifier is reported as such.
        load_tokenizer(config)?;
        Err(ServiceError::ModelLoad(
            "built without an inference backend; enable the `tch-backend` feature".into(),
        ))
    }

    pub fn new(tokenizer: Tokenizer, model: Arc<dyn CausalLm>, config: &AppConfig) -> Self {
        let eos_token_id = resolve_eos_token(&tokenizer, config.eos_token_id);
        Self {
            tokenizer: Arc::new(tokenizer),
            model,
            eos_token_id,
            gate: Arc::new(Semaphore::new(config.max_concurrent_generations.max(1))),
        }
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        self.model.descriptor()
    }

    pub fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }

    /// Encodes `prompt`, asks the model for up to `max_new_tokens` more tokens
    /// and decodes only the tokens that follow the prompt.
    pub async fn complete(
        &self,
        prompt: String,
        max_new_tokens: usize,
        sampling: Sampling,
    ) -> Result<Completion, ServiceError> {
        if max_new_tokens == 0 {
            return Err(ServiceError::BadRequest("max_tokens must be positive".into()));
        }
        if let Sampling::Temperature(t) = sampling {
            if !(t.is_finite() && t > 0.0) {
                return Err(ServiceError::BadRequest(format!(
                    "temperature must be a positive number, got {t}"
                )));
            }
        }

        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ServiceError::Other("generation queue closed".into()))?;

        let tokenizer = self.tokenizer.clone();
        let model = self.model.clone();
        let options = GenerateOptions {
            max_new_tokens,
            sampling,
            eos_token_id: self.eos_token_id,
        };

        task::spawn_blocking(move || {
            let _permit = permit;
            run_completion(&tokenizer, model.as_ref(), &prompt, &options)
        })
        .await
        .map_err(|err| ServiceError::Inference(format!("inference task failed: {err}")))?
    }
}

fn run_completion(
    tokenizer: &Tokenizer,
    model: &dyn CausalLm,
    prompt: &str,
    options: &GenerateOptions,
) -> Result<Completion, ServiceError> {
    let encoding = tokenizer
        .encode(prompt, true)
        .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
    let input_ids = encoding.get_ids();
    if input_ids.is_empty() {
        return Err(ServiceError::BadRequest("prompt produced no tokens".into()));
    }
    let prompt_tokens = input_ids.len();

    let output = model.generate(input_ids, options)?;
    let generated = output.get(prompt_tokens..).ok_or_else(|| {
        ServiceError::Inference(format!(
            "model returned {} tokens for a {prompt_tokens}-token prompt",
            output.len()
        ))
    })?;

    let text = tokenizer
        .decode(generated, true)
        .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;

    Ok(Completion {
        text,
        prompt_tokens,
        generated_tokens: generated.len(),
    })
}
