use crate::{
    error::ServiceError,
    model::{GenerateOptions, ModelDescriptor},
};

/// A loaded causal language model.
///
/// `generate` blocks for the whole decode and returns the full sequence, prompt
/// tokens first, followed by at most `options.max_new_tokens` new tokens. It may
/// stop early once `options.eos_token_id` has been emitted.
pub trait CausalLm: Send + Sync {
    fn descriptor(&self) -> &ModelDescriptor;

    fn generate(
        &self,
        input_ids: &[u32],
        options: &GenerateOptions,
    ) -> Result<Vec<u32>, ServiceError>;
}
