mod backend;
mod loader;
mod registry;
mod types;

pub use backend::CausalLm;
#[cfg(feature = "tch-backend")]
pub use loader::TorchModel;
pub use loader::{load_tokenizer, resolve_eos_token};
pub use registry::ModelRegistry;
pub use types::{
    Completion, GenerateOptions, GenerationRequest, GenerationResponse, HealthResponse,
    ModelDescriptor, Sampling, StatusResponse, TextResponse,
};
