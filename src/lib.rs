pub mod config;
pub mod error;
pub mod model;
pub mod precision;
pub mod server;

pub use config::{ApiProfile, AppConfig};
pub use error::ServiceError;
pub use model::{CausalLm, GenerationRequest, GenerationResponse, ModelRegistry};
pub use server::build_router;
