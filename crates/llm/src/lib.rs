pub mod gateway;
pub mod json;
pub mod provider;
pub mod providers;
pub mod template;

pub use gateway::{Completion, GatewayError, GenerateRequest, LlmGateway, PromptKind, ProviderAttempt};
pub use provider::{LlmError, LlmProvider, Message, Role};
