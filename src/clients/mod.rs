pub mod openrouter;
pub mod traits;

pub use openrouter::OpenRouterClient;
pub use traits::{ChatMessage, CompletionClient, CompletionOptions, Role};
