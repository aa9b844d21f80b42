pub mod anthropic;
pub mod grok;
pub mod mock;
pub mod openai;
pub mod retry;

pub use anthropic::AnthropicProvider;
pub use grok::grok_provider;
pub use mock::MockProvider;
pub use openai::OpenAIProvider;
pub use retry::{RetryPolicy, RetryingProvider};
