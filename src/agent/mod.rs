pub mod executor;
pub mod factory;
pub mod model;
pub mod output;
pub mod parser;
pub mod providers;

pub use executor::{AgentConfig, AgentExecutor};
pub use factory::{create_provider, create_provider_for};
pub use model::{
    GenerationConfig, ModelProvider, ModelResponse, ProviderKind, ProviderMetadata, TextStream,
    TokenUsage,
};
pub use output::{AgentAction, AgentResult, AgentStep, RunOutcome};
pub use parser::{evaluate_reply, parse_reply, AgentReply, ParseOutcome};
