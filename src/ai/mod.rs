pub mod client;
pub mod token_provider;
pub mod types;

pub use client::{ChatClient, ClientError, RequestError};
pub use token_provider::{TokenProvider, TokenProviderError};
pub use types::{
    ChatMessage, FunctionSpec, Role, StreamErrorCode, StreamEvent, StreamPhase, ToolCallRequest,
    ToolCallSpec,
};
