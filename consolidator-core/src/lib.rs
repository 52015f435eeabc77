pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod similarity;

pub use config::ConsolidatorConfig;
pub use error::ConsolidatorError;
pub use llm::{
    create_chat_backend, ChatBackend, ChatError, ChatMessage, ChatResponse, GeminiChatClient,
};
pub use models::{Candidate, Contact, Customer, Segment, Session, SessionStatus};
