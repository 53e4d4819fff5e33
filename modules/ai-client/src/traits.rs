use crate::error::Result;
use async_trait::async_trait;

// =============================================================================
// Message Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

// =============================================================================
// CompletionModel Trait
// =============================================================================

/// A provider that turns a conversation into one completion string.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

#[async_trait]
impl CompletionModel for crate::openai::OpenAi {
    fn model_name(&self) -> &str {
        self.model()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String> {
        self.complete_messages(messages).await
    }
}
