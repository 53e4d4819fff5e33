use async_trait::async_trait;

use ai_client::{AiError, CompletionModel, Message};
use injurylens_common::CallError;

use crate::traits::LabelService;

/// A chat model behind the [`LabelService`] seam. The system prompt is sent
/// with every item.
pub struct ModelLabeler<M> {
    model: M,
    system_prompt: Option<String>,
}

impl<M: CompletionModel> ModelLabeler<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }
}

#[async_trait]
impl<M: CompletionModel> LabelService for ModelLabeler<M> {
    async fn label(&self, prompt: &str) -> Result<String, CallError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.as_str()));
        }
        messages.push(Message::user(prompt));

        self.model.complete(&messages).await.map_err(call_error)
    }
}

fn call_error(err: AiError) -> CallError {
    if err.is_transient() {
        CallError::Transient(err.to_string())
    } else if err.is_malformed() {
        CallError::Malformed(err.to_string())
    } else {
        CallError::Permanent(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_client::MessageRole;
    use std::sync::Mutex;

    struct FakeModel {
        reply: Mutex<Option<ai_client::error::Result<String>>>,
        seen: Mutex<Vec<(MessageRole, String)>>,
    }

    impl FakeModel {
        fn replying(reply: ai_client::error::Result<String>) -> Self {
            Self {
                reply: Mutex::new(Some(reply)),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionModel for FakeModel {
        fn model_name(&self) -> &str {
            "fake"
        }

        async fn complete(&self, messages: &[Message]) -> ai_client::error::Result<String> {
            self.seen
                .lock()
                .unwrap()
                .extend(messages.iter().map(|m| (m.role, m.content.clone())));
            self.reply.lock().unwrap().take().unwrap_or(Err(AiError::EmptyResponse))
        }
    }

    #[tokio::test]
    async fn sends_system_and_user_messages() {
        let labeler = ModelLabeler::new(FakeModel::replying(Ok("burn".into()))).with_system_prompt("be brief");
        assert_eq!(labeler.label("post text").await, Ok("burn".to_string()));

        let seen = labeler.model.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (MessageRole::System, "be brief".to_string()),
                (MessageRole::User, "post text".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn maps_ai_errors() {
        let cases = [
            (
                AiError::Api {
                    status: 429,
                    message: "slow down".into(),
                },
                "transient",
            ),
            (
                AiError::Api {
                    status: 401,
                    message: "bad key".into(),
                },
                "permanent",
            ),
            (AiError::EmptyResponse, "malformed"),
        ];
        for (err, kind) in cases {
            let labeler = ModelLabeler::new(FakeModel::replying(Err(err)));
            let got = labeler.label("x").await.unwrap_err();
            let actual = match got {
                CallError::Transient(_) => "transient",
                CallError::Permanent(_) => "permanent",
                CallError::Malformed(_) => "malformed",
            };
            assert_eq!(actual, kind);
        }
    }
}
