use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};

use super::provider::{
    AssistantBackend, AssistantConfig, BackendResult, BoxFuture, ChatTurn,
    CompletionsFailedSnafu, EmptyReplySnafu, HttpClientSnafu, MissingApiKeySnafu, Speaker,
    TurnMessage,
};

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ASSISTANT_MODEL: &str = "gpt-4o-mini";
pub const ASSISTANT_PREAMBLE: &str = "You are the assistant of Invoice Manager. Help users capture or upload invoices, answer questions about their invoices, and explain how to use the application. Reply in the user's language.";

/// Assistant backed by an OpenAI-compatible endpoint through Rig.
///
/// The reply is streamed and concatenated; dropping the reply future drops the
/// underlying stream, which stops provider IO.
pub struct RigAssistant {
    config: AssistantConfig,
}

impl RigAssistant {
    pub fn new(config: AssistantConfig) -> BackendResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-assistant-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { config })
    }

    fn model_id(&self) -> &str {
        if self.config.model_id.is_empty() {
            DEFAULT_ASSISTANT_MODEL
        } else {
            &self.config.model_id
        }
    }

    fn build_client(config: &AssistantConfig) -> BackendResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn to_rig_message(message: &TurnMessage) -> Option<RigMessage> {
        if message.text.trim().is_empty() {
            return None;
        }
        match message.speaker {
            Speaker::User => Some(RigMessage::user(message.text.clone())),
            Speaker::Assistant => Some(RigMessage::assistant(message.text.clone())),
        }
    }

    async fn complete(&self, turn: ChatTurn) -> BackendResult<String> {
        let client = Self::build_client(&self.config)?;
        let model = client.completion_model(self.model_id().to_string());

        let history = turn
            .history
            .iter()
            .filter_map(Self::to_rig_message)
            .collect::<Vec<_>>();

        let mut stream = model
            .completion_request(RigMessage::user(turn.text.clone()))
            .messages(history)
            .preamble(ASSISTANT_PREAMBLE.to_string())
            .stream()
            .await
            .context(CompletionsFailedSnafu {
                stage: "open-stream",
            })?;

        let mut reply = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(StreamedAssistantContent::Text(text)) => reply.push_str(&text.text),
                Ok(_) => {}
                Err(source) => {
                    tracing::warn!(
                        model_id = %self.model_id(),
                        error = %source,
                        "assistant stream emitted an error chunk"
                    );
                    return Err(source).context(CompletionsFailedSnafu {
                        stage: "stream-chunk",
                    });
                }
            }
        }

        let reply = reply.trim().to_string();
        ensure!(
            !reply.is_empty(),
            EmptyReplySnafu {
                stage: "collect-reply"
            }
        );
        Ok(reply)
    }
}

impl AssistantBackend for RigAssistant {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn reply<'a>(&'a self, turn: ChatTurn) -> BoxFuture<'a, BackendResult<String>> {
        Box::pin(self.complete(turn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_rejected() {
        let config = AssistantConfig::new("openai", "  ", "", "");
        assert!(RigAssistant::new(config).is_err());
    }

    #[test]
    fn blank_model_falls_back_to_default() {
        let config = AssistantConfig::new("openai", "sk-test", "", " ");
        let assistant = RigAssistant::new(config).ok();
        assert_eq!(
            assistant.as_ref().map(|assistant| assistant.model_id()),
            Some(DEFAULT_ASSISTANT_MODEL)
        );
    }

    #[test]
    fn blank_history_turns_are_skipped() {
        let blank = TurnMessage::new(Speaker::Assistant, "   ");
        let spoken = TurnMessage::new(Speaker::User, "hello");
        assert!(RigAssistant::to_rig_message(&blank).is_none());
        assert!(RigAssistant::to_rig_message(&spoken).is_some());
    }
}
