use std::time::Duration;

use super::provider::{AssistantBackend, BackendResult, BoxFuture, ChatTurn};

pub const SIMULATED_PROVIDER_ID: &str = "simulated";
pub const DEFAULT_REPLY_DELAY: Duration = Duration::from_millis(1_500);
pub const SIMULATED_REPLY: &str = "Cảm ơn bạn đã liên hệ! Tôi đã nhận được yêu cầu của bạn và sẽ xử lý ngay. Bạn có thể hỏi tôi về cách sử dụng camera, upload hóa đơn hoặc bất kỳ câu hỏi nào khác.";

/// Stand-in assistant that answers every turn with the same text after a fixed delay.
pub struct SimulatedAssistant {
    delay: Duration,
    reply: String,
}

impl SimulatedAssistant {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            reply: SIMULATED_REPLY.to_string(),
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = reply.into();
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for SimulatedAssistant {
    fn default() -> Self {
        Self::new(DEFAULT_REPLY_DELAY)
    }
}

impl AssistantBackend for SimulatedAssistant {
    fn id(&self) -> &str {
        SIMULATED_PROVIDER_ID
    }

    fn reply<'a>(&'a self, turn: ChatTurn) -> BoxFuture<'a, BackendResult<String>> {
        Box::pin(async move {
            tracing::debug!(
                delay_ms = self.delay.as_millis() as u64,
                history_len = turn.history.len(),
                "scheduling simulated assistant reply"
            );
            tokio::time::sleep(self.delay).await;
            Ok(self.reply.clone())
        })
    }
}
