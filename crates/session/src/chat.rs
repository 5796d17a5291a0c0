use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use invoice_desk_backend::{AssistantBackend, BackendResult, ChatTurn, Speaker, TurnMessage};
use snafu::{Snafu, ensure};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::capture::unix_millis;

pub const GREETING: &str = "Xin chào! Tôi là trợ lý AI của Invoice Manager. Tôi có thể giúp bạn quản lý hóa đơn, trả lời câu hỏi và hướng dẫn sử dụng hệ thống. Bạn cần hỗ trợ gì không?";
pub const REPLY_FAILED: &str = "Xin lỗi, trợ lý hiện không phản hồi được. Vui lòng thử lại sau.";

/// Position of a message in the conversation. Strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub text: String,
    pub sender: Sender,
    pub sent_at_unix_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChatTurnState {
    pub awaiting_reply: bool,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("message is empty"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("the assistant is still answering the previous message"))]
    AwaitingReply { stage: &'static str },
    #[snafu(display("the chat panel has been torn down"))]
    Disposed { stage: &'static str },
}

pub type ChatResult<T> = Result<T, ChatError>;

struct ChatLog {
    messages: Vec<ChatMessage>,
    next_id: u64,
    awaiting_reply: bool,
    disposed: bool,
}

impl ChatLog {
    fn with_greeting() -> Self {
        let mut log = Self {
            messages: Vec::new(),
            next_id: 1,
            awaiting_reply: false,
            disposed: false,
        };
        log.append(Sender::Assistant, GREETING.to_string());
        log
    }

    fn append(&mut self, sender: Sender, text: String) -> MessageId {
        let id = MessageId::new(self.next_id);
        self.next_id += 1;
        self.messages.push(ChatMessage {
            id,
            text,
            sender,
            sent_at_unix_ms: unix_millis(),
        });
        id
    }

    fn history(&self) -> Vec<TurnMessage> {
        self.messages
            .iter()
            .map(|message| {
                let speaker = match message.sender {
                    Sender::User => Speaker::User,
                    Sender::Assistant => Speaker::Assistant,
                };
                TurnMessage::new(speaker, message.text.clone())
            })
            .collect()
    }

    /// Applies a finished reply. Returns `false` when the log was torn down meanwhile.
    fn deliver_reply(&mut self, reply: BackendResult<String>) -> bool {
        if self.disposed {
            return false;
        }

        let text = match reply {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(error = %error, "assistant reply failed");
                REPLY_FAILED.to_string()
            }
        };
        let id = self.append(Sender::Assistant, text);
        self.awaiting_reply = false;
        tracing::debug!(message_id = id.0, "assistant reply appended");
        true
    }
}

/// Handle to the reply task started by [`ChatTurnController::send_message`].
pub struct PendingReply {
    pub message_id: MessageId,
    task: JoinHandle<()>,
}

impl PendingReply {
    /// Resolves once the reply was appended, suppressed, or replaced by the fallback text.
    pub async fn wait(self) {
        if let Err(error) = self.task.await {
            tracing::warn!(error = %error, "assistant reply task ended abnormally");
        }
    }
}

/// Append-only conversation with at most one assistant reply in flight.
///
/// Clones share one log. Must be used from inside a tokio runtime.
#[derive(Clone)]
pub struct ChatTurnController {
    log: Arc<Mutex<ChatLog>>,
    assistant: Arc<dyn AssistantBackend>,
    teardown: Arc<watch::Sender<bool>>,
}

impl ChatTurnController {
    pub fn new(assistant: Arc<dyn AssistantBackend>) -> Self {
        let (teardown, _) = watch::channel(false);
        Self {
            log: Arc::new(Mutex::new(ChatLog::with_greeting())),
            assistant,
            teardown: Arc::new(teardown),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChatLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.clone()
    }

    pub fn turn_state(&self) -> ChatTurnState {
        ChatTurnState {
            awaiting_reply: self.lock().awaiting_reply,
        }
    }

    /// Whether the input should accept a new message right now.
    pub fn can_send(&self) -> bool {
        let log = self.lock();
        !log.awaiting_reply && !log.disposed
    }

    /// Appends the user message and requests the assistant reply.
    ///
    /// The user message is in the log before this returns; the reply lands later.
    pub fn send_message(&self, text: &str) -> ChatResult<PendingReply> {
        let text = text.trim();
        ensure!(
            !text.is_empty(),
            EmptyMessageSnafu {
                stage: "send-message"
            }
        );

        let (message_id, turn) = {
            let mut log = self.lock();
            ensure!(
                !log.disposed,
                DisposedSnafu {
                    stage: "send-message"
                }
            );
            ensure!(
                !log.awaiting_reply,
                AwaitingReplySnafu {
                    stage: "send-message"
                }
            );

            let history = log.history();
            let message_id = log.append(Sender::User, text.to_string());
            log.awaiting_reply = true;
            (message_id, ChatTurn::new(text).with_history(history))
        };
        tracing::debug!(message_id = message_id.0, assistant = %self.assistant.id(), "user message appended");

        let log = Arc::clone(&self.log);
        let assistant = Arc::clone(&self.assistant);
        let mut teardown = self.teardown.subscribe();
        let task = tokio::spawn(async move {
            let reply = tokio::select! {
                reply = assistant.reply(turn) => Some(reply),
                _ = teardown.wait_for(|disposed| *disposed) => None,
            };

            let delivered = match reply {
                Some(reply) => log
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .deliver_reply(reply),
                None => false,
            };
            if !delivered {
                tracing::debug!(message_id = message_id.0, "assistant reply suppressed after teardown");
            }
        });

        Ok(PendingReply { message_id, task })
    }

    /// Teardown: any reply still in flight is dropped without touching the log.
    pub fn dispose(&self) {
        let mut log = self.lock();
        if log.disposed {
            return;
        }
        log.disposed = true;
        log.awaiting_reply = false;
        drop(log);
        self.teardown.send_replace(true);
        tracing::debug!("chat panel disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use invoice_desk_backend::{BackendError, BoxFuture, SimulatedAssistant};
    use tokio::sync::oneshot;

    use super::*;

    /// Assistant whose reply is released by the test.
    struct GatedAssistant {
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        fail: bool,
    }

    impl GatedAssistant {
        fn new(fail: bool) -> (Arc<Self>, oneshot::Sender<()>) {
            let (tx, rx) = oneshot::channel();
            let assistant = Arc::new(Self {
                gate: Mutex::new(Some(rx)),
                fail,
            });
            (assistant, tx)
        }
    }

    impl AssistantBackend for GatedAssistant {
        fn id(&self) -> &str {
            "gated"
        }

        fn reply<'a>(&'a self, turn: ChatTurn) -> BoxFuture<'a, BackendResult<String>> {
            let gate = self.gate.lock().unwrap().take();
            Box::pin(async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                if self.fail {
                    return Err(BackendError::EmptyReply { stage: "gated" });
                }
                Ok(format!("echo: {}", turn.text))
            })
        }
    }

    #[test]
    fn log_starts_with_greeting() {
        let log = ChatLog::with_greeting();
        assert_eq!(log.messages.len(), 1);
        assert_eq!(log.messages[0].id, MessageId::new(1));
        assert_eq!(log.messages[0].sender, Sender::Assistant);
    }

    #[tokio::test(start_paused = true)]
    async fn send_then_reply_appends_in_order() {
        let assistant = Arc::new(SimulatedAssistant::new(Duration::from_millis(1_500)));
        let chat = ChatTurnController::new(assistant);

        let pending = chat.send_message("Xin chào").unwrap();

        let messages = chat.messages();
        assert_eq!(pending.message_id, MessageId::new(2));
        assert_eq!(messages[1].sender, Sender::User);
        assert_eq!(messages[1].text, "Xin chào");
        assert!(chat.turn_state().awaiting_reply);

        pending.wait().await;

        let messages = chat.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].id, MessageId::new(3));
        assert_eq!(messages[2].sender, Sender::Assistant);
        assert!(!chat.turn_state().awaiting_reply);
    }

    #[tokio::test(start_paused = true)]
    async fn second_send_while_awaiting_is_rejected() {
        let chat = ChatTurnController::new(Arc::new(SimulatedAssistant::default()));
        let pending = chat.send_message("first").unwrap();

        assert!(!chat.can_send());
        assert!(matches!(
            chat.send_message("second"),
            Err(ChatError::AwaitingReply { .. })
        ));
        assert_eq!(chat.messages().len(), 2);

        pending.wait().await;
        assert!(chat.send_message("second").is_ok());
    }

    #[tokio::test]
    async fn blank_messages_are_rejected() {
        let chat = ChatTurnController::new(Arc::new(SimulatedAssistant::default()));
        assert!(matches!(
            chat.send_message("   \n"),
            Err(ChatError::EmptyMessage { .. })
        ));
        assert_eq!(chat.messages().len(), 1);
        assert!(!chat.turn_state().awaiting_reply);
    }

    #[tokio::test(start_paused = true)]
    async fn ids_strictly_increase_across_turns() {
        let chat = ChatTurnController::new(Arc::new(SimulatedAssistant::default()));
        for round in 0..5 {
            chat.send_message(&format!("question {round}")).unwrap().wait().await;
        }

        let ids = chat
            .messages()
            .iter()
            .map(|message| message.id.0)
            .collect::<Vec<_>>();
        assert_eq!(ids, (1..=11).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn history_reaches_the_assistant() {
        let (assistant, release) = GatedAssistant::new(false);
        let chat = ChatTurnController::new(assistant);

        let pending = chat.send_message("  hóa đơn tháng 5  ").unwrap();
        release.send(()).unwrap();
        pending.wait().await;

        let messages = chat.messages();
        assert_eq!(messages[1].text, "hóa đơn tháng 5");
        assert_eq!(messages[2].text, "echo: hóa đơn tháng 5");
    }

    #[tokio::test]
    async fn backend_failure_appends_apology_and_unblocks_input() {
        let (assistant, release) = GatedAssistant::new(true);
        let chat = ChatTurnController::new(assistant);

        let pending = chat.send_message("hello").unwrap();
        release.send(()).unwrap();
        pending.wait().await;

        let messages = chat.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].text, REPLY_FAILED);
        assert!(chat.can_send());
    }

    #[tokio::test]
    async fn reply_after_dispose_is_suppressed() {
        let (assistant, release) = GatedAssistant::new(false);
        let chat = ChatTurnController::new(assistant);

        let pending = chat.send_message("hello").unwrap();
        chat.dispose();
        let _ = release.send(());
        pending.wait().await;

        assert_eq!(chat.messages().len(), 2);
        assert!(chat.is_disposed());
        assert!(matches!(
            chat.send_message("again"),
            Err(ChatError::Disposed { .. })
        ));
    }

    #[test]
    fn late_delivery_on_disposed_log_is_ignored() {
        let mut log = ChatLog::with_greeting();
        log.append(Sender::User, "hi".to_string());
        log.awaiting_reply = true;
        log.disposed = true;

        assert!(!log.deliver_reply(Ok("late".to_string())));
        assert_eq!(log.messages.len(), 2);
    }
}
