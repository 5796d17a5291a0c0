//! Collaborator seams consumed by the invoice desk: the assistant that answers chat
//! turns, the invoice-processing pipeline, and the account service.
use std::sync::Arc;

mod auth;
mod inbox;
mod provider;
mod rig_adapter;
mod simulated;

pub use auth::{MockAuthBackend, development_accounts};
pub use inbox::{InboxProcessor, extension_for};
pub use provider::{
    AssistantBackend, AssistantConfig, AuthBackend, BackendError, BackendResult, BoxFuture,
    ChatTurn, InvoiceProcessor, InvoiceUpload, ProcessingReceipt, Speaker, TurnMessage, User,
    UserRole,
};
pub use rig_adapter::{DEFAULT_ASSISTANT_MODEL, RIG_OPENAI_PROVIDER_ID, RigAssistant};
pub use simulated::{
    DEFAULT_REPLY_DELAY, SIMULATED_PROVIDER_ID, SIMULATED_REPLY, SimulatedAssistant,
};

pub fn create_assistant(mut config: AssistantConfig) -> BackendResult<Arc<dyn AssistantBackend>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = SIMULATED_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        SIMULATED_PROVIDER_ID => Ok(Arc::new(SimulatedAssistant::new(config.reply_delay))),
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigAssistant::new(config)?))
        }
        _ => Err(BackendError::UnsupportedProvider {
            stage: "create-assistant",
            provider_id: config.provider_id,
        }),
    }
}
