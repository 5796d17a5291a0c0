use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type BackendResult<T> = Result<T, BackendError>;

/// Speaker of one conversational turn as seen by the assistant backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnMessage {
    pub speaker: Speaker,
    pub text: String,
}

impl TurnMessage {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }
}

/// One `{ text }` chat turn plus the conversation that preceded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub text: String,
    pub history: Vec<TurnMessage>,
}

impl ChatTurn {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<TurnMessage>) -> Self {
        self.history = history;
        self
    }
}

/// Artifact handed over to the invoice-processing pipeline.
///
/// The payload is shared, so cloning an upload never copies image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceUpload {
    pub reference: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingReceipt {
    pub reference: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub name: String,
    pub role: UserRole,
}

impl User {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, UserRole::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
    pub model_id: String,
    pub reply_delay: Duration,
}

impl AssistantConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            model_id: model_id.into().trim().to_string(),
            reply_delay: Duration::ZERO,
        }
    }

    pub fn with_reply_delay(mut self, reply_delay: Duration) -> Self {
        self.reply_delay = reply_delay;
        self
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("missing API key for assistant provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("assistant provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
    #[snafu(display("assistant returned an empty reply on `{stage}`"))]
    EmptyReply { stage: &'static str },
    #[snafu(display("no account is signed in on `{stage}`"))]
    NotSignedIn { stage: &'static str },
    #[snafu(display("account '{email}' no longer exists"))]
    AccountMissing { stage: &'static str, email: String },
    #[snafu(display("email '{email}' is already used by another account"))]
    EmailInUse { stage: &'static str, email: String },
    #[snafu(display("failed to create inbox directory at {path:?} on `{stage}`: {source}"))]
    CreateInbox {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write artifact to {path:?} on `{stage}`: {source}"))]
    WriteArtifact {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Produces one assistant reply per user turn.
pub trait AssistantBackend: Send + Sync {
    fn id(&self) -> &str;
    fn reply<'a>(&'a self, turn: ChatTurn) -> BoxFuture<'a, BackendResult<String>>;
}

/// Accepts artifacts for invoice extraction.
pub trait InvoiceProcessor: Send + Sync {
    fn process<'a>(&'a self, upload: InvoiceUpload) -> BoxFuture<'a, BackendResult<ProcessingReceipt>>;
}

/// Account operations consumed by the login, signup and profile screens.
///
/// `login` and `register` resolve to `None` when the backend refuses the request.
pub trait AuthBackend: Send + Sync {
    fn login<'a>(&'a self, email: &'a str, password: &'a str) -> BoxFuture<'a, BackendResult<Option<User>>>;
    fn register<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, BackendResult<Option<User>>>;
    fn update_profile<'a>(&'a self, name: &'a str, email: &'a str) -> BoxFuture<'a, BackendResult<User>>;
    /// Resolves to `false` when `current` does not match the signed-in account's password.
    fn change_password<'a>(&'a self, current: &'a str, new: &'a str) -> BoxFuture<'a, BackendResult<bool>>;
    fn logout(&self);
}
