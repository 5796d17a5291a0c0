#![deny(unsafe_code)]

//! Session-scoped controllers behind the invoice desk dashboard.

/// Sign-in state and form validation.
pub mod auth;
/// Camera/file artifact lifecycle.
pub mod capture;
/// Turn-taking chat log with a single pending reply.
pub mod chat;
pub mod dashboard;
pub mod error;
/// Capture device seam.
pub mod media;
pub mod upload;

pub use auth::{
    AuthError, AuthResult, AuthSession, LoginForm, PasswordChangeForm, PasswordPolicy, SignupForm,
    is_valid_email, validate_email, validate_name,
};
pub use capture::{
    ArtifactId, ArtifactOrigin, CAPTURE_MIME_TYPE, CaptureArtifact, CaptureError, CaptureOptions,
    CaptureResult, CaptureSessionController, CaptureState, DEFAULT_JPEG_QUALITY,
};
pub use chat::{
    ChatError, ChatMessage, ChatResult, ChatTurnController, ChatTurnState, GREETING, MessageId,
    PendingReply, REPLY_FAILED, Sender,
};
pub use dashboard::{AdminSection, AuthPage, DashboardView, NavigationState, Page, select_page};
pub use error::{MediaAcquisitionError, ValidationError, ValidationResult};
pub use media::{Frame, MediaResult, MediaSource, VideoConstraints, VideoStream};
pub use upload::{SelectedFile, UploadPolicy, mime_type_for_name};
