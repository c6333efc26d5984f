use thiserror::Error;
use workflow::WorkflowError;

/// Failure taxonomy for the client: transport problems, expired sessions,
/// guard failures caught before any network call, and business-rule
/// rejections whose server message is surfaced verbatim.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not signed in")]
    NotSignedIn,
    #[error("session expired or unauthorized")]
    Unauthorized,
    #[error("backend rejected the request ({status}): {message}")]
    Api { status: u16, message: String },
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("only admins may delete revision requests")]
    AdminOnly,
    #[error("invalid attachment: {0}")]
    InvalidUpload(String),
    #[error("realtime channel: {0}")]
    Channel(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}
