use thiserror::Error;

/// Failures talking to the automation server. The display string is what the
/// operator sees in the error dialog.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No token available. Connect first.")]
    MissingToken,
    #[error("Token not found in response")]
    TokenNotInResponse,
    #[error("Could not reach the automation server at {0}.")]
    Unreachable(String),
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
    #[error("Error {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Unexpected error: {0}")]
    Transport(#[from] reqwest::Error),
}
