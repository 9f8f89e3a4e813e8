//! Error types for the nodcam orchestrator.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while orchestrating the camera, microphone, and reasoner.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Network or process hiccup that a retry may fix.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// An external call exceeded its allotted window and was abandoned.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The retry policy ran out of attempts; carries the final error.
    #[error("{label} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        label: String,
        attempts: u32,
        #[source]
        last: Box<CoreError>,
    },

    /// The digest handshake could not be parsed, or the device rejected the
    /// computed response. Terminal for that call; never retried with a new nonce.
    #[error("digest challenge failed: {0}")]
    AuthChallengeFailed(String),

    /// The stream closed (or the cutoff elapsed) without yielding any bytes.
    #[error("no data received from stream")]
    NoData,

    /// The extractor child process exited non-zero.
    #[error("extractor exited with status {code:?}: {stderr}")]
    Process { code: Option<i32>, stderr: String },

    /// The activity lock is held by another component. Callers skip or reject.
    #[error("activity lock busy: held by {0}")]
    ResourceBusy(&'static str),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("speech recognizer error: {0}")]
    Recognizer(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CoreError::Timeout(Duration::ZERO)
        } else {
            CoreError::TransientIo(err.to_string())
        }
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}
