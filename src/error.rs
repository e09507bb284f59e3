//! The error taxonomy shared by every part of Rollout.

use std::io;

/// A specialized [Result](std::result::Result) for Rollout operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while running actions.
///
/// None of these errors is retried anywhere in the library. A failing step aborts the composite
/// action that contains it, and the failure travels up to the binary, which closes every open
/// connection before exiting.
///
/// Note that an action that does not apply to an entity in its current state is not an error;
/// see [crate::core::action::Resolution::NotApplicable].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The remote host rejected our credentials.
    #[error("authentication failed for {destination}: {reason}")]
    Authentication { destination: String, reason: String },

    /// The transport to a remote host could not be set up or broke down.
    #[error("connection to {destination} failed: {reason}")]
    Connection { destination: String, reason: String },

    /// A command run on a remote host exited with a non-zero status.
    #[error("remote command exited with status {status}: {command}")]
    RemoteCommandFailed { command: String, status: i32 },

    /// A command run on the control host exited with a non-zero status or was killed.
    ///
    /// `status` is [None] if the process was terminated by a signal.
    #[error("local command exited with {}: {argv}", describe_status(.status))]
    LocalCommandFailed { argv: String, status: Option<i32> },

    /// Copying a file to a remote host failed.
    #[error("could not upload {local} to {remote}: {reason}")]
    Transfer {
        local: String,
        remote: String,
        reason: String,
    },

    /// Something tried to reach a remote host while remote access is disabled.
    #[error("this action is not available in offline mode (needs {destination})")]
    OfflineModeViolation { destination: String },

    /// The configuration could not be loaded or is malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// No entity kind has this name.
    #[error("unexpected \"{0}\" module")]
    UnknownKind(String),

    /// No entity of this kind has this name.
    #[error("\"{kind}\" module got unexpected \"{name}\" item")]
    UnknownEntity { kind: String, name: String },

    /// The entity does not offer this action in its current state.
    #[error("\"{kind}\" module got unexpected \"{action}\" action")]
    UnexpectedAction { kind: String, action: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(i) => format!("exit code {i}"),
        None => "error".to_string(),
    }
}

impl Error {
    /// Shorthand for building an [Error::Config].
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }
}
