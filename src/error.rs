//! Error taxonomy shared by the server and client halves

use std::io;

pub type Result<T> = std::result::Result<T, LinkError>;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Connect/read/write failure or peer reset
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// Missing separator, unexpected line shape, wrong handshake step or secret
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Unknown command/field or a handler that failed
    #[error("{0}")]
    Dispatch(String),
    /// Payload carried the in-band error marker; kept verbatim
    #[error("{0}")]
    Remote(String),
    /// Port, challenge file, working directory
    #[error("resource error: {0}")]
    Resource(String),
    #[error("a listener on port {0} was already started in this process")]
    PortInUse(u16),
    #[error("expected {expected} values but instead retrieved {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("request \"{request}\" returned \"{response}\"")]
    UnexpectedResponse { request: String, response: String },
    #[error("file transfer failed: {0}")]
    Transfer(String),
    #[error("not connected")]
    NotConnected,
}

impl LinkError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        LinkError::Protocol(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        LinkError::Resource(msg.into())
    }
}

/// Outcome of a session exchange that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Failure inside a session exchange, split by what the session loop must do next.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Report to the peer (when the command is known) and keep reading lines.
    #[error("{error}")]
    Recoverable {
        command: Option<String>,
        #[source]
        error: LinkError,
    },
    /// Report if possible, then drop the connection.
    #[error("{error}")]
    Fatal {
        command: Option<String>,
        #[source]
        error: LinkError,
    },
}

impl SessionError {
    pub fn recoverable(command: Option<&str>, error: LinkError) -> Self {
        SessionError::Recoverable {
            command: command.map(str::to_string),
            error,
        }
    }

    pub fn fatal(command: Option<&str>, error: LinkError) -> Self {
        SessionError::Fatal {
            command: command.map(str::to_string),
            error,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Fatal { .. })
    }

    pub fn command(&self) -> Option<&str> {
        match self {
            SessionError::Recoverable { command, .. } | SessionError::Fatal { command, .. } => {
                command.as_deref()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_mismatch_names_both_counts() {
        let e = LinkError::CountMismatch {
            expected: 3,
            actual: 2,
        };
        let msg = e.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains('2'));
    }

    #[test]
    fn session_error_keeps_command() {
        let e = SessionError::recoverable(Some("Ping"), LinkError::Dispatch("boom".into()));
        assert!(!e.is_fatal());
        assert_eq!(e.command(), Some("Ping"));
        assert_eq!(e.to_string(), "boom");

        let e = SessionError::fatal(None, LinkError::protocol("bad step"));
        assert!(e.is_fatal());
        assert_eq!(e.command(), None);
    }
}
