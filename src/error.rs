use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Setup steps of a PipeWire session, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    MainLoop,
    Context,
    Core,
    Registry,
    Sync,
    Thread,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::MainLoop => "main loop",
            Stage::Context => "context",
            Stage::Core => "core connection",
            Stage::Registry => "registry",
            Stage::Sync => "initial sync",
            Stage::Thread => "loop thread",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("PipeWire {stage} setup failed: {message}")]
    Connection { stage: Stage, message: String },
    #[error("PipeWire did not finish the initial handshake within {0:?}")]
    ConnectTimeout(Duration),
    #[error("PipeWire loop thread is gone")]
    LoopThreadGone,
    #[error("volume must be a finite number, got {0}")]
    InvalidVolume(f32),
    #[error("failed to encode device list: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn connection(stage: Stage, message: impl ToString) -> Self {
        Error::Connection {
            stage,
            message: message.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_message() {
        let err = Error::connection(Stage::Core, "Host is down");
        assert_eq!(
            err.to_string(),
            "PipeWire core connection setup failed: Host is down"
        );
    }

    #[test]
    fn test_json_failure_converts_to_encode() {
        let json_err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Encode(_)));
        assert!(err.to_string().starts_with("failed to encode device list"));
    }
}
