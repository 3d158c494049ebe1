//! Error type shared by the protocol engine and the playback orchestrator.

use crate::{
    events::ServerMessage,
    playlist::{FileId, PlaylistId},
};
use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A connect attempt is already underway.
    #[error("a connection attempt is already in progress")]
    ConnectionInProgress,

    #[error("error loading file `{mrl}`: {reason}")]
    ErrorLoadingFile { mrl: String, reason: String },

    #[error("file not found: `{0}`")]
    FileNotFound(String),

    /// No request generator handles this kind of file.
    #[error("file not supported: `{0}`")]
    FileNotSupported(String),

    #[error("probing `{mrl}` failed: {reason}")]
    ProbingFailed { mrl: String, reason: String },

    #[error("no devices found")]
    NoDevicesFound,

    #[error("playlist {0} not found")]
    PlaylistNotFound(PlaylistId),

    #[error("file {file_id} not found in playlist {playlist_id}")]
    PlaylistFileNotFound { playlist_id: PlaylistId, file_id: FileId },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A media command was issued with no cached media session.
    #[error("no active media session")]
    NoActiveSession,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Superseded by a newer request before it completed.
    #[error("cancelled")]
    Cancelled,

    /// The receiver answered with an error or with content we don't understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Protobuf(#[from] protobuf::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn connection_lost(reason: impl Into<String>) -> Error {
        Error::ConnectionLost(reason.into())
    }

    pub fn loading(mrl: impl Into<String>, reason: impl ToString) -> Error {
        Error::ErrorLoadingFile { mrl: mrl.into(), reason: reason.to_string() }
    }

    /// Failures after which any cached media session must be considered stale.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::ConnectionLost(_) | Error::Io(_))
    }

    /// User-facing message kind for this error.
    pub fn server_message(&self) -> ServerMessage {
        match self {
            Error::ConnectionInProgress => ServerMessage::ConnectionInProgress,
            Error::ErrorLoadingFile { .. } => ServerMessage::ErrorLoadingFile,
            Error::FileNotFound(_) => ServerMessage::FileNotFound,
            Error::FileNotSupported(_) => ServerMessage::FileNotSupported,
            Error::ProbingFailed { .. } => ServerMessage::TranscodeError,
            Error::NoDevicesFound => ServerMessage::NoDevicesFound,
            Error::PlaylistNotFound(_) => ServerMessage::PlaylistNotFound,
            Error::PlaylistFileNotFound { .. } => ServerMessage::FileNotFound,
            Error::InvalidRequest(_) => ServerMessage::InvalidRequest,
            Error::NoActiveSession => ServerMessage::NoActiveSession,
            Error::Timeout(_) | Error::ConnectionLost(_) | Error::Io(_) =>
                ServerMessage::ConnectionLost,
            Error::Cancelled => ServerMessage::Cancelled,
            Error::Protocol(_) | Error::Json(_) | Error::Protobuf(_) | Error::Other(_) =>
                ServerMessage::UnknownError,
        }
    }
}
