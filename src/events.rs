//! Events published by the orchestrator for passive observers.

use crate::{
    payload::media::PlayerState,
    playlist::{FileId, Playlist, PlaylistId},
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// User-facing message kinds.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerMessage {
    ConnectionInProgress,
    ErrorLoadingFile,
    FileNotFound,
    FileNotSupported,
    TranscodeError,
    NoDevicesFound,
    PlaylistNotFound,
    InvalidRequest,
    NoActiveSession,
    ConnectionLost,
    Cancelled,
    UnknownError,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
#[non_exhaustive]
pub enum PlayerEvent {
    FileLoading {
        playlist_id: PlaylistId,
        file_id: FileId,
    },
    FileLoaded {
        playlist_id: PlaylistId,
        file_id: FileId,
        duration: Option<f64>,
    },
    StatusChanged {
        player_state: PlayerState,
        current_time: f64,
        played_percentage: f64,
    },
    PlaylistChanged(Playlist),
    FileEndReached {
        playlist_id: PlaylistId,
        file_id: FileId,
    },
    DeviceDisconnected {
        reason: String,
    },
    ServerMessage {
        kind: ServerMessage,
    },
}

impl PlayerEvent {
    pub fn server_message(kind: ServerMessage) -> PlayerEvent {
        PlayerEvent::ServerMessage { kind }
    }
}

/// Fan-out of [`PlayerEvent`]s. Publishing never blocks; slow subscribers
/// miss events instead.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    pub fn new() -> EventBus {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        EventBus { tx }
    }

    pub fn publish(&self, event: PlayerEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    pub fn stream(&self) -> impl Stream<Item = PlayerEvent> + Send {
        BroadcastStream::new(self.subscribe())
            .filter_map(|res| async move {
                match res {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(count)) => {
                        tracing::warn!(count, "event subscriber lagged");
                        None
                    },
                }
            })
    }
}

impl Default for EventBus {
    fn default() -> EventBus {
        EventBus::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(PlayerEvent::server_message(ServerMessage::NoDevicesFound));

        let mut rx = bus.subscribe();
        bus.publish(PlayerEvent::DeviceDisconnected { reason: "eof".into() });
        assert_eq!(rx.recv().await.unwrap(),
                   PlayerEvent::DeviceDisconnected { reason: "eof".into() });
    }

    #[test]
    fn serializes_tagged() {
        let json = serde_json::to_value(PlayerEvent::FileEndReached { playlist_id: 1,
                                                                      file_id: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "fileEndReached",
                                            "playlistId": 1, "fileId": 2}));

        let json = serde_json::to_value(
            PlayerEvent::server_message(ServerMessage::FileNotFound)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "serverMessage", "kind": "fileNotFound"}));
    }
}
