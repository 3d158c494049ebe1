use serde::{Deserialize, Serialize};

pub use crate::payload::RequestId;

pub type AppId = String;
pub type AppIdConst = &'static str;

/// Source or destination of a frame: `sender-0`, `receiver-0`, or an app transport id.
pub type EndpointId = String;
pub type EndpointIdConst = &'static str;

/// Destination used by receivers for messages addressed to every sender.
pub const ENDPOINT_BROADCAST: EndpointIdConst = "*";

pub type MessageType = String;
pub type MessageTypeConst = &'static str;

pub type Namespace = String;
pub type NamespaceConst = &'static str;

/// Receiver-assigned id scoping playback commands to one load.
pub type MediaSessionId = i32;

/// Id of a running receiver application session.
pub type SessionId = String;

/// A running receiver application we hold a virtual connection to.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AppSession {
    /// Destination for messages to the platform receiver (`receiver-0`).
    pub receiver_destination_id: EndpointId,

    /// Destination for messages to the application (its transport id).
    pub app_destination_id: EndpointId,

    pub session_id: SessionId,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MediaSession {
    #[serde(flatten)]
    pub app_session: AppSession,

    pub media_session_id: MediaSessionId,
}

impl MediaSession {
    pub fn app_destination_id(&self) -> &EndpointId {
        &self.app_session.app_destination_id
    }
}
