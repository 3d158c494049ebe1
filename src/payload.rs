//! JSON payloads carried inside frames, grouped by channel namespace.

use crate::{
    error::{Error, Result},
    types::{AppId, AppSession, EndpointId, MediaSessionId, MessageType, MessageTypeConst,
            NamespaceConst, SessionId},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::{
    borrow::Cow,
    fmt::{self, Debug, Display},
    sync::atomic::{AtomicI32, Ordering},
};

/// i32 that correlates a request with its response.
///
/// Zero is only used in broadcast responses with no corresponding request.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct RequestId(i32);

pub(crate) struct RequestIdGen(AtomicI32);

impl RequestId {
    pub const BROADCAST: RequestId = RequestId(Self::BROADCAST_I32);
    const BROADCAST_I32: i32 = 0;
}

impl RequestIdGen {
    /// Some broadcasts have `request_id` 0, so skip that.
    const INITIAL_I32: i32 = RequestId::BROADCAST_I32 + 1;
}

/// Envelope common to every JSON payload: `{"type": .., "requestId": .., ...inner}`.
#[skip_serializing_none]
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload<T>
{
    pub request_id: Option<RequestId>,

    #[serde(rename = "type")]
    pub typ: MessageType,

    #[serde(flatten)]
    pub inner: T,
}

/// Just the envelope fields, used to route a frame before its type is known.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayloadHeader {
    #[serde(default)]
    request_id: Option<RequestId>,

    #[serde(rename = "type")]
    typ: MessageType,
}

/// A received payload whose concrete type is decided by its receiver.
#[derive(Clone, Debug)]
pub struct PayloadDyn {
    pub request_id: Option<RequestId>,
    pub typ: MessageType,

    /// The whole JSON object, envelope fields included.
    pub value: serde_json::Value,
}

pub trait RequestInner: Debug + Serialize + Send
{
    const CHANNEL_NAMESPACE: NamespaceConst;
    const TYPE_NAME: MessageTypeConst;
}

pub trait ResponseInner: Debug + DeserializeOwned
{
    const CHANNEL_NAMESPACE: NamespaceConst;
    const TYPE_NAMES: &'static [MessageTypeConst];
}

pub const USER_AGENT: &str = concat!("castplay/", env!("CARGO_PKG_VERSION"));


impl RequestId {
    pub fn inner(self) -> i32 {
        self.0
    }

    fn rpc_id_from(n: i32) -> RequestId {
        let id = RequestId(n);

        if id.is_broadcast() {
            panic!("RequestId::rpc_id_from: was broadcast = {id}");
        }

        id
    }

    pub fn is_broadcast(self) -> bool {
        self == RequestId::BROADCAST
    }

    pub fn is_rpc(self) -> bool {
        self != RequestId::BROADCAST
    }
}

impl From<RequestId> for i32 {
    fn from(id: RequestId) -> i32 {
        id.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl RequestIdGen {
    pub(crate) fn new() -> RequestIdGen {
        RequestIdGen(AtomicI32::new(Self::INITIAL_I32))
    }

    pub(crate) fn take_next(&self) -> RequestId {
        loop {
            let id = self.0.fetch_add(1, Ordering::SeqCst);
            if id == RequestId::BROADCAST_I32 {
                // Receivers use 0 for broadcast messages, take the next value.
                continue;
            }

            return RequestId::rpc_id_from(id);
        }
    }
}

impl PayloadDyn {
    pub fn parse(json: &str) -> Result<PayloadDyn> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let header: PayloadHeader = serde_json::from_value(value.clone())?;

        Ok(PayloadDyn {
            request_id: header.request_id,
            typ: header.typ,
            value,
        })
    }

    /// Correlation id, when this payload answers a request.
    pub fn rpc_request_id(&self) -> Option<RequestId> {
        self.request_id.filter(|id| id.is_rpc())
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

pub mod connection {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.tp.connection";

    pub const MESSAGE_TYPE_CONNECT: MessageTypeConst = "CONNECT";
    pub const MESSAGE_TYPE_CLOSE: MessageTypeConst = "CLOSE";

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ConnectRequest {
        pub user_agent: String,
    }

    impl RequestInner for ConnectRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_CONNECT;
    }

    #[derive(Debug, Serialize)]
    pub struct CloseRequest {}

    impl RequestInner for CloseRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_CLOSE;
    }
}

pub mod heartbeat {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.tp.heartbeat";

    pub const MESSAGE_TYPE_PING: MessageTypeConst = "PING";
    pub const MESSAGE_TYPE_PONG: MessageTypeConst = "PONG";

    #[derive(Debug, Serialize)]
    pub struct Ping {}

    impl RequestInner for Ping {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_PING;
    }

    #[derive(Debug, Serialize)]
    pub struct Pong {}

    impl RequestInner for Pong {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_PONG;
    }
}

pub mod receiver {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.receiver";

    pub const MESSAGE_REQUEST_TYPE_LAUNCH: MessageTypeConst = "LAUNCH";
    pub const MESSAGE_REQUEST_TYPE_STOP: MessageTypeConst = "STOP";
    pub const MESSAGE_REQUEST_TYPE_GET_STATUS: MessageTypeConst = "GET_STATUS";
    pub const MESSAGE_REQUEST_TYPE_SET_VOLUME: MessageTypeConst = "SET_VOLUME";

    pub const MESSAGE_RESPONSE_TYPE_RECEIVER_STATUS: MessageTypeConst = "RECEIVER_STATUS";
    pub const MESSAGE_RESPONSE_TYPE_LAUNCH_ERROR: MessageTypeConst = "LAUNCH_ERROR";
    pub const MESSAGE_RESPONSE_TYPE_INVALID_REQUEST: MessageTypeConst = "INVALID_REQUEST";

    #[derive(Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StatusWrapper {
        pub status: Status,
    }

    /// Receiver state. Replaced wholesale on every push, never merged.
    #[derive(Clone, Debug, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Status {
        #[serde(default)]
        pub applications: Vec<Application>,

        #[serde(default)]
        pub is_active_input: bool,

        #[serde(default)]
        pub is_stand_by: bool,

        /// Volume parameters of the currently active cast device.
        #[serde(default)]
        pub volume: Volume,
    }

    #[derive(Clone, Debug, Default, Deserialize, Serialize)]
    #[serde(default, rename_all = "camelCase")]
    pub struct Application {
        pub app_id: AppId,
        pub session_id: SessionId,
        pub transport_id: EndpointId,
        pub namespaces: Vec<AppNamespace>,
        pub display_name: String,
        pub status_text: String,
        pub is_idle_screen: bool,
    }

    impl Application {
        pub fn has_namespace(&self, ns: &str) -> bool {
            self.namespaces.iter().any(|app_ns| app_ns == ns)
        }

        pub fn to_app_session(&self, receiver_destination_id: EndpointId) -> AppSession {
            AppSession {
                receiver_destination_id,
                app_destination_id: self.transport_id.clone(),
                session_id: self.session_id.clone(),
            }
        }
    }

    #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
    pub struct AppNamespace {
        pub name: Cow<'static, str>,
    }

    impl From<&str> for AppNamespace {
        fn from(s: &str) -> AppNamespace {
            AppNamespace { name: Cow::Owned(s.to_string()) }
        }
    }

    impl PartialEq<str> for AppNamespace {
        fn eq(&self, other: &str) -> bool {
            self.name == other
        }
    }

    impl PartialEq<AppNamespace> for str {
        fn eq(&self, other: &AppNamespace) -> bool {
            self == other.name
        }
    }

    /// Device volume. In requests, `None` fields are left out of the wire message
    /// so the receiver keeps their current value.
    #[skip_serializing_none]
    #[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Volume {
        /// Volume level in `[0.0, 1.0]`.
        pub level: Option<f32>,
        pub muted: Option<bool>,

        pub control_type: Option<String>,
        pub step_interval: Option<f32>,
    }

    #[derive(Debug, Serialize)]
    pub struct GetStatusRequest {}

    impl RequestInner for GetStatusRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_STATUS;
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LaunchRequest {
        pub app_id: AppId,
    }

    impl RequestInner for LaunchRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_LAUNCH;
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StopRequest {
        pub session_id: SessionId,
    }

    impl RequestInner for StopRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_STOP;
    }

    #[derive(Debug, Serialize)]
    pub struct SetVolumeRequest {
        pub volume: Volume,
    }

    impl RequestInner for SetVolumeRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_SET_VOLUME;
    }

    /// Reply to any receiver namespace request.
    #[derive(Debug, Deserialize)]
    #[serde(tag = "type")]
    pub enum Response {
        #[serde(rename = "RECEIVER_STATUS")]
        Ok(StatusWrapper),

        #[serde(rename = "LAUNCH_ERROR")]
        LaunchError {
            #[serde(default)]
            reason: Option<String>,
        },

        #[serde(rename = "INVALID_REQUEST")]
        InvalidRequest {
            #[serde(default)]
            reason: Option<String>,
        },
    }

    impl ResponseInner for Response {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAMES: &'static [MessageTypeConst] = &[
            MESSAGE_RESPONSE_TYPE_RECEIVER_STATUS,
            MESSAGE_RESPONSE_TYPE_LAUNCH_ERROR,
            MESSAGE_RESPONSE_TYPE_INVALID_REQUEST,
        ];
    }

    impl Response {
        pub fn into_status(self, request_type: MessageTypeConst) -> Result<Status> {
            match self {
                Response::Ok(StatusWrapper { status }) => Ok(status),
                Response::LaunchError { reason } =>
                    Err(Error::Protocol(format!("{request_type}: LAUNCH_ERROR {reason:?}"))),
                Response::InvalidRequest { reason } =>
                    Err(Error::Protocol(format!("{request_type}: INVALID_REQUEST {reason:?}"))),
            }
        }
    }

    pub mod small_debug {
        use super::*;

        pub struct ReceiverStatus<'a>(pub &'a super::Status);
        pub struct Applications<'a>(pub &'a [super::Application]);
        pub struct Volume<'a>(pub &'a super::Volume);

        impl<'a> Debug for ReceiverStatus<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_struct("receiver::Status")
                    .field("applications", &Applications(&self.0.applications))
                    .field("volume", &Volume(&self.0.volume))
                    .finish()
            }
        }

        impl<'a> Debug for Applications<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let mut d = f.debug_list();
                for app in self.0 {
                    d.entry(&format_args!("{} ({})", app.display_name, app.session_id));
                }
                d.finish()
            }
        }

        impl<'a> Debug for Volume<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "Volume {{ level: {level}, muted: {muted} }}",
                       level = match self.0.level {
                           None => "None".to_string(),
                           Some(l) => format!("{l:.2}"),
                       },
                       muted = match self.0.muted {
                           None => "None".to_string(),
                           Some(m) => format!("{m}"),
                       })
            }
        }
    }
}

pub mod media {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.media";

    pub const MESSAGE_REQUEST_TYPE_GET_STATUS: MessageTypeConst = "GET_STATUS";
    pub const MESSAGE_REQUEST_TYPE_LOAD: MessageTypeConst = "LOAD";
    pub const MESSAGE_REQUEST_TYPE_PLAY: MessageTypeConst = "PLAY";
    pub const MESSAGE_REQUEST_TYPE_PAUSE: MessageTypeConst = "PAUSE";
    pub const MESSAGE_REQUEST_TYPE_STOP: MessageTypeConst = "STOP";
    pub const MESSAGE_REQUEST_TYPE_SEEK: MessageTypeConst = "SEEK";

    pub const MESSAGE_RESPONSE_TYPE_MEDIA_STATUS: MessageTypeConst = "MEDIA_STATUS";
    pub const MESSAGE_RESPONSE_TYPE_LOAD_CANCELLED: MessageTypeConst = "LOAD_CANCELLED";
    pub const MESSAGE_RESPONSE_TYPE_LOAD_FAILED: MessageTypeConst = "LOAD_FAILED";
    pub const MESSAGE_RESPONSE_TYPE_INVALID_PLAYER_STATE: MessageTypeConst
        = "INVALID_PLAYER_STATE";
    pub const MESSAGE_RESPONSE_TYPE_INVALID_REQUEST: MessageTypeConst = "INVALID_REQUEST";

    pub const IDLE_REASON_FINISHED: &str = "FINISHED";
    pub const IDLE_REASON_ERROR: &str = "ERROR";

    pub const METADATA_TYPE_GENERIC: u32 = 0;
    pub const METADATA_TYPE_MUSIC_TRACK: u32 = 3;

    #[derive(Clone, Debug, Default, Deserialize, Serialize)]
    pub struct Status {
        #[serde(rename = "status", default)]
        pub entries: Vec<StatusEntry>,
    }

    #[skip_serializing_none]
    #[derive(Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StatusEntry {
        pub media_session_id: MediaSessionId,

        pub media: Option<Media>,

        #[serde(default)]
        pub playback_rate: f32,
        pub player_state: PlayerState,
        pub idle_reason: Option<String>,
        pub current_time: Option<f64>,

        #[serde(default)]
        pub supported_media_commands: u32,

        pub active_track_ids: Option<Vec<TrackId>>,
    }

    impl StatusEntry {
        pub fn is_finished(&self) -> bool {
            self.player_state == PlayerState::Idle
                && self.idle_reason.as_deref() == Some(IDLE_REASON_FINISHED)
        }

        pub fn is_error(&self) -> bool {
            self.player_state == PlayerState::Idle
                && self.idle_reason.as_deref() == Some(IDLE_REASON_ERROR)
        }
    }

    #[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum PlayerState {
        Idle,
        Playing,
        Paused,
        Buffering,
        Loading,

        #[serde(other)]
        Unknown,
    }

    #[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum StreamType {
        #[default]
        Buffered,
        Live,
        None,
    }

    pub type TrackId = i32;

    #[skip_serializing_none]
    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Media {
        pub content_id: String,

        #[serde(default)]
        pub stream_type: StreamType,

        pub content_type: String,

        pub metadata: Option<Metadata>,

        /// Seconds. `None` for live streams or when unknown.
        pub duration: Option<f64>,

        pub tracks: Option<Vec<Track>>,

        #[serde(default, skip_serializing_if = "CustomData::is_null")]
        pub custom_data: CustomData,
    }

    #[skip_serializing_none]
    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Metadata {
        pub metadata_type: u32,
        pub title: Option<String>,
        pub subtitle: Option<String>,
        pub artist: Option<String>,
        pub album_name: Option<String>,

        #[serde(default)]
        pub images: Vec<Image>,
    }

    impl Metadata {
        pub fn new(metadata_type: u32) -> Metadata {
            Metadata {
                metadata_type,
                title: None,
                subtitle: None,
                artist: None,
                album_name: None,
                images: Vec::new(),
            }
        }
    }

    #[skip_serializing_none]
    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    pub struct Image {
        pub url: String,
        pub width: Option<u32>,
        pub height: Option<u32>,
    }

    #[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum TrackType {
        Text,
        Audio,
        Video,
    }

    #[skip_serializing_none]
    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Track {
        pub track_id: TrackId,

        #[serde(rename = "type")]
        pub typ: TrackType,

        pub track_content_id: Option<String>,
        pub track_content_type: Option<String>,
        pub subtype: Option<String>,
        pub language: Option<String>,
        pub name: Option<String>,
    }

    #[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
    pub struct CustomData(pub serde_json::Value);

    impl CustomData {
        pub fn new() -> CustomData {
            CustomData(serde_json::Value::Null)
        }

        pub fn is_null(&self) -> bool {
            self.0.is_null()
        }
    }

    #[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum ResumeState {
        PlaybackStart,
        PlaybackPause,
    }

    #[skip_serializing_none]
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LoadRequest {
        pub session_id: SessionId,

        pub media: Media,
        pub current_time: f64,
        pub autoplay: bool,

        pub active_track_ids: Option<Vec<TrackId>>,

        #[serde(skip_serializing_if = "CustomData::is_null")]
        pub custom_data: CustomData,
    }

    impl RequestInner for LoadRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_LOAD;
    }

    #[skip_serializing_none]
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetStatusRequest {
        pub media_session_id: Option<MediaSessionId>,
    }

    impl RequestInner for GetStatusRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_STATUS;
    }

    #[skip_serializing_none]
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SeekRequest {
        pub media_session_id: MediaSessionId,
        pub current_time: f64,
        pub resume_state: Option<ResumeState>,
    }

    impl RequestInner for SeekRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_SEEK;
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MediaRequestCommon {
        pub media_session_id: MediaSessionId,
    }

    macro_rules! simple_media_request {
        ($name: ident, $msg_type_name: path) => {
            #[derive(Debug, Serialize)]
            pub struct $name(pub MediaRequestCommon);

            impl RequestInner for $name {
                const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
                const TYPE_NAME: MessageTypeConst = $msg_type_name;
            }
        };
    }

    simple_media_request!(PlayRequest,  MESSAGE_REQUEST_TYPE_PLAY);
    simple_media_request!(PauseRequest, MESSAGE_REQUEST_TYPE_PAUSE);
    simple_media_request!(StopRequest,  MESSAGE_REQUEST_TYPE_STOP);

    /// Reply to any media namespace request.
    #[derive(Debug, Deserialize)]
    #[serde(tag = "type")]
    pub enum Response {
        #[serde(rename = "MEDIA_STATUS")]
        Ok(Status),

        #[serde(rename = "LOAD_CANCELLED")]
        LoadCancelled,

        #[serde(rename = "LOAD_FAILED")]
        LoadFailed,

        #[serde(rename = "INVALID_PLAYER_STATE")]
        InvalidPlayerState,

        #[serde(rename = "INVALID_REQUEST")]
        InvalidRequest {
            #[serde(default)]
            reason: Option<String>,
        },
    }

    impl ResponseInner for Response {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAMES: &'static [MessageTypeConst] = &[
            MESSAGE_RESPONSE_TYPE_MEDIA_STATUS,
            MESSAGE_RESPONSE_TYPE_LOAD_CANCELLED,
            MESSAGE_RESPONSE_TYPE_LOAD_FAILED,
            MESSAGE_RESPONSE_TYPE_INVALID_PLAYER_STATE,
            MESSAGE_RESPONSE_TYPE_INVALID_REQUEST,
        ];
    }

    impl Response {
        pub fn into_status(self, request_type: MessageTypeConst) -> Result<Status> {
            let kind = match self {
                Response::Ok(status) => return Ok(status),
                Response::LoadCancelled => MESSAGE_RESPONSE_TYPE_LOAD_CANCELLED.to_string(),
                Response::LoadFailed => MESSAGE_RESPONSE_TYPE_LOAD_FAILED.to_string(),
                Response::InvalidPlayerState =>
                    MESSAGE_RESPONSE_TYPE_INVALID_PLAYER_STATE.to_string(),
                Response::InvalidRequest { reason } =>
                    format!("{MESSAGE_RESPONSE_TYPE_INVALID_REQUEST} {reason:?}"),
            };

            Err(Error::Protocol(format!("{request_type}: {kind}")))
        }
    }

    pub mod small_debug {
        use crate::util::fmt::{opt_field, DebugInline};
        use super::*;

        pub struct MediaStatus<'a>(pub &'a super::Status);
        pub struct MediaStatusEntry<'a>(pub &'a super::StatusEntry);
        pub struct Media<'a>(pub &'a super::Media);

        impl<'a> Debug for MediaStatus<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let mut d = f.debug_list();
                for entry in self.0.entries.iter() {
                    d.entry(&MediaStatusEntry(entry));
                }
                d.finish()
            }
        }

        impl<'a> Debug for MediaStatusEntry<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                // `DebugInline` overrides `{:#?}` to keep scalar options on one line.
                let mut s = f.debug_struct("MediaStatusEntry");
                s.field("media_session_id", &self.0.media_session_id)
                 .field("player_state", &self.0.player_state)
                 .field("current_time",
                        &DebugInline(&format!("{:?}", &self.0.current_time)));
                opt_field(&mut s, "idle_reason", &self.0.idle_reason);
                s.field("media", &self.0.media.as_ref().map(Media))
                 .finish()
            }
        }

        impl<'a> Debug for Media<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_struct("Media")
                    .field("content_id", &self.0.content_id)
                    .field("stream_type", &self.0.stream_type)
                    .field("content_type", &self.0.content_type)
                    .field("duration", &DebugInline(&format!("{:?}", &self.0.duration)))
                    .finish()
            }
        }
    }
}
