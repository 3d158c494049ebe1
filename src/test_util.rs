//! In-process fakes for tests: a scripted receiver on a duplex pipe and mock collaborators.

use async_trait::async_trait;
use crate::{
    config::DeviceConfig,
    error::{Error, Result},
    logging::{self, LogMode},
    media::{
        probe::{AudioStream, BasicMedia, FullMedia, MediaProber, ProbedInfo, RemoteDecoder,
                SubtitleStream, VideoStream},
        HwAccelKind,
    },
    message::Frame,
    payload::{connection, heartbeat, media, receiver},
    transport::FrameCodec,
};
use futures::{SinkExt, StreamExt};
use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    io::DuplexStream,
    sync::{mpsc, Notify},
};
use tokio_util::codec::Framed;

pub const APP_SESSION_ID: &str = "session-1";
pub const APP_TRANSPORT_ID: &str = "transport-1";

const DUPLEX_BUFFER_LEN: usize = 256 * 1024;

/// Initialise logging once per test binary; honours `RUST_LOG`.
pub fn ensure_init() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        let _ = logging::init(LogMode::Pretty);
    });
}

pub fn device_config() -> DeviceConfig {
    DeviceConfig::new(([127, 0, 0, 1], crate::config::DEFAULT_PORT).into())
}

/// Handle to a scripted receiver task.
///
/// Dropping the handle closes the receiver's end of the pipe.
pub struct FakeReceiver {
    state: Arc<Mutex<FakeState>>,
    notify: Arc<Notify>,
    cmd_tx: mpsc::UnboundedSender<FakeCmd>,
}

struct FakeState {
    received: Vec<Frame>,

    /// Request types left unanswered.
    silent: HashSet<String>,

    answer_pings: bool,

    launched: bool,
    volume_level: f64,
    muted: bool,

    /// 0 until the first LOAD.
    media_session_id: i64,
    player_state: &'static str,
    current_time: f64,
    media: Value,
}

enum FakeCmd {
    Push(Frame),
    Drop,
}

impl FakeReceiver {
    /// Returns the sender's end of the pipe and a handle to the receiver task.
    pub fn spawn() -> (DuplexStream, FakeReceiver) {
        let (sender_end, receiver_end) = tokio::io::duplex(DUPLEX_BUFFER_LEN);

        let state = Arc::new(Mutex::new(FakeState {
            received: Vec::new(),
            silent: HashSet::new(),
            answer_pings: true,
            launched: false,
            volume_level: 0.5,
            muted: false,
            media_session_id: 0,
            player_state: "IDLE",
            current_time: 0.0,
            media: Value::Null,
        }));
        let notify = Arc::new(Notify::new());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        tokio::spawn(run(receiver_end, Arc::clone(&state), Arc::clone(&notify), cmd_rx));

        (sender_end, FakeReceiver { state, notify, cmd_tx })
    }

    pub fn set_silent(&self, typ: &str, silent: bool) {
        let mut state = self.state.lock().unwrap();
        if silent {
            state.silent.insert(typ.to_string());
        } else {
            state.silent.remove(typ);
        }
    }

    pub fn set_answer_pings(&self, answer: bool) {
        self.state.lock().unwrap().answer_pings = answer;
    }

    /// Pretend the media app is already running.
    pub fn set_launched(&self, launched: bool) {
        self.state.lock().unwrap().launched = launched;
    }

    pub fn received(&self) -> Vec<Frame> {
        self.state.lock().unwrap().received.clone()
    }

    /// `type` of every JSON frame received on `namespace`, in order.
    pub fn received_types(&self, namespace: &str) -> Vec<String> {
        self.received_json(namespace).iter()
            .filter_map(|v| v["type"].as_str().map(str::to_string))
            .collect()
    }

    pub fn received_json(&self, namespace: &str) -> Vec<Value> {
        self.received().iter()
            .filter(|f| f.namespace == namespace)
            .filter_map(|f| f.payload_str().and_then(|s| serde_json::from_str(s).ok()))
            .collect()
    }

    pub fn request_ids(&self, namespace: &str) -> Vec<i64> {
        self.received_json(namespace).iter()
            .filter_map(|v| v["requestId"].as_i64())
            .collect()
    }

    pub fn count_type(&self, namespace: &str, typ: &str) -> usize {
        self.received_types(namespace).iter().filter(|t| *t == typ).count()
    }

    /// Wait until a frame with `type == typ` has been received.
    pub async fn wait_for_type(&self, typ: &str) {
        self.wait_for_count(typ, 1).await
    }

    pub async fn wait_for_count(&self, typ: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                let notified = self.notify.notified();
                let seen = self.received().iter()
                    .filter_map(|f| f.payload_str()
                                     .and_then(|s| serde_json::from_str::<Value>(s).ok()))
                    .filter(|v| v["type"] == typ)
                    .count();
                if seen >= count {
                    return;
                }
                notified.await;
            }
        }).await.expect("wait_for_count timed out");
    }

    pub fn push_json(&self, namespace: &str, source: &str, destination: &str, payload: Value) {
        let frame = Frame {
            namespace: namespace.to_string(),
            source: source.to_string(),
            destination: destination.to_string(),
            payload: payload.to_string().into(),
        };
        let _ = self.cmd_tx.send(FakeCmd::Push(frame));
    }

    /// Broadcast a media status for the current media session.
    pub fn push_media_status(&self, player_state: &'static str,
                             idle_reason: Option<&str>, current_time: f64)
    {
        let payload = {
            let mut state = self.state.lock().unwrap();
            state.player_state = player_state;
            state.current_time = current_time;
            let mut status = state.media_status(0);
            if let Some(reason) = idle_reason {
                status["status"][0]["idleReason"] = json!(reason);
            }
            status
        };

        self.push_json(media::CHANNEL_NAMESPACE, APP_TRANSPORT_ID, "*", payload);
    }

    pub fn push_close(&self, source: &str) {
        self.push_json(connection::CHANNEL_NAMESPACE, source, "sender-0",
                       json!({"type": connection::MESSAGE_TYPE_CLOSE}));
    }

    /// Close the pipe; the sender sees end of stream.
    pub fn drop_connection(&self) {
        let _ = self.cmd_tx.send(FakeCmd::Drop);
    }
}

impl FakeState {
    fn receiver_status(&self, request_id: i64) -> Value {
        let applications = if self.launched {
            json!([{
                "appId": crate::config::app::DEFAULT_MEDIA_RECEIVER,
                "sessionId": APP_SESSION_ID,
                "transportId": APP_TRANSPORT_ID,
                "displayName": "Default Media Receiver",
                "statusText": "",
                "namespaces": [
                    {"name": media::CHANNEL_NAMESPACE},
                    {"name": connection::CHANNEL_NAMESPACE},
                ],
            }])
        } else {
            json!([])
        };

        json!({
            "type": receiver::MESSAGE_RESPONSE_TYPE_RECEIVER_STATUS,
            "requestId": request_id,
            "status": {
                "applications": applications,
                "volume": {"level": self.volume_level, "muted": self.muted},
            },
        })
    }

    fn media_status(&self, request_id: i64) -> Value {
        let entries = if self.media_session_id == 0 {
            json!([])
        } else {
            json!([{
                "mediaSessionId": self.media_session_id,
                "playbackRate": 1,
                "playerState": self.player_state,
                "currentTime": self.current_time,
                "supportedMediaCommands": 15,
                "media": self.media,
            }])
        };

        json!({
            "type": media::MESSAGE_RESPONSE_TYPE_MEDIA_STATUS,
            "requestId": request_id,
            "status": entries,
        })
    }

    /// Reply payloads for one inbound frame.
    fn respond(&mut self, frame: &Frame) -> Vec<Value> {
        let Some(req) = frame.payload_str().and_then(|s| serde_json::from_str::<Value>(s).ok())
        else {
            return Vec::new();
        };

        let typ = req["type"].as_str().unwrap_or_default().to_string();
        let request_id = req["requestId"].as_i64().unwrap_or(0);

        if self.silent.contains(&typ) {
            return Vec::new();
        }

        match (frame.namespace.as_str(), typ.as_str()) {
            (heartbeat::CHANNEL_NAMESPACE, heartbeat::MESSAGE_TYPE_PING) if self.answer_pings =>
                vec![json!({"type": heartbeat::MESSAGE_TYPE_PONG})],

            (receiver::CHANNEL_NAMESPACE, "GET_STATUS") =>
                vec![self.receiver_status(request_id)],

            (receiver::CHANNEL_NAMESPACE, "LAUNCH") => {
                self.launched = true;
                vec![self.receiver_status(request_id)]
            },

            (receiver::CHANNEL_NAMESPACE, "STOP") => {
                self.launched = false;
                self.media_session_id = 0;
                vec![self.receiver_status(request_id)]
            },

            (receiver::CHANNEL_NAMESPACE, "SET_VOLUME") => {
                if let Some(level) = req["volume"]["level"].as_f64() {
                    self.volume_level = level;
                }
                if let Some(muted) = req["volume"]["muted"].as_bool() {
                    self.muted = muted;
                }
                vec![self.receiver_status(request_id)]
            },

            (media::CHANNEL_NAMESPACE, "LOAD") => {
                self.media_session_id += 1;
                self.player_state = if req["autoplay"].as_bool().unwrap_or(true) {
                    "PLAYING"
                } else {
                    "PAUSED"
                };
                self.current_time = req["currentTime"].as_f64().unwrap_or(0.0);
                self.media = req["media"].clone();
                vec![self.media_status(request_id)]
            },

            (media::CHANNEL_NAMESPACE, typ) if self.media_session_id != 0
                && req["mediaSessionId"].as_i64().is_some_and(|id| id != self.media_session_id) =>
            {
                vec![json!({
                    "type": media::MESSAGE_RESPONSE_TYPE_INVALID_REQUEST,
                    "requestId": request_id,
                    "reason": format!("{typ}: unknown media session"),
                })]
            },

            (media::CHANNEL_NAMESPACE, "PLAY") => {
                self.player_state = "PLAYING";
                vec![self.media_status(request_id)]
            },

            (media::CHANNEL_NAMESPACE, "PAUSE") => {
                self.player_state = "PAUSED";
                vec![self.media_status(request_id)]
            },

            (media::CHANNEL_NAMESPACE, "STOP") => {
                self.player_state = "IDLE";
                vec![self.media_status(request_id)]
            },

            (media::CHANNEL_NAMESPACE, "SEEK") => {
                self.current_time = req["currentTime"].as_f64().unwrap_or(self.current_time);
                vec![self.media_status(request_id)]
            },

            (media::CHANNEL_NAMESPACE, "GET_STATUS") =>
                vec![self.media_status(request_id)],

            _ => Vec::new(),
        }
    }
}

async fn run(conn: DuplexStream,
             state: Arc<Mutex<FakeState>>,
             notify: Arc<Notify>,
             mut cmd_rx: mpsc::UnboundedReceiver<FakeCmd>)
{
    let mut framed = Framed::new(conn, FrameCodec);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(FakeCmd::Push(frame)) => {
                    if framed.send(frame).await.is_err() {
                        return;
                    }
                },
                Some(FakeCmd::Drop) | None => return,
            },

            read = framed.next() => {
                let frame = match read {
                    Some(Ok(frame)) => frame,
                    _ => return,
                };

                let replies = {
                    let mut state = state.lock().unwrap();
                    let replies = state.respond(&frame);
                    state.received.push(frame.clone());
                    replies
                };
                notify.notify_waiters();

                for reply in replies {
                    let out = Frame {
                        namespace: frame.namespace.clone(),
                        source: frame.destination.clone(),
                        destination: frame.source.clone(),
                        payload: reply.to_string().into(),
                    };
                    if framed.send(out).await.is_err() {
                        return;
                    }
                }
            },
        }
    }
}

/// Prober serving canned results; unknown MRLs are `FileNotFound`.
#[derive(Default)]
pub struct MockProber {
    files: Mutex<HashMap<String, ProbedInfo>>,
    thumbnail: Mutex<Option<String>>,
    probes: AtomicUsize,

    /// Applied to every probe, for tests that cancel a build in flight.
    delay: Mutex<Option<Duration>>,
}

impl MockProber {
    pub fn new() -> Arc<MockProber> {
        Arc::new(MockProber::default())
    }

    pub fn add_file(&self, mrl: &str, info: ProbedInfo) {
        self.files.lock().unwrap().insert(mrl.to_string(), info);
    }

    pub fn remove_file(&self, mrl: &str) {
        self.files.lock().unwrap().remove(mrl);
    }

    pub fn set_thumbnail(&self, path: Option<&str>) {
        *self.thumbnail.lock().unwrap() = path.map(str::to_string);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaProber for MockProber {
    async fn get_file_info(&self, mrl: &str) -> Result<ProbedInfo> {
        self.probes.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.files.lock().unwrap().get(mrl).cloned()
            .ok_or_else(|| Error::FileNotFound(mrl.to_string()))
    }

    async fn get_thumbnail(&self, _mrl: &str) -> Option<String> {
        self.thumbnail.lock().unwrap().clone()
    }

    fn hw_accel_kind(&self, _stream_index: i32, _info: &ProbedInfo, enabled: bool)
    -> HwAccelKind
    {
        if enabled { HwAccelKind::Nvidia } else { HwAccelKind::None }
    }
}

/// Decoder for a fixed set of URLs.
#[derive(Default)]
pub struct MockDecoder {
    media: Mutex<HashMap<String, FullMedia>>,
    parses: Mutex<Vec<u32>>,
}

impl MockDecoder {
    pub fn new() -> Arc<MockDecoder> {
        Arc::new(MockDecoder::default())
    }

    pub fn add_url(&self, url: &str, media: FullMedia) {
        self.media.lock().unwrap().insert(url.to_string(), media);
    }

    /// Desired quality of every `parse` call so far.
    pub fn parsed_qualities(&self) -> Vec<u32> {
        self.parses.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteDecoder for MockDecoder {
    fn is_supported_url(&self, url: &str) -> bool {
        self.media.lock().unwrap().contains_key(url)
    }

    async fn parse_basic_info(&self, url: &str) -> Result<BasicMedia> {
        let media = self.media.lock().unwrap().get(url).cloned()
            .ok_or_else(|| Error::Protocol(format!("not parseable: {url}")))?;

        Ok(BasicMedia {
            url: url.to_string(),
            title: media.title,
            thumbnail_url: media.thumbnail_url,
            duration: media.duration,
        })
    }

    async fn parse(&self, basic: &BasicMedia, desired_quality: u32) -> Result<FullMedia> {
        self.parses.lock().unwrap().push(desired_quality);
        self.media.lock().unwrap().get(&basic.url).cloned()
            .ok_or_else(|| Error::Protocol(format!("not parseable: {}", basic.url)))
    }
}

/// One h264/aac video at index 0/1 with an English subtitle at index 2.
pub fn video_info(duration: f64) -> ProbedInfo {
    ProbedInfo {
        duration: Some(duration),
        videos: vec![VideoStream {
            index: 0,
            codec_name: "h264".into(),
            profile: Some("High".into()),
            level: Some(40),
            width: 1920,
            height: 1080,
            pix_fmt: Some("yuv420p".into()),
            color_transfer: None,
        }],
        audios: vec![AudioStream { index: 1, codec_name: "aac".into(), language: Some("eng".into()) }],
        subtitles: vec![SubtitleStream {
            index: 2,
            codec_name: "subrip".into(),
            language: Some("eng".into()),
            title: None,
        }],
    }
}
