//! One logical connection to a receiver and the channels built on it.

use crate::{
    channels::{media::LoadArgs, ConnectionChannel, HeartbeatChannel, MediaChannel,
               ReceiverChannel},
    config::{app, DeviceConfig, DEFAULT_RECEIVER_ID},
    dispatcher::{self, Dispatcher, StatusUpdate},
    error::{Error, Result},
    media::PlayMediaRequest,
    payload::{
        media::{self as media_payload, CustomData, ResumeState, StatusEntry},
        receiver::{self as receiver_payload, Volume},
    },
    transport::{self, TokioAsyncStream},
    types::AppSession,
    util::named,
};
use futures::Stream;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

/// Device connection used by the orchestrator.
///
/// Status updates of every connection, including the final `Disconnect`, are
/// published on one broadcast channel that outlives individual connections.
pub struct DeviceSession {
    config: DeviceConfig,
    status_tx: broadcast::Sender<StatusUpdate>,
    connecting: AtomicBool,
    current: RwLock<Option<Arc<Connected>>>,

    /// Serialises volume and seek commands.
    control: AsyncMutex<()>,
}

struct Connected {
    addr: Option<SocketAddr>,
    dispatcher: Arc<Dispatcher>,
    connection: Arc<ConnectionChannel>,
    receiver: ReceiverChannel,
    media: MediaChannel,
    monitor_cancel: CancellationToken,
}

impl Drop for Connected {
    fn drop(&mut self) {
        self.monitor_cancel.cancel();
    }
}

/// Clears the connecting flag when the attempt ends, however it ends.
struct ConnectingGuard<'a>(&'a AtomicBool);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl DeviceSession {
    /// `config.addr` is only a default; `connect` names the device.
    pub fn new(config: DeviceConfig) -> DeviceSession {
        DeviceSession {
            config,
            status_tx: broadcast::Sender::new(dispatcher::STATUS_BROADCAST_CHANNEL_CAPACITY),
            connecting: AtomicBool::new(false),
            current: RwLock::new(None),
            control: AsyncMutex::new(()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.status_tx.subscribe()
    }

    pub fn status_stream(&self) -> impl Stream<Item = StatusUpdate> + Send {
        dispatcher::status_stream(self.status_tx.subscribe())
    }

    pub fn is_connected(&self) -> bool {
        self.current_connection().is_some_and(|c| c.dispatcher.is_connected())
    }

    /// Address of the current device, if connected over the network.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.current_connection().and_then(|c| c.addr)
    }

    /// Connect to the receiver at `addr`, replacing any current connection.
    pub async fn connect(&self, addr: SocketAddr) -> Result<()> {
        let _guard = self.begin_connect()?;
        let conn = transport::tls_connect(addr).await?;
        self.attach(conn, Some(addr)).await
    }

    /// Like [`DeviceSession::connect`] over an already open stream.
    pub async fn connect_stream<S>(&self, stream: S) -> Result<()>
    where S: TokioAsyncStream + 'static
    {
        let _guard = self.begin_connect()?;
        self.attach(stream, None).await
    }

    /// Close the connection, if any. Pending requests fail with `ConnectionLost`.
    #[named]
    pub async fn disconnect(&self) {
        let Some(current) = self.take_connection() else {
            return;
        };

        if current.dispatcher.is_connected() {
            if let Err(err) = current.connection.close(DEFAULT_RECEIVER_ID.to_string()).await {
                tracing::debug!(target: method_path!("DeviceSession"),
                                ?err,
                                "CLOSE failed");
            }
        }

        current.monitor_cancel.cancel();
        current.dispatcher.shutdown("disconnect requested").await;
    }

    /// Load `req` into the media app, launching it first if needed.
    #[named]
    pub async fn load(&self, req: &PlayMediaRequest) -> Result<media_payload::Status> {
        const METHOD_PATH: &str = method_path!("DeviceSession");

        let current = self.connected()?;
        let app = Self::media_app(&current).await?;

        tracing::debug!(target: METHOD_PATH,
                        content_id = req.media.content_id,
                        current_time = req.load_current_time(),
                        session_id = app.session_id,
                        "load");

        current.media.load(&app, LoadArgs {
            media: req.load_media()?,
            current_time: req.load_current_time(),
            autoplay: true,
            active_track_ids: req.active_track_ids.clone(),
            custom_data: CustomData::new(),
        }).await
    }

    pub async fn play(&self) -> Result<media_payload::Status> {
        self.connected()?.media.play().await
    }

    pub async fn pause(&self) -> Result<media_payload::Status> {
        self.connected()?.media.pause().await
    }

    pub async fn stop(&self) -> Result<media_payload::Status> {
        self.connected()?.media.stop().await
    }

    pub async fn seek(&self, seconds: f64) -> Result<media_payload::Status> {
        let current = self.connected()?;
        let _control = self.control.lock().await;
        current.media.seek(seconds, Some(ResumeState::PlaybackStart)).await
    }

    pub async fn refresh_media_status(&self) -> Result<media_payload::Status> {
        self.connected()?.media.get_status().await
    }

    /// Stop every application running on the receiver.
    pub async fn stop_applications(&self) -> Result<()> {
        let current = self.connected()?;
        current.receiver.stop_applications(None).await?;
        current.media.clear();
        Ok(())
    }

    pub async fn set_volume(&self, level: f32) -> Result<Volume> {
        let current = self.connected()?;
        let _control = self.control.lock().await;
        current.receiver.set_volume(Some(level), None).await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<Volume> {
        let current = self.connected()?;
        let _control = self.control.lock().await;
        current.receiver.set_muted(muted).await
    }

    /// Authoritative media status entry, if a media session is cached.
    pub fn media_status(&self) -> Option<StatusEntry> {
        self.current_connection()?.media.current_status()
    }

    pub fn receiver_status(&self) -> Option<receiver_payload::Status> {
        self.current_connection()?.receiver.cached_status()
    }

    fn begin_connect(&self) -> Result<ConnectingGuard<'_>> {
        self.connecting.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::ConnectionInProgress)?;
        Ok(ConnectingGuard(&self.connecting))
    }

    #[named]
    async fn attach<S>(&self, conn: S, addr: Option<SocketAddr>) -> Result<()>
    where S: TokioAsyncStream + 'static
    {
        const METHOD_PATH: &str = method_path!("DeviceSession");

        if let Some(previous) = self.take_connection() {
            previous.monitor_cancel.cancel();
            previous.dispatcher.shutdown("replaced by a new connection").await;
        }

        let mut config = self.config.clone();
        if let Some(addr) = addr {
            config.addr = addr;
        }

        let dispatcher = Arc::new(Dispatcher::spawn(conn, &config, self.status_tx.clone()));
        let connection = Arc::new(ConnectionChannel::new(Arc::clone(&dispatcher)));
        let heartbeat = Arc::new(HeartbeatChannel::new(Arc::clone(&dispatcher)));
        let receiver = ReceiverChannel::new(Arc::clone(&dispatcher), Arc::clone(&connection));
        let media = MediaChannel::new(Arc::clone(&dispatcher));

        let init = async {
            connection.connect(DEFAULT_RECEIVER_ID.to_string()).await?;
            receiver.get_status().await
        }.await;

        let status = match init {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(target: METHOD_PATH,
                               ?err,
                               ?addr,
                               "connection setup failed");
                dispatcher.shutdown(format!("connection setup failed: {err}")).await;
                return Err(err);
            },
        };

        let monitor_cancel = CancellationToken::new();
        heartbeat.spawn_monitor(DEFAULT_RECEIVER_ID.to_string(),
                                config.heartbeat_interval,
                                config.heartbeat_missed_budget,
                                monitor_cancel.clone());

        tracing::info!(target: METHOD_PATH,
                       ?addr,
                       status = ?receiver_payload::small_debug::ReceiverStatus(&status),
                       "connected");

        let connected = Arc::new(Connected {
            addr,
            dispatcher,
            connection,
            receiver,
            media,
            monitor_cancel,
        });

        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(connected);
        Ok(())
    }

    async fn media_app(current: &Connected) -> Result<AppSession> {
        let namespace = media_payload::CHANNEL_NAMESPACE;

        if let Some(app) = current.receiver.get_application(namespace).await? {
            return Ok(app);
        }

        current.receiver.launch_application(app::DEFAULT_MEDIA_RECEIVER.to_string()).await?;
        current.receiver.get_application(namespace).await?
            .ok_or_else(|| Error::Protocol(
                "launched media app does not advertise the media namespace".to_string()))
    }

    fn current_connection(&self) -> Option<Arc<Connected>> {
        self.current.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn take_connection(&self) -> Option<Arc<Connected>> {
        self.current.write().unwrap_or_else(|p| p.into_inner()).take()
    }

    fn connected(&self) -> Result<Arc<Connected>> {
        self.current_connection()
            .filter(|c| c.dispatcher.is_connected())
            .ok_or_else(|| Error::connection_lost("not connected"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        dispatcher::StatusMessage,
        media::{HwAccelKind, NO_STREAM},
        payload::media::{Media, PlayerState, StreamType},
        test_util::{self, FakeReceiver},
    };

    fn session() -> DeviceSession {
        test_util::ensure_init();
        DeviceSession::new(test_util::device_config())
    }

    fn request(content_id: &str, seek_seconds: f64) -> PlayMediaRequest {
        PlayMediaRequest {
            video_stream_index: 0,
            audio_stream_index: 1,
            subtitle_stream_index: NO_STREAM,
            seek_seconds,
            video_needs_transcode: false,
            audio_needs_transcode: false,
            hw_accel_kind: HwAccelKind::None,
            content_type: "video/mp4".into(),
            source_urls: vec!["/media/a.mp4".into()],
            thumbnail_url: None,
            media: Media {
                content_id: content_id.into(),
                stream_type: StreamType::Buffered,
                content_type: "video/mp4".into(),
                metadata: None,
                duration: Some(100.0),
                tracks: None,
                custom_data: CustomData::new(),
            },
            active_track_ids: None,
        }
    }

    #[tokio::test]
    async fn load_launches_media_app() -> Result<()> {
        let session = session();
        let (conn, fake) = FakeReceiver::spawn();
        session.connect_stream(conn).await?;
        assert!(session.is_connected());

        let status = session.load(&request("http://srv/videos?file=a", 25.0)).await?;
        assert_eq!(status.entries[0].player_state, PlayerState::Playing);

        assert_eq!(fake.count_type(receiver_payload::CHANNEL_NAMESPACE, "LAUNCH"), 1);
        let load = fake.received_json(media_payload::CHANNEL_NAMESPACE).pop().unwrap();
        assert_eq!(load["type"], "LOAD");
        assert_eq!(load["currentTime"], 25.0);
        assert_eq!(load["media"]["customData"]["sourceUrls"][0], "/media/a.mp4");

        // Second load reuses the running app.
        session.load(&request("http://srv/videos?file=b", 0.0)).await?;
        assert_eq!(fake.count_type(receiver_payload::CHANNEL_NAMESPACE, "LAUNCH"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn commands_need_a_connection() {
        let session = session();
        assert!(matches!(session.play().await, Err(Error::ConnectionLost(_))));
        assert!(matches!(session.set_volume(0.5).await, Err(Error::ConnectionLost(_))));
    }

    #[tokio::test]
    async fn second_connect_while_connecting() {
        let session = session();
        let _guard = session.begin_connect().unwrap();

        let (conn, _fake) = FakeReceiver::spawn();
        assert!(matches!(session.connect_stream(conn).await,
                         Err(Error::ConnectionInProgress)));
    }

    #[tokio::test]
    async fn dropped_connection_publishes_disconnect() -> Result<()> {
        let session = session();
        let mut status_rx = session.subscribe();
        let (conn, fake) = FakeReceiver::spawn();
        session.connect_stream(conn).await?;

        fake.drop_connection();

        loop {
            let update = status_rx.recv().await.unwrap();
            if let StatusMessage::Disconnect { .. } = update.msg {
                break;
            }
        }

        assert!(!session.is_connected());
        assert!(matches!(session.play().await, Err(Error::ConnectionLost(_))));
        Ok(())
    }

    #[tokio::test]
    async fn reconnect_replaces_connection() -> Result<()> {
        let session = session();
        let (conn, first) = FakeReceiver::spawn();
        session.connect_stream(conn).await?;
        session.disconnect().await;
        assert!(!session.is_connected());
        first.wait_for_type(crate::payload::connection::MESSAGE_TYPE_CLOSE).await;

        let (conn, second) = FakeReceiver::spawn();
        session.connect_stream(conn).await?;
        second.set_launched(true);
        session.load(&request("http://srv/videos?file=a", 0.0)).await?;
        session.seek(30.0).await?;
        assert_eq!(session.media_status().unwrap().current_time, Some(30.0));
        Ok(())
    }
}
