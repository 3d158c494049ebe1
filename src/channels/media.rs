use crate::{
    dispatcher::{ChannelContext, ChannelHandler, Dispatcher, InboundMessage, StatusMessage},
    error::{Error, Result},
    payload::{
        media::{self, CustomData, GetStatusRequest, LoadRequest, Media, MediaRequestCommon,
                PauseRequest, PlayRequest, ResumeState, SeekRequest, Status, StatusEntry,
                StopRequest, TrackId},
        RequestInner,
    },
    types::{AppSession, MediaSession, MediaSessionId, NamespaceConst},
    util::{lock, named},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

/// Playback commands for the media app, tracking the current media session.
#[derive(Debug)]
pub struct MediaChannel {
    dispatcher: Arc<Dispatcher>,
    state: Arc<MediaState>,
}

#[derive(Debug, Default)]
struct MediaState {
    /// Entry 0 is the authoritative session.
    status: Mutex<Vec<StatusEntry>>,

    /// App that received the last LOAD.
    app: Mutex<Option<AppSession>>,

    /// Set when a command failed or the app was stopped; broadcasts are not
    /// cached until the next successful LOAD.
    invalidated: AtomicBool,
}

#[derive(Debug)]
pub struct LoadArgs {
    pub media: Media,
    pub current_time: f64,
    pub autoplay: bool,
    pub active_track_ids: Option<Vec<TrackId>>,
    pub custom_data: CustomData,
}

impl MediaChannel {
    pub fn new(dispatcher: Arc<Dispatcher>) -> MediaChannel {
        let state = Arc::new(MediaState::default());
        dispatcher.register_channel(state.clone());

        MediaChannel { dispatcher, state }
    }

    pub fn current_status(&self) -> Option<StatusEntry> {
        lock(&self.state.status).first().cloned()
    }

    pub fn media_session_id(&self) -> Option<MediaSessionId> {
        lock(&self.state.status).first().map(|entry| entry.media_session_id)
    }

    /// Cached app and media session, if a load succeeded and nothing failed since.
    pub fn media_session(&self) -> Option<MediaSession> {
        let media_session_id = self.media_session_id()?;
        let app_session = lock(&self.state.app).clone()?;

        Some(MediaSession { app_session, media_session_id })
    }

    /// Load media into `app`. Sent whether or not a media session is cached.
    pub async fn load(&self, app: &AppSession, args: LoadArgs) -> Result<Status> {
        *lock(&self.state.app) = Some(app.clone());

        let req = LoadRequest {
            session_id: app.session_id.clone(),
            media: args.media,
            current_time: args.current_time,
            autoplay: args.autoplay,
            active_track_ids: args.active_track_ids,
            custom_data: args.custom_data,
        };

        let status = self.send_and_set_session_id(req, app).await?;

        let mut cached = lock(&self.state.status);
        *cached = status.entries.clone();
        self.state.invalidated.store(false, Ordering::SeqCst);
        drop(cached);

        Ok(status)
    }

    pub async fn play(&self) -> Result<Status> {
        let session = self.require_session()?;
        let req = PlayRequest(Self::common(&session));
        self.send_and_set_session_id(req, &session.app_session).await
    }

    pub async fn pause(&self) -> Result<Status> {
        let session = self.require_session()?;
        let req = PauseRequest(Self::common(&session));
        self.send_and_set_session_id(req, &session.app_session).await
    }

    pub async fn stop(&self) -> Result<Status> {
        let session = self.require_session()?;
        let req = StopRequest(Self::common(&session));
        self.send_and_set_session_id(req, &session.app_session).await
    }

    pub async fn seek(&self, current_time: f64, resume_state: Option<ResumeState>)
    -> Result<Status>
    {
        let session = self.require_session()?;
        let req = SeekRequest {
            media_session_id: session.media_session_id,
            current_time,
            resume_state,
        };
        self.send_and_set_session_id(req, &session.app_session).await
    }

    pub async fn get_status(&self) -> Result<Status> {
        let session = self.require_session()?;
        let req = GetStatusRequest {
            media_session_id: Some(session.media_session_id),
        };
        self.send_and_set_session_id(req, &session.app_session).await
    }

    /// Forget the media session, e.g. after the app was stopped.
    pub fn clear(&self) {
        self.state.invalidate();
    }

    fn require_session(&self) -> Result<MediaSession> {
        self.media_session().ok_or(Error::NoActiveSession)
    }

    fn common(session: &MediaSession) -> MediaRequestCommon {
        MediaRequestCommon {
            media_session_id: session.media_session_id,
        }
    }

    /// Every media command goes through here: on any failure the cached status
    /// is cleared before the error is returned, and stays clear until a LOAD
    /// succeeds.
    #[named]
    async fn send_and_set_session_id<Req>(&self, req: Req, app: &AppSession) -> Result<Status>
    where Req: RequestInner
    {
        const METHOD_PATH: &str = method_path!("MediaChannel");

        let res = async {
            let resp = self.dispatcher.rpc::<Req, media::Response>(
                req, app.app_destination_id.clone()).await?;
            resp.inner.into_status(Req::TYPE_NAME)
        }.await;

        match res {
            Ok(status) => {
                let mut cached = lock(&self.state.status);
                if !self.state.invalidated.load(Ordering::SeqCst) {
                    *cached = status.entries.clone();
                }
                drop(cached);
                self.dispatcher.publish(StatusMessage::Media(status.clone()));
                Ok(status)
            },
            Err(err) => {
                tracing::warn!(target: METHOD_PATH,
                               ?err,
                               request_type = Req::TYPE_NAME,
                               "media command failed, clearing cached status");
                self.state.invalidate();
                Err(err)
            },
        }
    }
}

impl MediaState {
    fn invalidate(&self) {
        let mut status = lock(&self.status);
        self.invalidated.store(true, Ordering::SeqCst);
        status.clear();
    }
}

impl ChannelHandler for MediaState {
    fn namespace(&self) -> NamespaceConst {
        media::CHANNEL_NAMESPACE
    }

    #[named]
    fn on_message(&self, msg: &InboundMessage, ctx: &mut ChannelContext) {
        const METHOD_PATH: &str = method_path!("MediaState");

        match msg.payload.decode::<media::Response>() {
            Ok(media::Response::Ok(status)) => {
                tracing::debug!(target: METHOD_PATH,
                                status = ?media::small_debug::MediaStatus(&status),
                                "media status broadcast");

                let mut cached = lock(&self.status);
                if self.invalidated.load(Ordering::SeqCst) {
                    tracing::debug!(target: METHOD_PATH,
                                    "media session invalidated, not caching broadcast");
                } else {
                    *cached = status.entries.clone();
                }
                drop(cached);

                ctx.publish(StatusMessage::Media(status));
            },
            Ok(other) => {
                tracing::debug!(target: METHOD_PATH,
                                ?other,
                                "unsolicited media message");
            },
            Err(err) => {
                tracing::warn!(target: METHOD_PATH,
                               ?err,
                               typ = msg.payload.typ,
                               "error decoding media message");
            },
        }
    }

    fn on_disconnect(&self) {
        lock(&self.status).clear();
        *lock(&self.app) = None;
    }
}
