use crate::{
    config::DEFAULT_RECEIVER_ID,
    dispatcher::{ChannelContext, ChannelHandler, Dispatcher, InboundMessage, StatusMessage},
    error::{Error, Result},
    payload::receiver::{self, Application, GetStatusRequest, LaunchRequest, Response,
                        SetVolumeRequest, Status, StopRequest, Volume},
    types::{AppId, AppSession, EndpointId, NamespaceConst, SessionId},
    util::{lock, named},
};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};
use super::ConnectionChannel;

/// The platform receiver: running applications and device volume.
#[derive(Debug)]
pub struct ReceiverChannel {
    dispatcher: Arc<Dispatcher>,
    connection: Arc<ConnectionChannel>,
    destination: EndpointId,
    state: Arc<ReceiverState>,
}

#[derive(Debug, Default)]
struct ReceiverState {
    status: Mutex<Option<Status>>,

    /// App sessions we already sent CONNECT to.
    connected_sessions: Mutex<HashSet<SessionId>>,
}

impl ReceiverChannel {
    pub fn new(dispatcher: Arc<Dispatcher>, connection: Arc<ConnectionChannel>)
    -> ReceiverChannel
    {
        let state = Arc::new(ReceiverState::default());
        dispatcher.register_channel(state.clone());

        ReceiverChannel {
            dispatcher,
            connection,
            destination: DEFAULT_RECEIVER_ID.to_string(),
            state,
        }
    }

    /// Latest status, from a reply or a broadcast.
    pub fn cached_status(&self) -> Option<Status> {
        lock(&self.state.status).clone()
    }

    pub async fn get_status(&self) -> Result<Status> {
        self.status_rpc(GetStatusRequest {}).await
    }

    #[named]
    pub async fn launch_application(&self, app_id: AppId) -> Result<Application> {
        const METHOD_PATH: &str = method_path!("ReceiverChannel");

        let status = self.status_rpc(LaunchRequest { app_id: app_id.clone() }).await?;

        let Some(app) = status.applications.iter().find(|app| app.app_id == app_id) else {
            return Err(Error::Protocol(format!(
                "launched app {app_id} missing from receiver status")));
        };

        tracing::debug!(target: METHOD_PATH,
                        app_id,
                        session_id = app.session_id,
                        transport_id = app.transport_id,
                        "launched app");

        Ok(app.clone())
    }

    /// Set the level or the mute flag; exactly one must be given.
    ///
    /// Returns the volume the receiver reports afterwards.
    pub async fn set_volume(&self, level: Option<f32>, muted: Option<bool>) -> Result<Volume> {
        let volume = match (level, muted) {
            (Some(level), None) => {
                if !(0.0..=1.0).contains(&level) {
                    return Err(Error::InvalidRequest(
                        format!("volume level {level} outside [0, 1]")));
                }
                Volume { level: Some(level), ..Default::default() }
            },
            (None, Some(muted)) => Volume { muted: Some(muted), ..Default::default() },
            _ => return Err(Error::InvalidRequest(
                "set exactly one of volume level or muted".to_string())),
        };

        let status = self.status_rpc(SetVolumeRequest { volume }).await?;
        Ok(status.volume)
    }

    pub async fn set_muted(&self, muted: bool) -> Result<Volume> {
        self.set_volume(None, Some(muted)).await
    }

    /// First running application that speaks `namespace`, connected on first use.
    #[named]
    pub async fn get_application(&self, namespace: &str) -> Result<Option<AppSession>> {
        let status = match self.cached_status() {
            Some(status) => status,
            None => self.get_status().await?,
        };

        let Some(app) = status.applications.iter().find(|app| app.has_namespace(namespace))
        else {
            return Ok(None);
        };

        let app_session = app.to_app_session(self.destination.clone());

        let needs_connect = !lock(&self.state.connected_sessions)
                                .contains(&app_session.session_id);
        if needs_connect {
            tracing::debug!(target: method_path!("ReceiverChannel"),
                            session_id = app_session.session_id,
                            transport_id = app_session.app_destination_id,
                            "connecting to app");

            self.connection.connect(app_session.app_destination_id.clone()).await?;
            lock(&self.state.connected_sessions).insert(app_session.session_id.clone());
        }

        Ok(Some(app_session))
    }

    /// Stop `sessions`, or every running application when `None`.
    pub async fn stop_applications(&self, sessions: Option<Vec<SessionId>>) -> Result<()> {
        let sessions = match sessions {
            Some(sessions) => sessions,
            None => {
                let status = match self.cached_status() {
                    Some(status) => status,
                    None => self.get_status().await?,
                };
                status.applications.into_iter().map(|app| app.session_id).collect()
            },
        };

        for session_id in sessions {
            self.status_rpc(StopRequest { session_id: session_id.clone() }).await?;
            lock(&self.state.connected_sessions).remove(&session_id);
        }

        Ok(())
    }

    async fn status_rpc<Req>(&self, req: Req) -> Result<Status>
    where Req: crate::payload::RequestInner
    {
        let resp = self.dispatcher.rpc::<Req, Response>(req, self.destination.clone()).await?;
        let status = resp.inner.into_status(Req::TYPE_NAME)?;

        *lock(&self.state.status) = Some(status.clone());
        self.dispatcher.publish(StatusMessage::Receiver(status.clone()));

        Ok(status)
    }
}

impl ChannelHandler for ReceiverState {
    fn namespace(&self) -> NamespaceConst {
        receiver::CHANNEL_NAMESPACE
    }

    #[named]
    fn on_message(&self, msg: &InboundMessage, ctx: &mut ChannelContext) {
        const METHOD_PATH: &str = method_path!("ReceiverState");

        match msg.payload.decode::<Response>() {
            Ok(Response::Ok(receiver::StatusWrapper { status })) => {
                *lock(&self.status) = Some(status.clone());
                ctx.publish(StatusMessage::Receiver(status));
            },
            Ok(other) => {
                tracing::debug!(target: METHOD_PATH,
                                ?other,
                                "unsolicited receiver message");
            },
            Err(err) => {
                tracing::warn!(target: METHOD_PATH,
                               ?err,
                               typ = msg.payload.typ,
                               "error decoding receiver message");
            },
        }
    }

    fn on_disconnect(&self) {
        *lock(&self.status) = None;
        lock(&self.connected_sessions).clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        payload::{connection, media},
        test_util::{self, FakeReceiver},
    };
    use tokio::sync::broadcast;

    fn spawn() -> (ReceiverChannel, FakeReceiver) {
        test_util::ensure_init();

        let (conn, fake) = FakeReceiver::spawn();
        let (status_tx, _) = broadcast::channel(16);
        let dispatcher = Arc::new(Dispatcher::spawn(conn, &test_util::device_config(),
                                                    status_tx));
        let connection = Arc::new(ConnectionChannel::new(Arc::clone(&dispatcher)));

        (ReceiverChannel::new(dispatcher, connection), fake)
    }

    #[tokio::test]
    async fn set_volume_sends_only_one_field() -> Result<()> {
        let (channel, fake) = spawn();

        let volume = channel.set_muted(true).await?;
        assert_eq!(volume.muted, Some(true));
        assert_eq!(volume.level, Some(0.5));

        let sent = fake.received_json(receiver::CHANNEL_NAMESPACE).pop().unwrap();
        assert_eq!(sent["volume"], serde_json::json!({"muted": true}));

        let volume = channel.set_volume(Some(0.25), None).await?;
        assert_eq!(volume.level, Some(0.25));

        let sent = fake.received_json(receiver::CHANNEL_NAMESPACE).pop().unwrap();
        assert_eq!(sent["volume"], serde_json::json!({"level": 0.25}));

        Ok(())
    }

    #[tokio::test]
    async fn set_volume_rejects_both_or_neither() {
        let (channel, fake) = spawn();

        assert!(matches!(channel.set_volume(Some(0.2), Some(true)).await,
                         Err(Error::InvalidRequest(_))));
        assert!(matches!(channel.set_volume(None, None).await,
                         Err(Error::InvalidRequest(_))));
        assert!(fake.received_types(receiver::CHANNEL_NAMESPACE).is_empty());
    }

    #[tokio::test]
    async fn get_application_connects_once() -> Result<()> {
        let (channel, fake) = spawn();

        assert_eq!(channel.get_application(media::CHANNEL_NAMESPACE).await?, None);

        channel.launch_application(crate::config::app::DEFAULT_MEDIA_RECEIVER.into()).await?;

        let first = channel.get_application(media::CHANNEL_NAMESPACE).await?;
        let second = channel.get_application(media::CHANNEL_NAMESPACE).await?;

        let session = first.unwrap();
        assert_eq!(session.session_id, test_util::APP_SESSION_ID);
        assert_eq!(session.app_destination_id, test_util::APP_TRANSPORT_ID);
        assert_eq!(Some(session), second);

        // CONNECT is fire and forget; a status round trip orders us after it.
        channel.get_status().await?;
        let connects: Vec<_> = fake.received().into_iter()
            .filter(|f| f.namespace == connection::CHANNEL_NAMESPACE)
            .collect();
        assert_eq!(connects.len(), 1);
        assert_eq!(connects[0].destination, test_util::APP_TRANSPORT_ID);

        Ok(())
    }

    #[tokio::test]
    async fn stop_applications_stops_all_running() -> Result<()> {
        let (channel, fake) = spawn();
        fake.set_launched(true);

        channel.stop_applications(None).await?;

        assert_eq!(fake.count_type(receiver::CHANNEL_NAMESPACE, "STOP"), 1);
        let status = channel.cached_status().unwrap();
        assert!(status.applications.is_empty());

        Ok(())
    }
}
