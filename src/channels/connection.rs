use crate::{
    dispatcher::{ChannelContext, ChannelHandler, Dispatcher, InboundMessage},
    error::Result,
    payload::{self, connection::{CloseRequest, ConnectRequest}},
    types::{EndpointId, NamespaceConst},
    util::{lock, named},
};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

/// Virtual connections to the platform receiver and to app sessions.
#[derive(Debug)]
pub struct ConnectionChannel {
    dispatcher: Arc<Dispatcher>,
    state: Arc<ConnectionState>,
}

#[derive(Debug, Default)]
struct ConnectionState {
    connected: Mutex<HashSet<EndpointId>>,
}

impl ConnectionChannel {
    pub fn new(dispatcher: Arc<Dispatcher>) -> ConnectionChannel {
        let state = Arc::new(ConnectionState::default());
        dispatcher.register_channel(state.clone());

        ConnectionChannel { dispatcher, state }
    }

    /// Open a virtual connection to `destination` (`receiver-0` or an app transport id).
    pub async fn connect(&self, destination: EndpointId) -> Result<()> {
        let payload_req = ConnectRequest {
            user_agent: payload::USER_AGENT.to_string(),
        };
        self.dispatcher.send(payload_req, destination.clone()).await?;

        lock(&self.state.connected).insert(destination);
        Ok(())
    }

    pub async fn close(&self, destination: EndpointId) -> Result<()> {
        lock(&self.state.connected).remove(&destination);
        self.dispatcher.send(CloseRequest {}, destination).await
    }

    pub fn is_connected_to(&self, destination: &str) -> bool {
        lock(&self.state.connected).contains(destination)
    }
}

impl ChannelHandler for ConnectionState {
    fn namespace(&self) -> NamespaceConst {
        payload::connection::CHANNEL_NAMESPACE
    }

    #[named]
    fn on_message(&self, msg: &InboundMessage, ctx: &mut ChannelContext) {
        const METHOD_PATH: &str = method_path!("ConnectionState");

        if msg.payload.typ != payload::connection::MESSAGE_TYPE_CLOSE {
            tracing::debug!(target: METHOD_PATH,
                            typ = msg.payload.typ,
                            source = msg.source,
                            "ignored connection message");
            return;
        }

        if !lock(&self.connected).contains(&msg.source) {
            tracing::warn!(target: METHOD_PATH,
                           source = msg.source,
                           "CLOSE from an endpoint we never connected to.\n\
                            This may mean we sent it an invalid request.");
            return;
        }

        tracing::info!(target: METHOD_PATH,
                       source = msg.source,
                       "receiver closed the connection");

        ctx.teardown(format!("{source} closed the connection", source = msg.source));
    }

    fn on_disconnect(&self) {
        lock(&self.connected).clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        dispatcher::StatusMessage,
        test_util::{self, FakeReceiver},
    };
    use tokio::sync::broadcast;

    #[tokio::test]
    async fn close_from_receiver_tears_down() -> Result<()> {
        test_util::ensure_init();

        let (conn, fake) = FakeReceiver::spawn();
        let (status_tx, mut status_rx) = broadcast::channel(16);
        let dispatcher = Arc::new(Dispatcher::spawn(conn, &test_util::device_config(),
                                                    status_tx));
        let channel = ConnectionChannel::new(Arc::clone(&dispatcher));

        channel.connect("receiver-0".to_string()).await?;
        assert!(channel.is_connected_to("receiver-0"));
        fake.wait_for_type("CONNECT").await;

        fake.push_close("receiver-0");

        let update = status_rx.recv().await.map_err(anyhow::Error::from)?;
        assert!(matches!(update.msg, StatusMessage::Disconnect { ref reason }
                                     if reason.contains("receiver-0")));
        assert!(!dispatcher.is_connected());
        assert!(!channel.is_connected_to("receiver-0"));

        Ok(())
    }
}
