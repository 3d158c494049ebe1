use crate::{
    dispatcher::{ChannelContext, ChannelHandler, Dispatcher, InboundMessage},
    error::Result,
    payload::heartbeat::{self, Ping, Pong},
    types::{EndpointId, NamespaceConst},
    util::{lock, named},
};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

/// Keepalive: answers pings and watches for silence.
#[derive(Debug)]
pub struct HeartbeatChannel {
    dispatcher: Arc<Dispatcher>,
    state: Arc<HeartbeatState>,
}

#[derive(Debug)]
struct HeartbeatState {
    last_activity: Mutex<Instant>,
}

impl HeartbeatChannel {
    pub fn new(dispatcher: Arc<Dispatcher>) -> HeartbeatChannel {
        let state = Arc::new(HeartbeatState {
            last_activity: Mutex::new(Instant::now()),
        });
        dispatcher.register_channel(state.clone());

        HeartbeatChannel { dispatcher, state }
    }

    /// Time of the last ping or pong from the receiver.
    pub fn last_activity(&self) -> Instant {
        *lock(&self.state.last_activity)
    }

    pub async fn ping(&self, destination: EndpointId) -> Result<()> {
        self.dispatcher.send(Ping {}, destination).await
    }

    /// Ping `destination` every `interval`; shut the dispatcher down once no
    /// heartbeat traffic was seen for `interval * missed_budget`.
    ///
    /// Runs until `cancel` fires or the connection goes away.
    #[named]
    pub fn spawn_monitor(self: &Arc<Self>,
                         destination: EndpointId,
                         interval: Duration,
                         missed_budget: u32,
                         cancel: CancellationToken)
    -> JoinHandle<()>
    {
        const METHOD_PATH: &str = method_path!("HeartbeatChannel");

        let this = Arc::clone(self);
        let window = interval * missed_budget.max(1);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => (),
                }

                let silence = this.last_activity().elapsed();
                if silence >= window {
                    tracing::warn!(target: METHOD_PATH,
                                   ?silence,
                                   ?window,
                                   "heartbeat missed, disconnecting");
                    this.dispatcher.shutdown(
                        format!("no heartbeat for {silence:?}")).await;
                    return;
                }

                if let Err(err) = this.ping(destination.clone()).await {
                    tracing::debug!(target: METHOD_PATH,
                                    ?err,
                                    "ping failed, monitor stopping");
                    return;
                }
            }
        })
    }
}

impl HeartbeatState {
    fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }
}

impl ChannelHandler for HeartbeatState {
    fn namespace(&self) -> NamespaceConst {
        heartbeat::CHANNEL_NAMESPACE
    }

    #[named]
    fn on_message(&self, msg: &InboundMessage, ctx: &mut ChannelContext) {
        match msg.payload.typ.as_str() {
            heartbeat::MESSAGE_TYPE_PING => {
                self.touch();
                if let Err(err) = ctx.reply(msg.source.clone(), Pong {}) {
                    tracing::error!(target: method_path!("HeartbeatState"),
                                    ?err,
                                    "pong serialisation error");
                }
            },
            heartbeat::MESSAGE_TYPE_PONG => self.touch(),
            _ => (),
        }
    }
}
