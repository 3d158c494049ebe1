//! Multiplexes namespaced channels over one connection.
//!
//! A [`Dispatcher`] owns a background `Task` that holds the framed connection.
//! Requests that need a reply get a fresh [`RequestId`] and a waiter keyed by it;
//! inbound frames carrying a pending id resolve that waiter, everything else is
//! routed to the [`ChannelHandler`] registered for the frame's namespace.

use chrono::{DateTime, Utc};
use crate::{
    config::DeviceConfig,
    error::{Error, Result},
    message::Frame,
    payload::{self, Payload, PayloadDyn, RequestIdGen, RequestInner, ResponseInner},
    transport::{FrameCodec, TokioAsyncStream, MAX_FRAME_LEN},
    types::{EndpointId, Namespace, NamespaceConst, RequestId},
    util::named,
};
use futures::{
    SinkExt, Stream, StreamExt,
    stream::{SplitSink, SplitStream},
};
use pin_project_lite::pin_project;
use std::{
    collections::HashMap,
    fmt::{self, Debug},
    pin::Pin,
    sync::{Arc, Mutex, RwLock, atomic::{AtomicBool, Ordering}},
    time::Duration,
};
use tokio::{
    pin,
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::{
    codec::Framed,
    time::delay_queue::{DelayQueue, Expired as DelayExpired, Key as DelayKey},
};

pub struct Dispatcher {
    /// Some(_) until `.shutdown()` is called.
    task_join_handle: Mutex<Option<JoinHandle<()>>>,

    task_cmd_tx: mpsc::Sender<TaskCmd>,

    request_ids: RequestIdGen,

    shared: Arc<Shared>,
}

/// Data shared between `Dispatcher` and its `Task`.
struct Shared {
    sender: EndpointId,
    rpc_timeout: Duration,

    handlers: RwLock<HashMap<Namespace, Arc<dyn ChannelHandler>>>,

    /// Outlives any single connection, so subscribers survive reconnects.
    status_tx: broadcast::Sender<StatusUpdate>,

    connected: AtomicBool,
}

/// Receives the frames of one namespace that are not replies to a pending request.
///
/// Called from the dispatcher task, so implementations must not block.
pub trait ChannelHandler: Send + Sync {
    fn namespace(&self) -> NamespaceConst;

    fn on_message(&self, msg: &InboundMessage, ctx: &mut ChannelContext);

    /// The connection is gone; drop any per-connection state.
    fn on_disconnect(&self) {}
}

#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub time: DateTime<Utc>,
    pub namespace: Namespace,
    pub source: EndpointId,
    pub destination: EndpointId,
    pub payload: PayloadDyn,
}

/// Actions a [`ChannelHandler`] asks the dispatcher task to take.
pub struct ChannelContext {
    sender: EndpointId,
    replies: Vec<Frame>,
    updates: Vec<StatusMessage>,
    teardown: Option<String>,
}

#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct StatusUpdate {
    pub time: DateTime<Utc>,
    pub msg: StatusMessage,
}

#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum StatusMessage {
    Disconnect { reason: String },
    Media(payload::media::Status),
    Receiver(payload::receiver::Status),
}

pin_project! {
    struct Task<S: TokioAsyncStream> {
        #[pin]
        conn_framed_sink: SplitSink<Framed<S, FrameCodec>, Frame>,

        #[pin]
        conn_framed_stream: SplitStream<Framed<S, FrameCodec>>,

        task_cmd_rx: mpsc::Receiver<TaskCmd>,

        #[pin]
        timeout_queue: DelayQueue<RequestId>,

        need_flush: bool,
        requests_map: HashMap<RequestId, RequestState>,

        shared: Arc<Shared>,
    }
}

#[derive(Debug)]
struct RequestState {
    response_ns: NamespaceConst,
    delay_key: DelayKey,
    timeout: Duration,
    result_tx: oneshot::Sender<Result<PayloadDyn>>,
}

#[derive(Debug)]
enum TaskCmd {
    Send {
        frame: Frame,
        result_tx: oneshot::Sender<Result<()>>,
    },
    Rpc {
        frame: Frame,
        request_id: RequestId,
        response_ns: NamespaceConst,
        timeout: Duration,
        result_tx: oneshot::Sender<Result<PayloadDyn>>,
    },
    Shutdown {
        reason: String,
        result_tx: oneshot::Sender<()>,
    },
}

#[derive(Debug)]
enum TaskEvent {
    Cmd(Option<TaskCmd>),
    Flush(Result<()>),
    MessageRead(Option<Result<Frame>>),
    RpcTimeout(DelayExpired<RequestId>),
}

/// Duration for the Task to do something locally.
const LOCAL_TASK_COMMAND_TIMEOUT: Duration = Duration::from_millis(1_000);

const TASK_CMD_CHANNEL_CAPACITY: usize = 16;

pub const STATUS_BROADCAST_CHANNEL_CAPACITY: usize = 32;

const TASK_DELAY_QUEUE_CAPACITY: usize = 4;

impl Dispatcher {
    /// Start the task owning `conn`. Status updates go to `status_tx`.
    pub fn spawn<S>(conn: S,
                    config: &DeviceConfig,
                    status_tx: broadcast::Sender<StatusUpdate>)
    -> Dispatcher
    where S: TokioAsyncStream + 'static
    {
        let (task_cmd_tx, task_cmd_rx) = mpsc::channel(TASK_CMD_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            sender: config.sender.clone(),
            rpc_timeout: config.rpc_timeout,
            handlers: RwLock::new(HashMap::new()),
            status_tx,
            connected: AtomicBool::new(true),
        });

        let task = Task::new(conn, task_cmd_rx, Arc::clone(&shared));

        Dispatcher {
            task_join_handle: Mutex::new(Some(tokio::spawn(task.main()))),
            task_cmd_tx,
            request_ids: RequestIdGen::new(),
            shared,
        }
    }

    pub fn sender(&self) -> &EndpointId {
        &self.shared.sender
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.shared.rpc_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst) && !self.task_cmd_tx.is_closed()
    }

    /// Route unsolicited frames of `handler.namespace()` to `handler`.
    ///
    /// Replaces any handler previously registered for that namespace.
    #[named]
    pub fn register_channel(&self, handler: Arc<dyn ChannelHandler>) {
        let namespace = handler.namespace();

        tracing::debug!(target: method_path!("Dispatcher"),
                        namespace,
                        "register channel");

        match self.shared.handlers.write() {
            Ok(mut handlers) => { handlers.insert(namespace.to_string(), handler); },
            Err(poisoned) => { poisoned.into_inner().insert(namespace.to_string(), handler); },
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.shared.status_tx.subscribe()
    }

    pub fn status_stream(&self) -> impl Stream<Item = StatusUpdate> + Send {
        status_stream(self.shared.status_tx.subscribe())
    }

    /// Publish a status learned outside the task, e.g. from an RPC response.
    pub fn publish(&self, msg: StatusMessage) {
        self.shared.publish(msg, Utc::now());
    }

    /// Send a message that gets no reply.
    #[named]
    pub async fn send<Req>(&self, req: Req, destination: EndpointId) -> Result<()>
    where Req: RequestInner
    {
        let frame = self.frame_from_inner(None, req, destination)?;

        tracing::trace!(target: method_path!("Dispatcher"),
                        ?frame,
                        "send");

        let (result_tx, result_rx) = oneshot::channel();
        self.task_cmd(TaskCmd::Send { frame, result_tx }).await?;

        result_rx.await
                 .map_err(|_| Error::connection_lost("dispatcher task stopped"))?
    }

    pub async fn rpc<Req, Resp>(&self, req: Req, destination: EndpointId)
    -> Result<Payload<Resp>>
    where Req: RequestInner,
          Resp: ResponseInner
    {
        self.rpc_with_timeout(req, destination, self.shared.rpc_timeout).await
    }

    pub async fn rpc_with_timeout<Req, Resp>(&self,
                                             req: Req,
                                             destination: EndpointId,
                                             timeout: Duration)
    -> Result<Payload<Resp>>
    where Req: RequestInner,
          Resp: ResponseInner
    {
        let request_id = self.request_ids.take_next();
        self.rpc_with_id(request_id, req, destination, timeout).await
    }

    #[named]
    async fn rpc_with_id<Req, Resp>(&self,
                                    request_id: RequestId,
                                    req: Req,
                                    destination: EndpointId,
                                    timeout: Duration)
    -> Result<Payload<Resp>>
    where Req: RequestInner,
          Resp: ResponseInner
    {
        const METHOD_PATH: &str = method_path!("Dispatcher");

        let start = Instant::now();

        let frame = self.frame_from_inner(Some(request_id), req, destination)?;
        let response_ns = Resp::CHANNEL_NAMESPACE;

        let (result_tx, result_rx) = oneshot::channel();
        self.task_cmd(TaskCmd::Rpc {
            frame,
            request_id,
            response_ns,
            timeout,
            result_tx,
        }).await?;

        // The task enforces `timeout`; the margin only covers a wedged task.
        let resp_dyn = match tokio::time::timeout(timeout + LOCAL_TASK_COMMAND_TIMEOUT,
                                                  result_rx).await {
            Err(_elapsed) => return Err(Error::Timeout(timeout)),
            Ok(Err(_recv)) => return Err(Error::connection_lost("dispatcher task stopped")),
            Ok(Ok(res)) => res?,
        };

        let resp = Payload::<Resp> {
            request_id: resp_dyn.request_id,
            inner: resp_dyn.decode::<Resp>()?,
            typ: resp_dyn.typ,
        };

        tracing::debug!(target: METHOD_PATH,
                        elapsed = ?start.elapsed(),
                        response_ns,
                        response_type_name = resp.typ,
                        expected_response_type_names = ?Resp::TYPE_NAMES,
                        %request_id,
                        "rpc response");

        Ok(resp)
    }

    /// Stop the task, failing every pending request with `ConnectionLost`.
    ///
    /// Idempotent; later calls return immediately.
    #[named]
    pub async fn shutdown(&self, reason: impl Into<String>) {
        const METHOD_PATH: &str = method_path!("Dispatcher");

        let reason = reason.into();
        let (result_tx, result_rx) = oneshot::channel();

        if self.task_cmd_tx.send(TaskCmd::Shutdown { reason, result_tx }).await.is_ok() {
            let _ = tokio::time::timeout(LOCAL_TASK_COMMAND_TIMEOUT, result_rx).await;
        }

        let join_handle = match self.task_join_handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(join_handle) = join_handle {
            if let Err(err) = tokio::time::timeout(LOCAL_TASK_COMMAND_TIMEOUT, join_handle).await {
                tracing::warn!(target: METHOD_PATH,
                               ?err,
                               "task join timed out");
            }
        }
    }

    fn frame_from_inner<Req>(&self,
                             request_id: Option<RequestId>,
                             req: Req,
                             destination: EndpointId)
    -> Result<Frame>
    where Req: RequestInner
    {
        let payload = Payload::<Req> {
            request_id,
            typ: Req::TYPE_NAME.to_string(),
            inner: req,
        };

        Frame::json(Req::CHANNEL_NAMESPACE, self.shared.sender.clone(), destination, &payload)
    }

    async fn task_cmd(&self, cmd: TaskCmd) -> Result<()> {
        self.task_cmd_tx.send_timeout(cmd, LOCAL_TASK_COMMAND_TIMEOUT).await
            .map_err(|err| match err {
                mpsc::error::SendTimeoutError::Timeout(_) =>
                    Error::Timeout(LOCAL_TASK_COMMAND_TIMEOUT),
                mpsc::error::SendTimeoutError::Closed(_) =>
                    Error::connection_lost("dispatcher task stopped"),
            })
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let join_handle = match self.task_join_handle.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(join_handle) = join_handle {
            join_handle.abort();
        }
    }
}

impl Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Dispatcher")
         .field("sender", &self.shared.sender)
         .field("connected", &self.is_connected())
         .finish_non_exhaustive()
    }
}

/// Subscriber stream that skips over lagged updates.
pub fn status_stream(status_rx: broadcast::Receiver<StatusUpdate>)
-> impl Stream<Item = StatusUpdate> + Send
{
    tokio_stream::wrappers::BroadcastStream::new(status_rx)
        .filter_map(|res| futures::future::ready(match res {
            Ok(it) => Some(it),
            Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                tracing::warn!(target: concat!(module_path!(), "::status_stream"),
                               n,
                               "lagged");
                None
            },
        }))
}

impl Shared {
    #[named]
    fn publish(&self, msg: StatusMessage, time: DateTime<Utc>) {
        const METHOD_PATH: &str = method_path!("Shared");

        let update = StatusUpdate { time, msg };

        tracing::debug!(target: METHOD_PATH,
                        update = ?StatusUpdateSmallDebug(&update),
                        "status update");

        // An error only means no receivers are currently listening.
        if let Err(err) = self.status_tx.send(update) {
            tracing::trace!(target: METHOD_PATH,
                            ?err,
                            "status send err");
        }
    }

    fn handler(&self, namespace: &str) -> Option<Arc<dyn ChannelHandler>> {
        match self.handlers.read() {
            Ok(handlers) => handlers.get(namespace).cloned(),
            Err(poisoned) => poisoned.into_inner().get(namespace).cloned(),
        }
    }

    fn all_handlers(&self) -> Vec<Arc<dyn ChannelHandler>> {
        match self.handlers.read() {
            Ok(handlers) => handlers.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        }
    }
}

impl ChannelContext {
    fn new(sender: EndpointId) -> ChannelContext {
        ChannelContext {
            sender,
            replies: Vec::new(),
            updates: Vec::new(),
            teardown: None,
        }
    }

    /// Queue a message without request id, sent once the handler returns.
    pub fn reply<Req>(&mut self, destination: EndpointId, req: Req) -> Result<()>
    where Req: RequestInner
    {
        let payload = Payload::<Req> {
            request_id: None,
            typ: Req::TYPE_NAME.to_string(),
            inner: req,
        };

        self.replies.push(Frame::json(Req::CHANNEL_NAMESPACE,
                                      self.sender.clone(), destination, &payload)?);
        Ok(())
    }

    pub fn publish(&mut self, msg: StatusMessage) {
        self.updates.push(msg);
    }

    /// Close the connection after this message.
    pub fn teardown(&mut self, reason: impl Into<String>) {
        self.teardown = Some(reason.into());
    }
}

impl<S: TokioAsyncStream + 'static> Task<S> {
    fn new(
        conn: S,
        task_cmd_rx: mpsc::Receiver<TaskCmd>,
        shared: Arc<Shared>,
    ) -> Task<S> {
        let timeout_queue = DelayQueue::<RequestId>::with_capacity(TASK_DELAY_QUEUE_CAPACITY);

        let conn_framed = Framed::with_capacity(conn, FrameCodec, MAX_FRAME_LEN);
        let (conn_framed_sink, conn_framed_stream) = conn_framed.split();

        Task {
            conn_framed_sink,
            conn_framed_stream,

            task_cmd_rx,
            timeout_queue,

            need_flush: false,
            requests_map: HashMap::new(),

            shared,
        }
    }

    #[named]
    async fn main(self) {
        const METHOD_PATH: &str = method_path!("Task");

        pin! {
            let this = self;
        }

        let reason: String = loop {
            let event = this.as_mut().take_next_event().await;

            tracing::trace!(target: METHOD_PATH,
                            ?event,
                            "event");

            match event {
                TaskEvent::Cmd(None) => break "dispatcher dropped".to_string(),

                TaskEvent::Cmd(Some(TaskCmd::Shutdown { reason, result_tx })) => {
                    tracing::info!(target: METHOD_PATH,
                                   reason,
                                   "shutdown on command");
                    this.as_mut().teardown(reason).await;
                    let _ = result_tx.send(());
                    return;
                },

                TaskEvent::Cmd(Some(TaskCmd::Send { frame, result_tx })) => {
                    let res = this.as_mut().send_raw(frame).await;
                    let failed = res.as_ref().err().map(|err| err.to_string());
                    let _ = result_tx.send(res);
                    if let Some(err) = failed {
                        break format!("write failed: {err}");
                    }
                },

                TaskEvent::Cmd(Some(TaskCmd::Rpc { frame, request_id, response_ns,
                                                   timeout, result_tx })) => {
                    if let Some(err) = this.as_mut().handle_rpc_cmd(
                        frame, request_id, response_ns, timeout, result_tx).await
                    {
                        break format!("write failed: {err}");
                    }
                },

                TaskEvent::MessageRead(None) => break "connection closed by receiver".to_string(),

                TaskEvent::MessageRead(Some(Err(err))) => {
                    tracing::warn!(target: METHOD_PATH,
                                   ?err,
                                   "frame read error");
                    break format!("read failed: {err}");
                },

                TaskEvent::MessageRead(Some(Ok(frame))) => {
                    if let Some(reason) = this.as_mut().handle_frame(frame).await {
                        break reason;
                    }
                },

                TaskEvent::RpcTimeout(expired) => {
                    this.as_mut().handle_rpc_timeout(expired);
                },

                TaskEvent::Flush(res) => {
                    *this.as_mut().project().need_flush = false;
                    if let Err(err) = res {
                        tracing::warn!(target: METHOD_PATH,
                                       ?err,
                                       "flush error");
                        break format!("flush failed: {err}");
                    }
                },
            }
        };

        this.as_mut().teardown(reason).await;
    }

    async fn take_next_event(self: Pin<&mut Self>) -> TaskEvent {
        let mut proj = self.project();
        let need_flush = *proj.need_flush;

        // Biased: flush first, then local commands, so replies go out before
        // more input is read.
        tokio::select! {
            biased;

            res = SinkExt::flush(&mut proj.conn_framed_sink), if need_flush =>
                TaskEvent::Flush(res),

            cmd = proj.task_cmd_rx.recv() => TaskEvent::Cmd(cmd),

            Some(expired) = proj.timeout_queue.next() =>
                TaskEvent::RpcTimeout(expired),

            read = proj.conn_framed_stream.next() => TaskEvent::MessageRead(read),
        }
    }

    /// Returns the error if writing failed.
    #[named]
    async fn handle_rpc_cmd(mut self: Pin<&mut Self>,
                            frame: Frame,
                            request_id: RequestId,
                            response_ns: NamespaceConst,
                            timeout: Duration,
                            result_tx: oneshot::Sender<Result<PayloadDyn>>)
    -> Option<Error>
    {
        const METHOD_PATH: &str = method_path!("Task");

        if self.requests_map.contains_key(&request_id) {
            tracing::warn!(target: METHOD_PATH,
                           %request_id,
                           "request id already pending");
            let _ = result_tx.send(Err(Error::InvalidRequest(
                format!("request id {request_id} is already pending"))));
            return None;
        }

        tracing::trace!(target: METHOD_PATH,
                        %request_id,
                        ?frame,
                        response_ns,
                        "rpc send");

        if let Err(err) = self.as_mut().send_raw(frame).await {
            tracing::warn!(target: METHOD_PATH,
                           ?err,
                           %request_id,
                           response_ns,
                           "send_raw error");

            let lost = Error::connection_lost(err.to_string());
            let _ = result_tx.send(Err(err));
            return Some(lost);
        }

        // # Record request state and set timeout.
        let delay_key = self.as_mut().project()
                            .timeout_queue.insert(request_id, timeout);

        let state = RequestState {
            response_ns,
            delay_key,
            timeout,
            result_tx,
        };

        self.as_mut().project().requests_map.insert(request_id, state);

        None
    }

    async fn send_raw(self: Pin<&mut Self>, frame: Frame) -> Result<()> {
        let mut proj = self.project();

        *proj.need_flush = true;

        let fut = proj.conn_framed_sink.feed(frame);
        match tokio::time::timeout(LOCAL_TASK_COMMAND_TIMEOUT, fut).await {
            Err(_elapsed) => Err(Error::Timeout(LOCAL_TASK_COMMAND_TIMEOUT)),
            Ok(res) => res,
        }
    }

    #[named]
    async fn send_logged(self: Pin<&mut Self>, frame: Frame) -> Result<()> {
        const METHOD_PATH: &str = method_path!("Task");

        tracing::debug!(target: METHOD_PATH,
                        ?frame,
                        "frame send");

        let res = self.send_raw(frame).await;

        if let Err(ref err) = res {
            tracing::warn!(target: METHOD_PATH,
                           ?err,
                           "send_raw error");
        }

        res
    }

    /// Returns `Some(reason)` when the connection must be torn down.
    #[named]
    async fn handle_frame(mut self: Pin<&mut Self>, frame: Frame) -> Option<String> {
        const METHOD_PATH: &str = method_path!("Task");

        let time = Utc::now();

        tracing::trace!(target: METHOD_PATH,
                        ?frame,
                        "frame read");

        let Some(json) = frame.payload_str() else {
            tracing::warn!(target: METHOD_PATH,
                           namespace = frame.namespace,
                           "binary payload ignored");
            return None;
        };

        tracing::trace!(target: METHOD_PATH,
                        json,
                        "frame payload json");

        let pd = match PayloadDyn::parse(json) {
            Ok(pd) => pd,
            Err(err) => {
                tracing::warn!(target: METHOD_PATH,
                               ?err, ?frame,
                               "error deserializing payload");
                return None;
            },
        };

        // # Reply to a pending request.
        if let Some(request_id) = pd.rpc_request_id() {
            let mut proj = self.as_mut().project();

            if let Some(state) = proj.requests_map.remove(&request_id) {
                proj.timeout_queue.as_mut().try_remove(&state.delay_key);

                let result = if state.response_ns != frame.namespace {
                    Err(Error::Protocol(format!(
                        "reply to request {request_id} on namespace {got:?}, \
                         expected {expected:?}",
                        got = frame.namespace,
                        expected = state.response_ns)))
                } else {
                    Ok(pd)
                };

                if state.result_tx.send(result).is_err() {
                    tracing::debug!(target: METHOD_PATH,
                                    %request_id,
                                    "waiter dropped before reply");
                }
                return None;
            }
        }

        // # General dispatch by namespace.
        let Some(handler) = self.shared.handler(&frame.namespace) else {
            tracing::debug!(target: METHOD_PATH,
                            namespace = frame.namespace,
                            typ = pd.typ,
                            "no channel registered for namespace");
            return None;
        };

        let msg = InboundMessage {
            time,
            namespace: frame.namespace,
            source: frame.source,
            destination: frame.destination,
            payload: pd,
        };

        let mut ctx = ChannelContext::new(self.shared.sender.clone());
        handler.on_message(&msg, &mut ctx);

        let ChannelContext { replies, updates, teardown, .. } = ctx;

        for reply in replies {
            if let Err(err) = self.as_mut().send_logged(reply).await {
                return Some(format!("write failed: {err}"));
            }
        }

        for update in updates {
            self.shared.publish(update, time);
        }

        teardown
    }

    #[named]
    fn handle_rpc_timeout(self: Pin<&mut Self>, expired: DelayExpired<RequestId>) {
        const METHOD_PATH: &str = method_path!("Task");

        let request_id = expired.into_inner();
        let proj = self.project();

        let Some(state) = proj.requests_map.remove(&request_id) else {
            tracing::warn!(target: METHOD_PATH,
                           %request_id,
                           "timeout for unknown request");
            return;
        };

        tracing::warn!(target: METHOD_PATH,
                       %request_id,
                       timeout = ?state.timeout,
                       response_ns = state.response_ns,
                       "rpc timeout");

        let _ = state.result_tx.send(Err(Error::Timeout(state.timeout)));
    }

    #[named]
    async fn teardown(self: Pin<&mut Self>, reason: String) {
        const METHOD_PATH: &str = method_path!("Task");

        let mut proj = self.project();

        if !proj.shared.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        tracing::info!(target: METHOD_PATH,
                       reason,
                       pending = proj.requests_map.len(),
                       "connection teardown");

        proj.task_cmd_rx.close();

        for (_request_id, state) in proj.requests_map.drain() {
            let _ = state.result_tx.send(Err(Error::connection_lost(reason.clone())));
        }
        proj.timeout_queue.as_mut().clear();

        // Commands queued before close() never reach the wire.
        while let Ok(cmd) = proj.task_cmd_rx.try_recv() {
            match cmd {
                TaskCmd::Send { result_tx, .. } => {
                    let _ = result_tx.send(Err(Error::connection_lost(reason.clone())));
                },
                TaskCmd::Rpc { result_tx, .. } => {
                    let _ = result_tx.send(Err(Error::connection_lost(reason.clone())));
                },
                TaskCmd::Shutdown { result_tx, .. } => {
                    let _ = result_tx.send(());
                },
            }
        }

        for handler in proj.shared.all_handlers() {
            handler.on_disconnect();
        }

        proj.shared.publish(StatusMessage::Disconnect { reason }, Utc::now());

        if let Ok(Err(err)) = tokio::time::timeout(LOCAL_TASK_COMMAND_TIMEOUT,
                                                   proj.conn_framed_sink.close()).await {
            tracing::debug!(target: METHOD_PATH,
                            ?err,
                            "close error");
        }
    }
}

pub struct StatusUpdateSmallDebug<'a>(pub &'a StatusUpdate);

impl<'a> Debug for StatusUpdateSmallDebug<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut s = f.debug_struct("StatusUpdate");
        s.field("time", &self.0.time);

        match &self.0.msg {
            StatusMessage::Media(status) =>
                s.field("media", &payload::media::small_debug::MediaStatus(status)),
            StatusMessage::Receiver(status) =>
                s.field("receiver", &payload::receiver::small_debug::ReceiverStatus(status)),
            StatusMessage::Disconnect { reason } =>
                s.field("disconnect", reason),
        };

        s.finish()
    }
}
