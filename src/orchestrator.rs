//! Playback state machine over a [`DeviceSession`] and the playlists.
//!
//! A single task owns all playback state. Commands from [`PlaybackOrchestrator`]
//! handles, receiver status updates and finished request builds are merged
//! into one stream and handled in order, so two loads can never be issued at
//! once. Request builds run in their own tasks and are cancelled when a newer
//! play supersedes them.

use anyhow::format_err;
use crate::{
    config::Settings,
    discovery::{self, Target},
    dispatcher::{StatusMessage, StatusUpdate},
    error::{Error, Result},
    events::{EventBus, PlayerEvent, ServerMessage},
    media::{GeneratorRegistry, PlayMediaRequest},
    payload::{
        media::{self as media_payload, PlayerState},
        receiver::Volume,
    },
    playlist::{FileId, Playlist, PlaylistId, QueuedFile},
    session::DeviceSession,
    store::PlaylistStore,
    types::MediaSessionId,
    util::{fmt::seconds_hms, named},
};
use futures::StreamExt;
use futures_concurrency::stream::Merge;
use rand::{rngs::SmallRng, SeedableRng};
use serde::Serialize;
use std::{
    collections::HashSet,
    fmt::{self, Debug},
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

const CMD_CHANNEL_CAPACITY: usize = 32;
const BUILD_CHANNEL_CAPACITY: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentFile {
    pub playlist_id: PlaylistId,
    pub file_id: FileId,
}

/// Point-in-time copy of the orchestrator's state.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub state: PlaybackState,
    pub current: Option<CurrentFile>,
    pub playlists: Vec<Playlist>,
    pub settings: Settings,
    pub volume: Option<Volume>,
}

/// Where a file starts playing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StartFrom {
    /// The beginning, skipping `Settings::start_files_from`.
    Beginning,
    /// Where it was left, if partially played.
    Resume,
    At(f64),
}

/// Target of a seek.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SeekTo {
    /// Relative to the current position.
    Add(f64),
    Seconds(f64),
    /// Percentage of the duration, 0 to 100.
    Position(f64),
}

/// New stream choices for a file; `None` keeps the current one.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FileOptions {
    pub audio_stream_index: Option<i32>,
    /// `Some(NO_STREAM)` turns subtitles off.
    pub subtitle_stream_index: Option<i32>,
    pub quality: Option<u32>,
}

type Reply<T> = oneshot::Sender<Result<T>>;

#[derive(Clone, Copy, Debug)]
struct PlayTarget {
    playlist_id: PlaylistId,
    file_id: FileId,
    force: bool,
    options_changed: bool,
    start: StartFrom,

    /// Started by end-of-file handling rather than a user.
    auto: bool,
}

enum Command {
    Play { target: PlayTarget, reply: Reply<()> },
    GoTo { next: bool, reply: Reply<()> },
    Seek { to: SeekTo, reply: Reply<()> },
    TogglePlayback { reply: Reply<()> },
    StopPlayback { reply: Reply<()> },
    SetVolume { level: f32, reply: Reply<Volume> },
    SetMuted { muted: bool, reply: Reply<Volume> },
    SetRenderer { addr: SocketAddr, reply: Reply<()> },
    Disconnect { reply: Reply<()> },
    AddPlaylist { name: String, reply: Reply<PlaylistId> },
    DeletePlaylist { playlist_id: PlaylistId, reply: Reply<()> },
    AddFiles { playlist_id: PlaylistId, mrls: Vec<String>, reply: Reply<Vec<FileId>> },
    DeleteFile { playlist_id: PlaylistId, file_id: FileId, reply: Reply<()> },
    SetPlaylistOptions { playlist_id: PlaylistId, loop_enabled: bool, shuffle: bool,
                         reply: Reply<()> },
    SetFileLoop { playlist_id: PlaylistId, file_id: FileId, loop_enabled: bool,
                  reply: Reply<()> },
    SetFileOptions { playlist_id: PlaylistId, file_id: FileId, options: FileOptions,
                     reply: Reply<()> },
    UpdateSettings { settings: Settings, reply: Reply<()> },
    Snapshot { reply: oneshot::Sender<Snapshot> },
}

impl Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Command::Play { .. } => "Play",
            Command::GoTo { .. } => "GoTo",
            Command::Seek { .. } => "Seek",
            Command::TogglePlayback { .. } => "TogglePlayback",
            Command::StopPlayback { .. } => "StopPlayback",
            Command::SetVolume { .. } => "SetVolume",
            Command::SetMuted { .. } => "SetMuted",
            Command::SetRenderer { .. } => "SetRenderer",
            Command::Disconnect { .. } => "Disconnect",
            Command::AddPlaylist { .. } => "AddPlaylist",
            Command::DeletePlaylist { .. } => "DeletePlaylist",
            Command::AddFiles { .. } => "AddFiles",
            Command::DeleteFile { .. } => "DeleteFile",
            Command::SetPlaylistOptions { .. } => "SetPlaylistOptions",
            Command::SetFileLoop { .. } => "SetFileLoop",
            Command::SetFileOptions { .. } => "SetFileOptions",
            Command::UpdateSettings { .. } => "UpdateSettings",
            Command::Snapshot { .. } => "Snapshot",
        };
        f.write_str(name)
    }
}

/// Result of a build task.
struct Built {
    generation: u64,
    file: QueuedFile,
    res: Result<PlayMediaRequest>,
}

enum Event {
    Cmd(Command),
    Built(Built),
    Status(StatusUpdate),
}

/// A build whose result is still awaited.
struct InFlight {
    generation: u64,
    cancel: CancellationToken,
    target: PlayTarget,
    start_seconds: f64,
    reply: Option<Reply<()>>,
}

/// Handle to the orchestrator task. Dropping it stops the task.
pub struct PlaybackOrchestrator {
    cmd_tx: mpsc::Sender<Command>,
    events: EventBus,
    task_join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackOrchestrator {
    /// Load the stored playlists and start the task.
    pub async fn start(session: Arc<DeviceSession>,
                       registry: GeneratorRegistry,
                       store: Arc<dyn PlaylistStore>,
                       settings: Settings)
    -> Result<PlaybackOrchestrator>
    {
        let playlists = store.load_playlists().await?;
        let events = EventBus::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (built_tx, built_rx) = mpsc::channel(BUILD_CHANNEL_CAPACITY);

        let next_playlist_id = playlists.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        let next_file_id = playlists.iter()
            .flat_map(|p| p.files.iter().map(|f| f.id))
            .max().unwrap_or(0) + 1;

        let status_stream = session.status_stream();

        let actor = Actor {
            session,
            registry: Arc::new(registry),
            store,
            events: events.clone(),
            settings,
            playlists,
            state: PlaybackState::Idle,
            current: None,
            current_request: None,
            media_session_id: None,
            volume: None,
            rng: SmallRng::from_entropy(),
            next_playlist_id,
            next_file_id,
            generation: 0,
            in_flight: None,
            built_tx,
            follow_up: None,
            skipped: HashSet::new(),
        };

        let events_stream = (
            ReceiverStream::new(cmd_rx).map(Event::Cmd),
            ReceiverStream::new(built_rx).map(Event::Built),
            status_stream.map(Event::Status),
        ).merge();

        let task = tokio::spawn(actor.run(events_stream));

        Ok(PlaybackOrchestrator {
            cmd_tx,
            events,
            task_join_handle: Mutex::new(Some(task)),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Play a file. A no-op when it is already the current file, unless `force`.
    pub async fn play(&self, playlist_id: PlaylistId, file_id: FileId, force: bool,
                      options_changed: bool)
    -> Result<()>
    {
        self.play_from(playlist_id, file_id, force, options_changed, StartFrom::Beginning).await
    }

    pub async fn play_from(&self, playlist_id: PlaylistId, file_id: FileId, force: bool,
                           options_changed: bool, start: StartFrom)
    -> Result<()>
    {
        let target = PlayTarget {
            playlist_id,
            file_id,
            force,
            options_changed,
            start,
            auto: false,
        };
        self.request(|reply| Command::Play { target, reply }).await
    }

    pub async fn go_to(&self, next: bool) -> Result<()> {
        self.request(|reply| Command::GoTo { next, reply }).await
    }

    pub async fn add_seconds(&self, seconds: f64) -> Result<()> {
        self.seek(SeekTo::Add(seconds)).await
    }

    pub async fn go_to_seconds(&self, seconds: f64) -> Result<()> {
        self.seek(SeekTo::Seconds(seconds)).await
    }

    pub async fn go_to_position(&self, percentage: f64) -> Result<()> {
        self.seek(SeekTo::Position(percentage)).await
    }

    pub async fn seek(&self, to: SeekTo) -> Result<()> {
        self.request(|reply| Command::Seek { to, reply }).await
    }

    pub async fn toggle_playback(&self) -> Result<()> {
        self.request(|reply| Command::TogglePlayback { reply }).await
    }

    pub async fn stop_playback(&self) -> Result<()> {
        self.request(|reply| Command::StopPlayback { reply }).await
    }

    pub async fn set_volume(&self, level: f32) -> Result<Volume> {
        self.request(|reply| Command::SetVolume { level, reply }).await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<Volume> {
        self.request(|reply| Command::SetMuted { muted, reply }).await
    }

    /// Connect to the receiver at `addr`, dropping any current device.
    pub async fn set_renderer(&self, addr: SocketAddr) -> Result<()> {
        self.request(|reply| Command::SetRenderer { addr, reply }).await
    }

    /// Discover a receiver matching `target`, then connect to it.
    pub async fn set_renderer_target(&self, target: &Target, timeout: Duration) -> Result<()> {
        let device = match discovery::resolve(target, timeout).await {
            Ok(device) => device,
            Err(err) => {
                self.events.publish(PlayerEvent::server_message(err.server_message()));
                return Err(err);
            },
        };
        self.set_renderer(device.addr).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    pub async fn add_playlist(&self, name: impl Into<String>) -> Result<PlaylistId> {
        let name = name.into();
        self.request(|reply| Command::AddPlaylist { name, reply }).await
    }

    pub async fn delete_playlist(&self, playlist_id: PlaylistId) -> Result<()> {
        self.request(|reply| Command::DeletePlaylist { playlist_id, reply }).await
    }

    pub async fn add_files(&self, playlist_id: PlaylistId, mrls: Vec<String>)
    -> Result<Vec<FileId>>
    {
        self.request(|reply| Command::AddFiles { playlist_id, mrls, reply }).await
    }

    pub async fn delete_file(&self, playlist_id: PlaylistId, file_id: FileId) -> Result<()> {
        self.request(|reply| Command::DeleteFile { playlist_id, file_id, reply }).await
    }

    pub async fn set_playlist_options(&self, playlist_id: PlaylistId, loop_enabled: bool,
                                      shuffle: bool)
    -> Result<()>
    {
        self.request(|reply| Command::SetPlaylistOptions { playlist_id, loop_enabled, shuffle,
                                                           reply }).await
    }

    pub async fn set_file_loop(&self, playlist_id: PlaylistId, file_id: FileId,
                               loop_enabled: bool)
    -> Result<()>
    {
        self.request(|reply| Command::SetFileLoop { playlist_id, file_id, loop_enabled,
                                                    reply }).await
    }

    /// Change stream choices; the current file is replayed with them.
    pub async fn set_file_options(&self, playlist_id: PlaylistId, file_id: FileId,
                                  options: FileOptions)
    -> Result<()>
    {
        self.request(|reply| Command::SetFileOptions { playlist_id, file_id, options,
                                                       reply }).await
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<()> {
        self.request(|reply| Command::UpdateSettings { settings, reply }).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| task_stopped())
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| task_stopped())?
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).await.map_err(|_| task_stopped())
    }
}

impl Drop for PlaybackOrchestrator {
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

fn task_stopped() -> Error {
    Error::Other(format_err!("orchestrator task stopped"))
}

struct Actor {
    session: Arc<DeviceSession>,
    registry: Arc<GeneratorRegistry>,
    store: Arc<dyn PlaylistStore>,
    events: EventBus,
    settings: Settings,

    playlists: Vec<Playlist>,
    state: PlaybackState,
    current: Option<CurrentFile>,
    current_request: Option<PlayMediaRequest>,
    media_session_id: Option<MediaSessionId>,
    volume: Option<Volume>,

    rng: SmallRng,
    next_playlist_id: PlaylistId,
    next_file_id: FileId,

    generation: u64,
    in_flight: Option<InFlight>,
    built_tx: mpsc::Sender<Built>,

    /// Play started by the last event, e.g. the next file after one ended.
    follow_up: Option<PlayTarget>,

    /// Missing files skipped by auto-advance since the last successful load.
    skipped: HashSet<FileId>,
}

impl Actor {
    #[named]
    async fn run<S>(mut self, events: S)
    where S: futures::Stream<Item = Event> + Send
    {
        const METHOD_PATH: &str = method_path!("Actor");

        tokio::pin!(events);

        while let Some(event) = events.next().await {
            match event {
                Event::Cmd(cmd) => {
                    tracing::debug!(target: METHOD_PATH, ?cmd, "command");
                    self.handle_cmd(cmd).await;
                },
                Event::Built(built) => self.handle_built(built).await,
                Event::Status(update) => self.handle_status(update).await,
            }

            while let Some(target) = self.follow_up.take() {
                self.start_play(target, None).await;
            }
        }

        tracing::info!(target: METHOD_PATH, "event stream closed");
    }

    async fn handle_cmd(&mut self, cmd: Command) {
        match cmd {
            Command::Play { target, reply } => self.start_play(target, Some(reply)).await,
            Command::GoTo { next, reply } => {
                let res = self.go_to(next, false);
                match res {
                    Ok(Some(target)) => self.start_play(target, Some(reply)).await,
                    Ok(None) => { let _ = reply.send(Ok(())); },
                    Err(err) => self.reply_err(reply, err),
                }
            },
            Command::Seek { to, reply } => self.seek(to, reply).await,
            Command::TogglePlayback { reply } => {
                let res = self.toggle_playback().await;
                let res = self.check_session(res).await;
                self.reply(reply, res);
            },
            Command::StopPlayback { reply } => {
                let res = self.stop_playback().await;
                self.reply(reply, res);
            },
            Command::SetVolume { level, reply } => {
                let res = self.session.set_volume(level).await;
                let res = self.record_volume(res);
                self.reply(reply, res);
            },
            Command::SetMuted { muted, reply } => {
                let res = self.session.set_muted(muted).await;
                let res = self.record_volume(res);
                self.reply(reply, res);
            },
            Command::SetRenderer { addr, reply } => {
                self.reset_playback().await;
                let res = self.session.connect(addr).await;
                self.reply(reply, res);
            },
            Command::Disconnect { reply } => {
                self.session.disconnect().await;
                let _ = reply.send(Ok(()));
            },
            Command::AddPlaylist { name, reply } => {
                let res = self.add_playlist(name).await;
                self.reply(reply, res);
            },
            Command::DeletePlaylist { playlist_id, reply } => {
                let res = self.delete_playlist(playlist_id).await;
                self.reply(reply, res);
            },
            Command::AddFiles { playlist_id, mrls, reply } => {
                let res = self.add_files(playlist_id, mrls).await;
                self.reply(reply, res);
            },
            Command::DeleteFile { playlist_id, file_id, reply } => {
                let res = self.delete_file(playlist_id, file_id).await;
                self.reply(reply, res);
            },
            Command::SetPlaylistOptions { playlist_id, loop_enabled, shuffle, reply } => {
                let res = self.set_playlist_options(playlist_id, loop_enabled, shuffle).await;
                self.reply(reply, res);
            },
            Command::SetFileLoop { playlist_id, file_id, loop_enabled, reply } => {
                let res = self.set_file_loop(playlist_id, file_id, loop_enabled).await;
                self.reply(reply, res);
            },
            Command::SetFileOptions { playlist_id, file_id, options, reply } =>
                self.set_file_options(playlist_id, file_id, options, reply).await,
            Command::UpdateSettings { settings, reply } => {
                self.settings = settings;
                let _ = reply.send(Ok(()));
            },
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            },
        }
    }

    // # Playing files

    /// Validate `target` and spawn its request build.
    #[named]
    async fn start_play(&mut self, target: PlayTarget, reply: Option<Reply<()>>) {
        const METHOD_PATH: &str = method_path!("Actor");

        let file = match self.file(target.playlist_id, target.file_id) {
            Ok(file) => file.clone(),
            Err(err) => return self.fail_play(target, reply, err).await,
        };

        let is_current = self.current == Some(CurrentFile { playlist_id: target.playlist_id,
                                                            file_id: target.file_id });
        let in_progress = matches!(self.state, PlaybackState::Playing | PlaybackState::Paused)
            || self.in_flight.as_ref().is_some_and(|f| f.target.file_id == target.file_id);
        if is_current && in_progress && !target.force {
            tracing::debug!(target: METHOD_PATH,
                            file_id = target.file_id,
                            "already playing");
            if let Some(reply) = reply {
                let _ = reply.send(Ok(()));
            }
            return;
        }

        self.cancel_in_flight(Error::Cancelled);

        if !self.session.is_connected() {
            return self.fail_play(target, reply, Error::connection_lost("not connected")).await;
        }

        let start_seconds = self.start_seconds(&file, target.start);

        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();

        tracing::info!(target: METHOD_PATH,
                       playlist_id = target.playlist_id,
                       file_id = target.file_id,
                       mrl = %file.mrl,
                       start_seconds,
                       options_changed = target.options_changed,
                       auto = target.auto,
                       generation,
                       "play");

        self.state = PlaybackState::Loading;
        self.events.publish(PlayerEvent::FileLoading {
            playlist_id: target.playlist_id,
            file_id: target.file_id,
        });

        self.in_flight = Some(InFlight {
            generation,
            cancel: cancel.clone(),
            target,
            start_seconds,
            reply,
        });

        let registry = Arc::clone(&self.registry);
        let settings = self.settings.clone();
        let built_tx = self.built_tx.clone();
        let options_changed = target.options_changed;

        tokio::spawn(async move {
            let mut file = file;
            let res = registry.build(&mut file, &settings, start_seconds, options_changed,
                                     &cancel).await;
            let _ = built_tx.send(Built { generation, file, res }).await;
        });
    }

    #[named]
    async fn handle_built(&mut self, built: Built) {
        const METHOD_PATH: &str = method_path!("Actor");

        let Built { generation, file: built_file, res } = built;

        if self.in_flight.as_ref().map(|f| f.generation) != Some(generation) {
            tracing::debug!(target: METHOD_PATH, generation, "stale build result");
            return;
        }
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        let target = in_flight.target;

        // Keep what the build learnt about the file.
        if let Ok(file) = self.file_mut(target.playlist_id, target.file_id) {
            file.probed_info = built_file.probed_info;
            file.selection = built_file.selection;
            file.remote = built_file.remote;
        }

        let req = match res {
            Ok(req) => req,
            Err(err) => return self.fail_play(target, in_flight.reply, err).await,
        };

        let status = match self.session.load(&req).await {
            Ok(status) => status,
            Err(err) => return self.fail_play(target, in_flight.reply, err).await,
        };

        self.clear_playing().await;

        let current = CurrentFile { playlist_id: target.playlist_id, file_id: target.file_id };
        let start_seconds = in_flight.start_seconds;
        let duration = match self.file_mut(target.playlist_id, target.file_id) {
            Ok(file) => {
                file.is_playing = true;
                if start_seconds == 0.0 {
                    file.reset_progress();
                }
                file.duration().or(req.media.duration)
            },
            Err(_) => req.media.duration,
        };

        self.current = Some(current);
        self.current_request = Some(req);
        self.media_session_id = status.entries.first().map(|e| e.media_session_id);
        self.state = PlaybackState::Playing;
        self.skipped.clear();

        tracing::info!(target: METHOD_PATH,
                       playlist_id = current.playlist_id,
                       file_id = current.file_id,
                       media_session_id = ?self.media_session_id,
                       "file loaded");

        self.events.publish(PlayerEvent::FileLoaded {
            playlist_id: current.playlist_id,
            file_id: current.file_id,
            duration,
        });

        if let Some(reply) = in_flight.reply {
            let _ = reply.send(Ok(()));
        }
    }

    /// A play attempt failed: go idle, tell observers and maybe skip ahead.
    #[named]
    async fn fail_play(&mut self, target: PlayTarget, reply: Option<Reply<()>>, err: Error) {
        const METHOD_PATH: &str = method_path!("Actor");

        tracing::warn!(target: METHOD_PATH,
                       ?err,
                       playlist_id = target.playlist_id,
                       file_id = target.file_id,
                       auto = target.auto,
                       "play failed");

        if !matches!(err, Error::Cancelled) {
            self.clear_playing().await;
            self.current = None;
            self.current_request = None;
            self.media_session_id = None;
            self.state = PlaybackState::Idle;
            self.events.publish(PlayerEvent::server_message(err.server_message()));
        }

        // A missing file met while advancing is skipped, once per file.
        if target.auto && matches!(err, Error::FileNotFound(_))
            && self.skipped.insert(target.file_id)
        {
            if let Some(next) = self.next_target(target.playlist_id, target.file_id, true, true) {
                if !self.skipped.contains(&next.file_id) {
                    self.follow_up = Some(next);
                }
            }
        }

        if let Some(reply) = reply {
            let _ = reply.send(Err(err));
        }
    }

    fn cancel_in_flight(&mut self, err: Error) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.cancel.cancel();
            if let Some(reply) = in_flight.reply {
                let _ = reply.send(Err(err));
            }
        }
    }

    fn start_seconds(&self, file: &QueuedFile, start: StartFrom) -> f64 {
        let duration = file.duration();
        let seconds = match start {
            StartFrom::At(seconds) => seconds,
            StartFrom::Resume if file.was_played() =>
                duration.map_or(0.0, |d| d * file.played_percentage / 100.0),
            StartFrom::Resume | StartFrom::Beginning => {
                let skip = self.settings.start_files_from;
                if skip > 0.0 && duration.map_or(true, |d| skip < d) { skip } else { 0.0 }
            },
        };

        match duration {
            Some(d) => seconds.clamp(0.0, d),
            None => seconds.max(0.0),
        }
    }

    /// Target for moving from `file_id`; the file's own loop flag replays it.
    fn next_target(&mut self, playlist_id: PlaylistId, file_id: FileId, next: bool, auto: bool)
    -> Option<PlayTarget>
    {
        let playlist = self.playlists.iter().find(|p| p.id == playlist_id)?;
        let current_idx = playlist.index_of(file_id)?;

        let idx = if playlist.files[current_idx].loop_enabled {
            current_idx
        } else {
            playlist.next_index(current_idx, next, &mut self.rng)?
        };

        Some(PlayTarget {
            playlist_id,
            file_id: playlist.files[idx].id,
            force: true,
            options_changed: false,
            start: StartFrom::Beginning,
            auto,
        })
    }

    fn go_to(&mut self, next: bool, auto: bool) -> Result<Option<PlayTarget>> {
        let current = self.current
            .or_else(|| self.in_flight.as_ref().map(|f| CurrentFile {
                playlist_id: f.target.playlist_id,
                file_id: f.target.file_id,
            }))
            .ok_or(Error::NoActiveSession)?;

        Ok(self.next_target(current.playlist_id, current.file_id, next, auto))
    }

    // # Controls

    async fn toggle_playback(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Playing => {
                self.session.pause().await?;
                self.state = PlaybackState::Paused;
            },
            PlaybackState::Paused => {
                self.session.play().await?;
                self.state = PlaybackState::Playing;
            },
            PlaybackState::Idle | PlaybackState::Loading => return Err(Error::NoActiveSession),
        }
        Ok(())
    }

    async fn stop_playback(&mut self) -> Result<()> {
        self.cancel_in_flight(Error::Cancelled);

        let res = if self.media_session_id.is_some() {
            self.session.stop().await.map(|_| ())
        } else {
            Ok(())
        };

        self.clear_playing().await;
        self.current = None;
        self.current_request = None;
        self.media_session_id = None;
        self.state = PlaybackState::Idle;
        res
    }

    #[named]
    async fn seek(&mut self, to: SeekTo, reply: Reply<()>) {
        let Some(current) = self.current else {
            return self.reply_err(reply, Error::NoActiveSession);
        };
        let (played_seconds, file_duration) = match self.file(current.playlist_id,
                                                              current.file_id) {
            Ok(file) => (file.played_seconds, file.duration()),
            Err(err) => return self.reply_err(reply, err),
        };
        let duration = file_duration
            .or_else(|| self.current_request.as_ref().and_then(|r| r.media.duration));

        let seconds = match (to, duration) {
            (SeekTo::Add(delta), _) => played_seconds + delta,
            (SeekTo::Seconds(seconds), _) => seconds,
            (SeekTo::Position(pct), Some(duration)) => duration * pct.clamp(0.0, 100.0) / 100.0,
            (SeekTo::Position(_), None) => return self.reply_err(reply, Error::InvalidRequest(
                "seek by position needs a known duration".to_string())),
        };
        let seconds = match duration {
            Some(d) => seconds.clamp(0.0, d),
            None => seconds.max(0.0),
        };

        tracing::debug!(target: method_path!("Actor"),
                        ?to,
                        position = %seconds_hms(seconds),
                        "seek");

        // A transcoded stream can't seek; it is restarted at the new position.
        if self.current_request.as_ref().is_some_and(|r| r.is_transcoding()) {
            let target = PlayTarget {
                playlist_id: current.playlist_id,
                file_id: current.file_id,
                force: true,
                options_changed: false,
                start: StartFrom::At(seconds),
                auto: false,
            };
            return self.start_play(target, Some(reply)).await;
        }

        let res = self.session.seek(seconds).await.map(|_| ());
        let res = self.check_session(res).await;
        if res.is_ok() {
            if let Ok(file) = self.file_mut(current.playlist_id, current.file_id) {
                file.update_progress(seconds, duration);
            }
        }
        self.reply(reply, res);
    }

    fn record_volume(&mut self, res: Result<Volume>) -> Result<Volume> {
        if let Ok(volume) = &res {
            self.volume = Some(volume.clone());
        }
        res
    }

    // # Status updates

    #[named]
    async fn handle_status(&mut self, update: StatusUpdate) {
        const METHOD_PATH: &str = method_path!("Actor");

        match update.msg {
            StatusMessage::Media(status) => self.handle_media_status(status).await,
            StatusMessage::Receiver(status) => {
                self.volume = Some(status.volume);
            },
            StatusMessage::Disconnect { reason } => {
                if self.session.is_connected() {
                    // From a connection already replaced.
                    tracing::debug!(target: METHOD_PATH, %reason, "stale disconnect");
                    return;
                }

                tracing::warn!(target: METHOD_PATH, %reason, "device disconnected");

                self.reset_playback().await;
                self.events.publish(PlayerEvent::DeviceDisconnected { reason });
            },
        }
    }

    #[named]
    async fn handle_media_status(&mut self, status: media_payload::Status) {
        const METHOD_PATH: &str = method_path!("Actor");

        let Some(entry) = status.entries.first() else {
            return;
        };
        if self.media_session_id != Some(entry.media_session_id) {
            tracing::trace!(target: METHOD_PATH,
                            media_session_id = entry.media_session_id,
                            "status for another media session");
            return;
        }
        let Some(current) = self.current else {
            return;
        };

        let status_duration = entry.media.as_ref().and_then(|m| m.duration);
        let (current_time, played_percentage) =
            match self.file_mut(current.playlist_id, current.file_id) {
                Ok(file) => {
                    if let Some(time) = entry.current_time {
                        let duration = file.duration().or(status_duration);
                        file.update_progress(time, duration);
                    }
                    (file.played_seconds, file.played_percentage)
                },
                Err(_) => return,
            };

        match entry.player_state {
            PlayerState::Playing | PlayerState::Buffering => self.state = PlaybackState::Playing,
            PlayerState::Paused => self.state = PlaybackState::Paused,
            _ => (),
        }

        self.events.publish(PlayerEvent::StatusChanged {
            player_state: entry.player_state,
            current_time,
            played_percentage,
        });

        if entry.is_finished() {
            self.file_ended(current).await;
        } else if entry.is_error() {
            tracing::warn!(target: METHOD_PATH,
                           file_id = current.file_id,
                           "receiver reported a playback error");
            self.clear_playing().await;
            self.current = None;
            self.media_session_id = None;
            self.state = PlaybackState::Idle;
            self.events.publish(PlayerEvent::server_message(ServerMessage::ErrorLoadingFile));
        }
    }

    async fn file_ended(&mut self, current: CurrentFile) {
        if let Ok(file) = self.file_mut(current.playlist_id, current.file_id) {
            file.mark_finished();
        }

        self.clear_playing().await;
        self.media_session_id = None;
        self.current_request = None;

        // A play requested by the user is already loading and takes precedence.
        let user_play_pending = self.in_flight.as_ref().is_some_and(|f| !f.target.auto);
        if !user_play_pending {
            self.state = PlaybackState::Idle;
        }

        self.events.publish(PlayerEvent::FileEndReached {
            playlist_id: current.playlist_id,
            file_id: current.file_id,
        });

        if user_play_pending {
            return;
        }

        let replay = self.file(current.playlist_id, current.file_id)
                         .is_ok_and(|f| f.loop_enabled);
        if replay || self.settings.play_next_file_automatically {
            self.follow_up = self.next_target(current.playlist_id, current.file_id, true, true);
        }
        if self.follow_up.is_none() {
            self.current = None;
        }
    }

    /// Drop the media session when `res` failed in a way that leaves it stale.
    #[named]
    async fn check_session<T>(&mut self, res: Result<T>) -> Result<T> {
        let Err(err) = &res else {
            return res;
        };
        if !err.invalidates_session() {
            return res;
        }

        tracing::warn!(target: method_path!("Actor"),
                       ?err,
                       media_session_id = ?self.media_session_id,
                       "media session lost");

        self.clear_playing().await;
        self.current = None;
        self.current_request = None;
        self.media_session_id = None;
        if self.in_flight.is_none() {
            self.state = PlaybackState::Idle;
        }
        res
    }

    /// Forget everything tied to the device connection; playlists are kept.
    async fn reset_playback(&mut self) {
        self.cancel_in_flight(Error::connection_lost("device disconnected"));
        self.clear_playing().await;
        self.current = None;
        self.current_request = None;
        self.media_session_id = None;
        self.state = PlaybackState::Idle;
    }

    /// Clear the playing flag of every file, saving the progress of the one that had it.
    #[named]
    async fn clear_playing(&mut self) {
        let mut was_playing = Vec::new();
        for file in self.playlists.iter_mut().flat_map(|p| p.files.iter_mut()) {
            if file.is_playing {
                file.is_playing = false;
                was_playing.push(file.clone());
            }
        }

        for file in was_playing {
            if let Err(err) = self.store.save_file_state(&file).await {
                tracing::warn!(target: method_path!("Actor"),
                               ?err,
                               file_id = file.id,
                               "saving file state failed");
            }
        }
    }

    // # Playlists

    async fn add_playlist(&mut self, name: String) -> Result<PlaylistId> {
        let id = self.next_playlist_id;
        self.next_playlist_id += 1;

        let playlist = Playlist::new(id, name, self.playlists.len());
        self.store.save_playlist(&playlist).await?;
        self.playlists.push(playlist);
        self.publish_playlist(id);
        Ok(id)
    }

    async fn delete_playlist(&mut self, playlist_id: PlaylistId) -> Result<()> {
        let idx = self.playlists.iter().position(|p| p.id == playlist_id)
            .ok_or(Error::PlaylistNotFound(playlist_id))?;

        if self.current.is_some_and(|c| c.playlist_id == playlist_id) {
            self.stop_playback().await?;
        }

        let playlist = self.playlists.remove(idx);
        self.store.delete_playlist(&playlist).await?;
        for (position, playlist) in self.playlists.iter_mut().enumerate() {
            playlist.position = position;
        }
        Ok(())
    }

    async fn add_files(&mut self, playlist_id: PlaylistId, mrls: Vec<String>)
    -> Result<Vec<FileId>>
    {
        let next_file_id = &mut self.next_file_id;
        let playlist = self.playlists.iter_mut().find(|p| p.id == playlist_id)
            .ok_or(Error::PlaylistNotFound(playlist_id))?;

        let ids = playlist.add_files(mrls, || {
            let id = *next_file_id;
            *next_file_id += 1;
            id
        });

        self.store.save_playlist(playlist).await?;
        self.publish_playlist(playlist_id);
        Ok(ids)
    }

    async fn delete_file(&mut self, playlist_id: PlaylistId, file_id: FileId) -> Result<()> {
        if self.current == Some(CurrentFile { playlist_id, file_id }) {
            self.stop_playback().await?;
        }

        let playlist = self.playlists.iter_mut().find(|p| p.id == playlist_id)
            .ok_or(Error::PlaylistNotFound(playlist_id))?;
        playlist.remove_file(file_id)
            .ok_or(Error::PlaylistFileNotFound { playlist_id, file_id })?;

        self.store.save_playlist(playlist).await?;
        self.publish_playlist(playlist_id);
        Ok(())
    }

    async fn set_playlist_options(&mut self, playlist_id: PlaylistId, loop_enabled: bool,
                                  shuffle: bool)
    -> Result<()>
    {
        let playlist = self.playlists.iter_mut().find(|p| p.id == playlist_id)
            .ok_or(Error::PlaylistNotFound(playlist_id))?;
        playlist.loop_enabled = loop_enabled;
        playlist.shuffle = shuffle;

        self.store.save_playlist(playlist).await?;
        self.publish_playlist(playlist_id);
        Ok(())
    }

    async fn set_file_loop(&mut self, playlist_id: PlaylistId, file_id: FileId,
                           loop_enabled: bool)
    -> Result<()>
    {
        let file = self.file_mut(playlist_id, file_id)?;
        file.loop_enabled = loop_enabled;
        let file = file.clone();

        self.store.save_file_state(&file).await?;
        self.publish_playlist(playlist_id);
        Ok(())
    }

    async fn set_file_options(&mut self, playlist_id: PlaylistId, file_id: FileId,
                              options: FileOptions, reply: Reply<()>)
    {
        let played_seconds = match self.file_mut(playlist_id, file_id) {
            Ok(file) => {
                if let Some(audio) = options.audio_stream_index {
                    file.selection.audio_stream_index = audio;
                }
                if let Some(subtitle) = options.subtitle_stream_index {
                    file.selection.subtitle_stream_index = subtitle;
                }
                if options.quality.is_some() {
                    file.selection.quality = options.quality;
                }
                file.played_seconds
            },
            Err(err) => return self.reply_err(reply, err),
        };

        let is_current = self.current == Some(CurrentFile { playlist_id, file_id });
        if !is_current || self.state == PlaybackState::Idle {
            let _ = reply.send(Ok(()));
            return;
        }

        let target = PlayTarget {
            playlist_id,
            file_id,
            force: true,
            options_changed: true,
            start: StartFrom::At(played_seconds),
            auto: false,
        };
        self.start_play(target, Some(reply)).await;
    }

    fn publish_playlist(&self, playlist_id: PlaylistId) {
        if let Some(playlist) = self.playlists.iter().find(|p| p.id == playlist_id) {
            self.events.publish(PlayerEvent::PlaylistChanged(playlist.clone()));
        }
    }

    fn file(&self, playlist_id: PlaylistId, file_id: FileId) -> Result<&QueuedFile> {
        let playlist = self.playlists.iter().find(|p| p.id == playlist_id)
            .ok_or(Error::PlaylistNotFound(playlist_id))?;
        playlist.file(file_id).ok_or(Error::PlaylistFileNotFound { playlist_id, file_id })
    }

    fn file_mut(&mut self, playlist_id: PlaylistId, file_id: FileId) -> Result<&mut QueuedFile> {
        let playlist = self.playlists.iter_mut().find(|p| p.id == playlist_id)
            .ok_or(Error::PlaylistNotFound(playlist_id))?;
        playlist.file_mut(file_id).ok_or(Error::PlaylistFileNotFound { playlist_id, file_id })
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            current: self.current,
            playlists: self.playlists.clone(),
            settings: self.settings.clone(),
            volume: self.volume.clone(),
        }
    }

    /// Reply to a command, publishing failures as server messages.
    fn reply<T>(&self, reply: Reply<T>, res: Result<T>) {
        if let Err(err) = &res {
            self.events.publish(PlayerEvent::server_message(err.server_message()));
        }
        let _ = reply.send(res);
    }

    fn reply_err<T>(&self, reply: Reply<T>, err: Error) {
        self.reply(reply, Err(err))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        events::PlayerEvent,
        store::MemoryPlaylistStore,
        test_util::{self, FakeReceiver, MockDecoder, MockProber},
    };
    use tokio::sync::broadcast;

    const FIRST: &str = "/media/first.mp4";
    const SECOND: &str = "/media/second.mp4";
    const THIRD: &str = "/media/third.mp4";

    struct Fixture {
        orchestrator: PlaybackOrchestrator,
        session: Arc<DeviceSession>,
        prober: Arc<MockProber>,
        events: broadcast::Receiver<PlayerEvent>,
        playlist_id: PlaylistId,
        file_ids: Vec<FileId>,
    }

    async fn fixture(settings: Settings) -> Result<(Fixture, FakeReceiver)> {
        test_util::ensure_init();

        let prober = MockProber::new();
        for mrl in [FIRST, SECOND, THIRD] {
            prober.add_file(mrl, test_util::video_info(100.0));
        }

        let session = Arc::new(DeviceSession::new(test_util::device_config()));
        let (conn, fake) = FakeReceiver::spawn();
        session.connect_stream(conn).await?;

        let registry = GeneratorRegistry::new(prober.clone(), MockDecoder::new());
        let orchestrator = PlaybackOrchestrator::start(Arc::clone(&session), registry,
                                                       Arc::new(MemoryPlaylistStore::new()),
                                                       settings).await?;
        let events = orchestrator.events().subscribe();

        let playlist_id = orchestrator.add_playlist("films").await?;
        let file_ids = orchestrator.add_files(
            playlist_id, [FIRST, SECOND, THIRD].map(String::from).to_vec()).await?;

        Ok((Fixture { orchestrator, session, prober, events, playlist_id, file_ids }, fake))
    }

    async fn wait_for<F>(events: &mut broadcast::Receiver<PlayerEvent>, mut pred: F)
    -> PlayerEvent
    where F: FnMut(&PlayerEvent) -> bool
    {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                let event = events.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        }).await.unwrap()
    }

    #[tokio::test]
    async fn play_marks_current_file() -> Result<()> {
        let (fx, fake) = fixture(Settings::default()).await?;

        fx.orchestrator.play(fx.playlist_id, fx.file_ids[0], false, false).await?;

        let snapshot = fx.orchestrator.snapshot().await?;
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert_eq!(snapshot.current, Some(CurrentFile { playlist_id: fx.playlist_id,
                                                        file_id: fx.file_ids[0] }));
        assert!(snapshot.playlists[0].files[0].is_playing);

        // Same file again without force is a no-op.
        fx.orchestrator.play(fx.playlist_id, fx.file_ids[0], false, false).await?;
        assert_eq!(fake.count_type(media_payload::CHANNEL_NAMESPACE, "LOAD"), 1);

        fx.orchestrator.play(fx.playlist_id, fx.file_ids[1], false, false).await?;
        let snapshot = fx.orchestrator.snapshot().await?;
        assert!(!snapshot.playlists[0].files[0].is_playing);
        assert!(snapshot.playlists[0].files[1].is_playing);
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_while_playing_then_replay() -> Result<()> {
        let (mut fx, fake) = fixture(Settings::default()).await?;
        fx.orchestrator.play(fx.playlist_id, fx.file_ids[0], false, false).await?;

        fake.drop_connection();
        wait_for(&mut fx.events, |e| matches!(e, PlayerEvent::DeviceDisconnected { .. })).await;

        let snapshot = fx.orchestrator.snapshot().await?;
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert_eq!(snapshot.current, None);
        assert!(snapshot.playlists[0].files.iter().all(|f| !f.is_playing));
        assert_eq!(snapshot.playlists[0].files.len(), 3);

        assert!(matches!(fx.orchestrator.play(fx.playlist_id, fx.file_ids[0], false, false)
                             .await,
                         Err(Error::ConnectionLost(_))));

        let (conn, fake) = FakeReceiver::spawn();
        fx.session.connect_stream(conn).await?;

        fx.orchestrator.play(fx.playlist_id, fx.file_ids[0], false, false).await?;
        assert_eq!(fx.orchestrator.snapshot().await?.state, PlaybackState::Playing);
        assert_eq!(fake.count_type(media_payload::CHANNEL_NAMESPACE, "LOAD"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn finished_file_advances() -> Result<()> {
        let (mut fx, fake) = fixture(Settings::default()).await?;
        fx.orchestrator.play(fx.playlist_id, fx.file_ids[0], false, false).await?;

        fake.push_media_status("IDLE", Some("FINISHED"), 100.0);

        let ended = wait_for(&mut fx.events,
                             |e| matches!(e, PlayerEvent::FileEndReached { .. })).await;
        assert_eq!(ended, PlayerEvent::FileEndReached { playlist_id: fx.playlist_id,
                                                        file_id: fx.file_ids[0] });
        wait_for(&mut fx.events, |e| matches!(e, PlayerEvent::FileLoaded { file_id, .. }
                                                  if *file_id == fx.file_ids[1])).await;

        let snapshot = fx.orchestrator.snapshot().await?;
        assert_eq!(snapshot.playlists[0].files[0].played_percentage, 100.0);
        assert_eq!(snapshot.current.map(|c| c.file_id), Some(fx.file_ids[1]));
        Ok(())
    }

    #[tokio::test]
    async fn advance_skips_missing_file_once() -> Result<()> {
        let (mut fx, fake) = fixture(Settings::default()).await?;
        fx.prober.remove_file(SECOND);
        fx.orchestrator.play(fx.playlist_id, fx.file_ids[0], false, false).await?;

        fake.push_media_status("IDLE", Some("FINISHED"), 100.0);

        wait_for(&mut fx.events,
                 |e| *e == PlayerEvent::server_message(ServerMessage::FileNotFound)).await;
        wait_for(&mut fx.events, |e| matches!(e, PlayerEvent::FileLoaded { file_id, .. }
                                                  if *file_id == fx.file_ids[2])).await;
        Ok(())
    }

    #[tokio::test]
    async fn go_to_stops_at_end_without_loop() -> Result<()> {
        let (fx, fake) = fixture(Settings::default()).await?;
        fx.orchestrator.play(fx.playlist_id, fx.file_ids[2], false, false).await?;

        fx.orchestrator.go_to(true).await?;
        assert_eq!(fake.count_type(media_payload::CHANNEL_NAMESPACE, "LOAD"), 1);

        fx.orchestrator.set_playlist_options(fx.playlist_id, true, false).await?;
        fx.orchestrator.go_to(true).await?;
        let snapshot = fx.orchestrator.snapshot().await?;
        assert_eq!(snapshot.current.map(|c| c.file_id), Some(fx.file_ids[0]));
        Ok(())
    }

    #[tokio::test]
    async fn seek_is_clamped() -> Result<()> {
        let (fx, fake) = fixture(Settings::default()).await?;
        fx.orchestrator.play(fx.playlist_id, fx.file_ids[0], false, false).await?;

        fx.orchestrator.go_to_seconds(500.0).await?;
        fx.orchestrator.go_to_position(25.0).await?;
        fx.orchestrator.add_seconds(-60.0).await?;

        let seeks: Vec<f64> = fake.received_json(media_payload::CHANNEL_NAMESPACE).iter()
            .filter(|v| v["type"] == "SEEK")
            .map(|v| v["currentTime"].as_f64().unwrap())
            .collect();
        assert_eq!(seeks, [100.0, 25.0, 0.0]);
        Ok(())
    }

    #[tokio::test]
    async fn volume_is_cached_after_ack() -> Result<()> {
        let (fx, _fake) = fixture(Settings::default()).await?;

        let volume = fx.orchestrator.set_volume(0.3).await?;
        assert_eq!(volume.level, Some(0.3));
        assert_eq!(fx.orchestrator.snapshot().await?.volume.and_then(|v| v.level), Some(0.3));

        assert!(matches!(fx.orchestrator.set_volume(1.5).await, Err(Error::InvalidRequest(_))));
        assert_eq!(fx.orchestrator.snapshot().await?.volume.and_then(|v| v.level), Some(0.3));
        Ok(())
    }

    #[tokio::test]
    async fn toggle_and_stop() -> Result<()> {
        let (fx, _fake) = fixture(Settings::default()).await?;

        assert!(matches!(fx.orchestrator.toggle_playback().await, Err(Error::NoActiveSession)));

        fx.orchestrator.play(fx.playlist_id, fx.file_ids[0], false, false).await?;
        fx.orchestrator.toggle_playback().await?;
        assert_eq!(fx.orchestrator.snapshot().await?.state, PlaybackState::Paused);
        fx.orchestrator.toggle_playback().await?;
        assert_eq!(fx.orchestrator.snapshot().await?.state, PlaybackState::Playing);

        fx.orchestrator.stop_playback().await?;
        let snapshot = fx.orchestrator.snapshot().await?;
        assert_eq!((snapshot.state, snapshot.current), (PlaybackState::Idle, None));
        Ok(())
    }

    #[tokio::test]
    async fn user_play_wins_over_end_of_previous_file() -> Result<()> {
        let (fx, fake) = fixture(Settings::default()).await?;
        fx.orchestrator.play(fx.playlist_id, fx.file_ids[0], false, false).await?;

        fx.prober.set_delay(Some(Duration::from_millis(500)));
        let (res, ()) = tokio::join!(
            fx.orchestrator.play(fx.playlist_id, fx.file_ids[2], false, false),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                fake.push_media_status("IDLE", Some("FINISHED"), 100.0);
            });
        res?;

        let snapshot = fx.orchestrator.snapshot().await?;
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert_eq!(snapshot.current.map(|c| c.file_id), Some(fx.file_ids[2]));
        assert_eq!(snapshot.playlists[0].files[0].played_percentage, 100.0);
        assert_eq!(fake.count_type(media_payload::CHANNEL_NAMESPACE, "LOAD"), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_control_drops_media_session() -> Result<()> {
        let (fx, fake) = fixture(Settings::default()).await?;
        fx.orchestrator.play(fx.playlist_id, fx.file_ids[0], false, false).await?;

        fake.set_silent("PAUSE", true);
        assert!(matches!(fx.orchestrator.toggle_playback().await, Err(Error::Timeout(_))));

        let snapshot = fx.orchestrator.snapshot().await?;
        assert_eq!((snapshot.state, snapshot.current), (PlaybackState::Idle, None));
        assert!(snapshot.playlists[0].files.iter().all(|f| !f.is_playing));

        // Nothing left to stop on the receiver.
        fx.orchestrator.stop_playback().await?;
        assert_eq!(fake.count_type(media_payload::CHANNEL_NAMESPACE, "STOP"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_playlist() -> Result<()> {
        let (mut fx, _fake) = fixture(Settings::default()).await?;

        assert!(matches!(fx.orchestrator.play(99, 1, false, false).await,
                         Err(Error::PlaylistNotFound(99))));
        wait_for(&mut fx.events,
                 |e| *e == PlayerEvent::server_message(ServerMessage::PlaylistNotFound)).await;
        Ok(())
    }
}
