//! Turning a queued file into a receiver-ready load request.
//!
//! A [`GeneratorRegistry`] holds the strategies in priority order: local files,
//! then remote adaptive formats, HLS manifests and plain remote formats. The
//! first [`MediaRequestGenerator`] whose `can_handle` accepts the file builds the
//! [`PlayMediaRequest`].

pub mod local;
pub mod probe;
pub mod remote;
pub mod server;

use async_trait::async_trait;
use crate::{
    config::Settings,
    error::{Error, Result},
    payload::media::{CustomData, Image, Media, Metadata, TrackId,
                     METADATA_TYPE_GENERIC, METADATA_TYPE_MUSIC_TRACK},
    playlist::QueuedFile,
    util::named,
};
use futures::Future;
use probe::{FullMedia, MediaProber, ProbedInfo, RemoteDecoder};
use serde::{Deserialize, Serialize};
use std::{path::Path, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Stream index meaning "none selected".
pub const NO_STREAM: i32 = -1;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mkv", "webm", "avi", "mov", "mpeg", "mpg", "ts", "wmv", "flv",
];

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "aac", "m4a", "flac", "ogg", "opus", "wav", "wma",
];

/// GPU vendor path used when transcoding video.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HwAccelKind {
    #[default]
    None,
    Intel,
    Nvidia,
    Amd,
}

impl HwAccelKind {
    pub fn as_query_value(self) -> &'static str {
        match self {
            HwAccelKind::None => "none",
            HwAccelKind::Intel => "intel",
            HwAccelKind::Nvidia => "nvidia",
            HwAccelKind::Amd => "amd",
        }
    }
}

/// Coarse classification of an MRL, input to `can_handle`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FileKind {
    pub is_local: bool,
    pub is_url: bool,
    pub is_video: bool,
    pub is_audio: bool,
    pub is_hls: bool,
    pub is_adaptive: bool,
}

impl FileKind {
    /// `remote` is the decoded form of a URL, when known.
    pub fn of(mrl: &str, remote: Option<&FullMedia>) -> FileKind {
        if is_url(mrl) {
            return FileKind {
                is_url: true,
                is_video: true,
                is_hls: remote.is_some_and(|r| r.is_hls),
                is_adaptive: remote.is_some_and(|r| r.is_adaptive && !r.is_hls),
                ..FileKind::default()
            };
        }

        let ext = extension(mrl);
        FileKind {
            is_local: true,
            is_video: VIDEO_EXTENSIONS.contains(&ext.as_str()),
            is_audio: AUDIO_EXTENSIONS.contains(&ext.as_str()),
            ..FileKind::default()
        }
    }
}

pub fn is_url(mrl: &str) -> bool {
    let lower = mrl.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn extension(mrl: &str) -> String {
    Path::new(mrl).extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Streams chosen for a file, kept across plays.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSelection {
    pub video_stream_index: i32,
    pub audio_stream_index: i32,
    pub subtitle_stream_index: i32,

    /// Desired height for remote media; `None` follows the settings.
    pub quality: Option<u32>,
}

impl Default for StreamSelection {
    fn default() -> StreamSelection {
        StreamSelection {
            video_stream_index: NO_STREAM,
            audio_stream_index: NO_STREAM,
            subtitle_stream_index: NO_STREAM,
            quality: None,
        }
    }
}

impl StreamSelection {
    /// Make the selection valid for `info`.
    ///
    /// Indices that exist in `info` are kept; unset or stale ones fall back to
    /// the first stream. An unset subtitle is only filled in on a fresh play
    /// with `load_first_subtitle`; after a user change "none" stays "none".
    pub fn reconcile(&mut self, info: &ProbedInfo, options_changed: bool,
                     load_first_subtitle: bool)
    {
        if info.video(self.video_stream_index).is_none() {
            self.video_stream_index = info.videos.first().map_or(NO_STREAM, |s| s.index);
        }

        if info.audio(self.audio_stream_index).is_none() {
            self.audio_stream_index = info.audios.first().map_or(NO_STREAM, |s| s.index);
        }

        if self.subtitle_stream_index != NO_STREAM
            && info.subtitle(self.subtitle_stream_index).is_none()
        {
            self.subtitle_stream_index = NO_STREAM;
        }

        if self.subtitle_stream_index == NO_STREAM && !options_changed && load_first_subtitle {
            self.subtitle_stream_index = info.subtitles.first().map_or(NO_STREAM, |s| s.index);
        }
    }

    pub fn desired_quality(&self, settings: &Settings) -> u32 {
        self.quality.unwrap_or(settings.current_video_quality)
    }
}

/// Everything needed to issue one LOAD. Built once per load.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayMediaRequest {
    pub video_stream_index: i32,
    pub audio_stream_index: i32,
    pub subtitle_stream_index: i32,
    pub seek_seconds: f64,
    pub video_needs_transcode: bool,
    pub audio_needs_transcode: bool,
    pub hw_accel_kind: HwAccelKind,
    pub content_type: String,
    pub source_urls: Vec<String>,
    pub thumbnail_url: Option<String>,

    /// Media description sent to the receiver, without custom data.
    pub media: Media,

    pub active_track_ids: Option<Vec<TrackId>>,
}

/// The part of a request echoed back to the file server through the receiver.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OpaquePayload<'a> {
    video_stream_index: i32,
    audio_stream_index: i32,
    subtitle_stream_index: i32,
    seek_seconds: f64,
    video_needs_transcode: bool,
    audio_needs_transcode: bool,
    hw_accel_kind: HwAccelKind,
    content_type: &'a str,
    source_urls: &'a [String],
    thumbnail_url: Option<&'a str>,
}

impl PlayMediaRequest {
    pub fn is_transcoding(&self) -> bool {
        self.video_needs_transcode || self.audio_needs_transcode
    }

    /// Start position for LOAD. A transcoded stream already starts at the seek
    /// position, so the receiver starts it at 0.
    pub fn load_current_time(&self) -> f64 {
        if self.is_transcoding() {
            0.0
        } else {
            self.seek_seconds
        }
    }

    pub fn opaque_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.opaque())?)
    }

    pub fn opaque_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.opaque())?)
    }

    /// `media` with the opaque payload attached as custom data.
    pub fn load_media(&self) -> Result<Media> {
        let mut media = self.media.clone();
        media.custom_data = CustomData(self.opaque_value()?);
        Ok(media)
    }

    fn opaque(&self) -> OpaquePayload<'_> {
        OpaquePayload {
            video_stream_index: self.video_stream_index,
            audio_stream_index: self.audio_stream_index,
            subtitle_stream_index: self.subtitle_stream_index,
            seek_seconds: self.seek_seconds,
            video_needs_transcode: self.video_needs_transcode,
            audio_needs_transcode: self.audio_needs_transcode,
            hw_accel_kind: self.hw_accel_kind,
            content_type: &self.content_type,
            source_urls: &self.source_urls,
            thumbnail_url: self.thumbnail_url.as_deref(),
        }
    }
}

/// A strategy that turns one kind of file into a [`PlayMediaRequest`].
#[async_trait]
pub trait MediaRequestGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, mrl: &str, kind: FileKind) -> bool;

    /// May update `file`'s probed info and stream selection.
    async fn build_request(&self,
                           file: &mut QueuedFile,
                           settings: &Settings,
                           seek_seconds: f64,
                           options_changed: bool,
                           cancel: &CancellationToken)
    -> Result<PlayMediaRequest>;
}

pub struct GeneratorRegistry {
    generators: Vec<Arc<dyn MediaRequestGenerator>>,
    decoder: Arc<dyn RemoteDecoder>,
}

impl GeneratorRegistry {
    /// Standard strategies, in priority order.
    pub fn new(prober: Arc<dyn MediaProber>, decoder: Arc<dyn RemoteDecoder>)
    -> GeneratorRegistry
    {
        GeneratorRegistry::with_generators(vec![
            Arc::new(local::LocalRequestGenerator::new(Arc::clone(&prober))),
            Arc::new(remote::AdaptiveRequestGenerator::new(Arc::clone(&prober))),
            Arc::new(remote::HlsRequestGenerator::new(prober)),
            Arc::new(remote::FormatsRequestGenerator::new()),
        ], decoder)
    }

    pub fn with_generators(generators: Vec<Arc<dyn MediaRequestGenerator>>,
                           decoder: Arc<dyn RemoteDecoder>)
    -> GeneratorRegistry
    {
        GeneratorRegistry { generators, decoder }
    }

    /// First generator accepting the file.
    pub fn select(&self, mrl: &str, kind: FileKind) -> Option<&Arc<dyn MediaRequestGenerator>> {
        self.generators.iter().find(|g| g.can_handle(mrl, kind))
    }

    /// Decode remote info if needed, pick a generator and build the request.
    ///
    /// Collaborator failures other than a missing file come back as
    /// `ErrorLoadingFile`.
    #[named]
    pub async fn build(&self,
                       file: &mut QueuedFile,
                       settings: &Settings,
                       seek_seconds: f64,
                       options_changed: bool,
                       cancel: &CancellationToken)
    -> Result<PlayMediaRequest>
    {
        const METHOD_PATH: &str = method_path!("GeneratorRegistry");

        let res = async {
            if is_url(&file.mrl) && (file.remote.is_none() || options_changed) {
                let quality = file.selection.desired_quality(settings);
                let full = cancellable(cancel, remote::resolve(self.decoder.as_ref(),
                                                               &file.mrl, quality)).await?;
                file.remote = Some(full);
            }

            let kind = FileKind::of(&file.mrl, file.remote.as_ref());
            let Some(generator) = self.select(&file.mrl, kind) else {
                return Err(Error::FileNotSupported(file.mrl.clone()));
            };

            tracing::debug!(target: METHOD_PATH,
                            generator = generator.name(),
                            mrl = file.mrl,
                            ?kind,
                            seek_seconds,
                            options_changed,
                            "building request");

            generator.build_request(file, settings, seek_seconds, options_changed, cancel).await
        }.await;

        res.map_err(|err| match err {
            Error::FileNotFound(_) | Error::FileNotSupported(_) | Error::Cancelled
            | Error::ErrorLoadingFile { .. } | Error::ProbingFailed { .. } => err,
            other => Error::loading(file.mrl.clone(), other),
        })
    }
}

/// Run `fut` unless `cancel` fires first.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where F: Future<Output = Result<T>>
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}

/// Index of the candidate numerically closest to `desired`; the first wins a tie.
pub fn closest_index(candidates: &[u32], desired: u32) -> Option<usize> {
    candidates.iter()
        .enumerate()
        .min_by_key(|(_, &c)| (i64::from(c) - i64::from(desired)).abs())
        .map(|(i, _)| i)
}

/// Same as [`closest_index`] for signed values, e.g. stream indices.
pub fn closest_index_i32(candidates: &[i32], desired: i32) -> Option<usize> {
    candidates.iter()
        .enumerate()
        .min_by_key(|(_, &c)| (i64::from(c) - i64::from(desired)).abs())
        .map(|(i, _)| i)
}

/// MIME type the receiver is told to expect.
pub fn content_type_for(mrl: &str, is_audio_only: bool, transcoding: bool) -> &'static str {
    if transcoding {
        return if is_audio_only { "audio/aac" } else { "video/mp4" };
    }

    match extension(mrl).as_str() {
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "aac" | "m4a" => "audio/mp4",
        "flac" => "audio/flac",
        "ogg" | "opus" => "audio/ogg",
        "wav" => "audio/wav",
        _ if is_audio_only => "audio/mpeg",
        _ => "video/mp4",
    }
}

/// Display name of an MRL: the file name for paths, the URL otherwise.
pub fn display_title(mrl: &str) -> String {
    if is_url(mrl) {
        return mrl.to_string();
    }

    Path::new(mrl).file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(mrl)
        .to_string()
}

pub(crate) fn metadata(title: String, is_audio_only: bool, thumbnail_url: Option<&str>)
-> Metadata
{
    let mut metadata = Metadata::new(
        if is_audio_only { METADATA_TYPE_MUSIC_TRACK } else { METADATA_TYPE_GENERIC });
    metadata.title = Some(title);
    metadata.images = thumbnail_url.into_iter()
        .map(|url| Image { url: url.to_string(), width: None, height: None })
        .collect();
    metadata
}

#[cfg(test)]
mod test {
    use super::*;
    use probe::{AudioStream, SubtitleStream, VideoStream};

    #[test]
    fn closest_quality() {
        assert_eq!(closest_index(&[240, 360, 480, 720], 500), Some(2));
        assert_eq!(closest_index(&[360, 720], 540), Some(0));
        assert_eq!(closest_index(&[1080], 240), Some(0));
        assert_eq!(closest_index(&[], 720), None);
        assert_eq!(closest_index_i32(&[1, 3, 5], 4), Some(1));
    }

    #[test]
    fn file_kinds() {
        let local = FileKind::of("/media/Movie.MKV", None);
        assert!(local.is_local && local.is_video && !local.is_audio);

        let song = FileKind::of("/media/song.flac", None);
        assert!(song.is_local && song.is_audio);

        let hls = FullMedia { is_hls: true, ..FullMedia::default() };
        let url = FileKind::of("https://example.com/watch?v=1", Some(&hls));
        assert!(url.is_url && url.is_hls && !url.is_adaptive);

        let unknown = FileKind::of("/media/notes.txt", None);
        assert!(!unknown.is_video && !unknown.is_audio);
    }

    fn probed() -> ProbedInfo {
        ProbedInfo {
            duration: Some(10.0),
            videos: vec![VideoStream { index: 0, ..VideoStream::default() }],
            audios: vec![AudioStream { index: 1, ..AudioStream::default() },
                         AudioStream { index: 2, ..AudioStream::default() }],
            subtitles: vec![SubtitleStream { index: 3, ..SubtitleStream::default() }],
        }
    }

    #[test]
    fn selection_defaults_and_keeps_valid() {
        let mut sel = StreamSelection::default();
        sel.reconcile(&probed(), false, true);
        assert_eq!((sel.video_stream_index, sel.audio_stream_index, sel.subtitle_stream_index),
                   (0, 1, 3));

        let mut sel = StreamSelection { audio_stream_index: 2,
                                        subtitle_stream_index: NO_STREAM,
                                        ..StreamSelection::default() };
        sel.reconcile(&probed(), true, true);
        assert_eq!((sel.audio_stream_index, sel.subtitle_stream_index), (2, NO_STREAM));

        let mut sel = StreamSelection { audio_stream_index: 9, ..StreamSelection::default() };
        sel.reconcile(&probed(), false, false);
        assert_eq!((sel.audio_stream_index, sel.subtitle_stream_index), (1, NO_STREAM));
    }

    #[test]
    fn transcoded_load_starts_at_zero() {
        let req = PlayMediaRequest {
            video_stream_index: 0,
            audio_stream_index: 1,
            subtitle_stream_index: NO_STREAM,
            seek_seconds: 30.0,
            video_needs_transcode: false,
            audio_needs_transcode: true,
            hw_accel_kind: HwAccelKind::None,
            content_type: "video/mp4".into(),
            source_urls: vec!["/a.mkv".into()],
            thumbnail_url: None,
            media: Media {
                content_id: "http://x/videos".into(),
                stream_type: Default::default(),
                content_type: "video/mp4".into(),
                metadata: None,
                duration: None,
                tracks: None,
                custom_data: CustomData::new(),
            },
            active_track_ids: None,
        };

        assert_eq!(req.load_current_time(), 0.0);
        assert_eq!(PlayMediaRequest { audio_needs_transcode: false, ..req.clone() }
                       .load_current_time(), 30.0);
        assert_eq!(req.load_media().unwrap().custom_data.0["seekSeconds"], 30.0);
    }
}
