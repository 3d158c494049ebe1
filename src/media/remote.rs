//! Remote URLs decoded into playable streams: adaptive formats, HLS manifests
//! and plain single-quality formats.

use async_trait::async_trait;
use crate::{
    config::Settings,
    error::{Error, Result},
    media::{
        self, cancellable, closest_index, closest_index_i32,
        local::TranscodePlan,
        probe::{FullMedia, MediaProber, ProbedInfo, RemoteDecoder},
        server::{FileServer, PlayParams},
        FileKind, HwAccelKind, MediaRequestGenerator, PlayMediaRequest, StreamSelection,
        NO_STREAM,
    },
    payload::media::{CustomData, Media, StreamType},
    playlist::QueuedFile,
    util::named,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const HLS_CONTENT_TYPE: &str = "application/x-mpegurl";
const REMOTE_CONTENT_TYPE: &str = "video/mp4";

/// Decode `url` into its playable form.
#[named]
pub async fn resolve(decoder: &dyn RemoteDecoder, url: &str, desired_quality: u32)
-> Result<FullMedia>
{
    if !decoder.is_supported_url(url) {
        return Err(Error::FileNotSupported(url.to_string()));
    }

    let basic = decoder.parse_basic_info(url).await?;
    let mut full = decoder.parse(&basic, desired_quality).await?;

    if full.urls.is_empty() {
        return Err(Error::loading(url, "no playable stream"));
    }

    full.title = full.title.or(basic.title);
    full.thumbnail_url = full.thumbnail_url.or(basic.thumbnail_url);
    full.duration = full.duration.or(basic.duration);

    tracing::debug!(target: function_path!(),
                    url,
                    desired_quality,
                    is_hls = full.is_hls,
                    is_adaptive = full.is_adaptive,
                    qualities = ?full.qualities,
                    "decoded remote media");

    Ok(full)
}

fn remote_of(file: &QueuedFile) -> Result<&FullMedia> {
    file.remote.as_ref()
        .filter(|r| !r.urls.is_empty())
        .ok_or_else(|| Error::loading(file.mrl.clone(), "remote media not decoded"))
}

fn title_of(file: &QueuedFile, remote: &FullMedia) -> String {
    remote.title.clone().unwrap_or_else(|| media::display_title(&file.mrl))
}

/// Separately addressable quality URLs, already receiver compatible.
pub struct AdaptiveRequestGenerator {
    prober: Arc<dyn MediaProber>,
}

impl AdaptiveRequestGenerator {
    pub fn new(prober: Arc<dyn MediaProber>) -> AdaptiveRequestGenerator {
        AdaptiveRequestGenerator { prober }
    }
}

#[async_trait]
impl MediaRequestGenerator for AdaptiveRequestGenerator {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn can_handle(&self, _mrl: &str, kind: FileKind) -> bool {
        kind.is_url && kind.is_adaptive
    }

    async fn build_request(&self,
                           file: &mut QueuedFile,
                           settings: &Settings,
                           seek_seconds: f64,
                           options_changed: bool,
                           cancel: &CancellationToken)
    -> Result<PlayMediaRequest>
    {
        let remote = remote_of(file)?.clone();
        let first = &remote.urls[0];

        // Only used to keep stream indices meaningful.
        let info = cancellable(cancel, self.prober.get_file_info(first)).await?;
        file.selection.reconcile(&info, options_changed, false);
        file.probed_info = Some(info.clone());

        let selection = file.selection;
        let hw_accel_kind = self.prober.hw_accel_kind(selection.video_stream_index, &info,
                                                      settings.enable_hardware_acceleration);

        let server = FileServer::new(&settings.server_base_url)?;
        let content_id = server.play_url(&PlayParams {
            file: first,
            seconds: seek_seconds,
            video_needs_transcode: false,
            audio_needs_transcode: false,
            video_stream_index: selection.video_stream_index,
            audio_stream_index: selection.audio_stream_index,
            hw_accel_kind,
            video_scale: settings.video_scale,
            selected_quality: selection.desired_quality(settings),
        })?;

        let duration = remote.duration.or(info.duration);

        Ok(PlayMediaRequest {
            video_stream_index: selection.video_stream_index,
            audio_stream_index: selection.audio_stream_index,
            subtitle_stream_index: NO_STREAM,
            seek_seconds,
            video_needs_transcode: false,
            audio_needs_transcode: false,
            hw_accel_kind,
            content_type: REMOTE_CONTENT_TYPE.to_string(),
            source_urls: remote.urls.clone(),
            thumbnail_url: remote.thumbnail_url.clone(),
            media: Media {
                content_id,
                stream_type: StreamType::Buffered,
                content_type: REMOTE_CONTENT_TYPE.to_string(),
                metadata: Some(media::metadata(title_of(file, &remote), false,
                                               remote.thumbnail_url.as_deref())),
                duration,
                tracks: None,
                custom_data: CustomData::new(),
            },
            active_track_ids: None,
        })
    }
}

/// An adaptive bitrate manifest; the rendition closest to the desired quality
/// is chosen.
pub struct HlsRequestGenerator {
    prober: Arc<dyn MediaProber>,
}

impl HlsRequestGenerator {
    pub fn new(prober: Arc<dyn MediaProber>) -> HlsRequestGenerator {
        HlsRequestGenerator { prober }
    }

    /// Video rendition by height, then the audio track nearest to it by index.
    #[named]
    fn choose_streams(info: &ProbedInfo, desired_quality: u32, keep_audio: Option<i32>)
    -> (i32, i32)
    {
        let heights: Vec<u32> = info.videos.iter().map(|v| v.height).collect();
        let video = closest_index(&heights, desired_quality)
            .map_or(NO_STREAM, |i| info.videos[i].index);

        let audio = match keep_audio.filter(|idx| info.audio(*idx).is_some()) {
            Some(idx) => idx,
            None => {
                let indices: Vec<i32> = info.audios.iter().map(|a| a.index).collect();
                closest_index_i32(&indices, video.max(0))
                    .map_or(NO_STREAM, |i| info.audios[i].index)
            },
        };

        tracing::debug!(target: method_path!("HlsRequestGenerator"),
                        desired_quality,
                        video,
                        audio,
                        renditions = info.videos.len(),
                        "chose renditions");

        (video, audio)
    }
}

#[async_trait]
impl MediaRequestGenerator for HlsRequestGenerator {
    fn name(&self) -> &'static str {
        "hls"
    }

    fn can_handle(&self, _mrl: &str, kind: FileKind) -> bool {
        kind.is_url && kind.is_hls
    }

    async fn build_request(&self,
                           file: &mut QueuedFile,
                           settings: &Settings,
                           seek_seconds: f64,
                           options_changed: bool,
                           cancel: &CancellationToken)
    -> Result<PlayMediaRequest>
    {
        let remote = remote_of(file)?.clone();
        let manifest = &remote.urls[0];

        let mut info = cancellable(cancel, self.prober.get_file_info(manifest)).await?;
        info.duration = None;

        let desired_quality = file.selection.desired_quality(settings);
        let keep_audio = options_changed.then_some(file.selection.audio_stream_index);
        let (video, audio) = Self::choose_streams(&info, desired_quality, keep_audio);

        file.selection = StreamSelection {
            video_stream_index: video,
            audio_stream_index: audio,
            subtitle_stream_index: NO_STREAM,
            quality: file.selection.quality,
        };
        file.probed_info = Some(info.clone());

        let plan = TranscodePlan::decide(self.prober.as_ref(), &info, &file.selection, settings);

        let (content_id, content_type) = if plan.is_transcoding() {
            let server = FileServer::new(&settings.server_base_url)?;
            let url = server.play_url(&PlayParams {
                file: manifest,
                seconds: seek_seconds,
                video_needs_transcode: plan.video_needs_transcode,
                audio_needs_transcode: plan.audio_needs_transcode,
                video_stream_index: video,
                audio_stream_index: audio,
                hw_accel_kind: plan.hw_accel_kind,
                video_scale: settings.video_scale,
                selected_quality: desired_quality,
            })?;
            (url, media::content_type_for(manifest, plan.is_audio_only, true))
        } else {
            (manifest.clone(), HLS_CONTENT_TYPE)
        };

        Ok(PlayMediaRequest {
            video_stream_index: video,
            audio_stream_index: audio,
            subtitle_stream_index: NO_STREAM,
            seek_seconds,
            video_needs_transcode: plan.video_needs_transcode,
            audio_needs_transcode: plan.audio_needs_transcode,
            hw_accel_kind: plan.hw_accel_kind,
            content_type: content_type.to_string(),
            source_urls: vec![manifest.clone()],
            thumbnail_url: remote.thumbnail_url.clone(),
            media: Media {
                content_id,
                stream_type: StreamType::Live,
                content_type: content_type.to_string(),
                metadata: Some(media::metadata(title_of(file, &remote), plan.is_audio_only,
                                               remote.thumbnail_url.as_deref())),
                duration: None,
                tracks: None,
                custom_data: CustomData::new(),
            },
            active_track_ids: None,
        })
    }
}

/// Pre-packaged single-quality URLs; playback is delegated to the chosen URL.
#[derive(Default)]
pub struct FormatsRequestGenerator;

impl FormatsRequestGenerator {
    pub fn new() -> FormatsRequestGenerator {
        FormatsRequestGenerator
    }
}

#[async_trait]
impl MediaRequestGenerator for FormatsRequestGenerator {
    fn name(&self) -> &'static str {
        "formats"
    }

    fn can_handle(&self, _mrl: &str, kind: FileKind) -> bool {
        kind.is_url && !kind.is_hls && !kind.is_adaptive
    }

    async fn build_request(&self,
                           file: &mut QueuedFile,
                           settings: &Settings,
                           seek_seconds: f64,
                           options_changed: bool,
                           _cancel: &CancellationToken)
    -> Result<PlayMediaRequest>
    {
        let remote = remote_of(file)?.clone();

        file.probed_info = Some(ProbedInfo::unknown());
        if !options_changed {
            file.selection = StreamSelection {
                quality: file.selection.quality,
                ..StreamSelection::default()
            };
        }

        let desired_quality = file.selection.desired_quality(settings);
        let url_index = closest_index(&remote.qualities, desired_quality)
            .filter(|i| *i < remote.urls.len())
            .unwrap_or(0);
        let url = remote.urls[url_index].clone();

        Ok(PlayMediaRequest {
            video_stream_index: file.selection.video_stream_index,
            audio_stream_index: file.selection.audio_stream_index,
            subtitle_stream_index: NO_STREAM,
            seek_seconds,
            video_needs_transcode: false,
            audio_needs_transcode: false,
            hw_accel_kind: HwAccelKind::None,
            content_type: REMOTE_CONTENT_TYPE.to_string(),
            source_urls: vec![url.clone()],
            thumbnail_url: remote.thumbnail_url.clone(),
            media: Media {
                content_id: url,
                stream_type: StreamType::Buffered,
                content_type: REMOTE_CONTENT_TYPE.to_string(),
                metadata: Some(media::metadata(title_of(file, &remote), false,
                                               remote.thumbnail_url.as_deref())),
                duration: None,
                tracks: None,
                custom_data: CustomData::new(),
            },
            active_track_ids: None,
        })
    }
}
