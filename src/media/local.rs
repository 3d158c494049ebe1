//! Local video and audio files, streamed through the file server.

use async_trait::async_trait;
use crate::{
    config::Settings,
    error::Result,
    media::{
        self, cancellable,
        probe::{MediaProber, ProbedInfo},
        server::{FileServer, PlayParams},
        FileKind, HwAccelKind, MediaRequestGenerator, PlayMediaRequest, StreamSelection,
        NO_STREAM,
    },
    payload::media::{CustomData, Media, StreamType, Track, TrackId, TrackType},
    playlist::QueuedFile,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const SUBTITLE_TRACK_ID: TrackId = 1;
const SUBTITLE_CONTENT_TYPE: &str = "text/vtt";

pub struct LocalRequestGenerator {
    prober: Arc<dyn MediaProber>,
}

/// Transcode decisions for one selection of streams.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct TranscodePlan {
    pub is_audio_only: bool,
    pub video_needs_transcode: bool,
    pub audio_needs_transcode: bool,
    pub hw_accel_kind: HwAccelKind,
}

impl TranscodePlan {
    pub fn decide(prober: &dyn MediaProber,
                  info: &ProbedInfo,
                  selection: &StreamSelection,
                  settings: &Settings)
    -> TranscodePlan
    {
        let is_audio_only = info.is_audio_only();

        let video_needs_transcode = !is_audio_only
            && prober.video_needs_transcode(selection.video_stream_index,
                                            settings.force_video_transcode,
                                            settings.video_scale,
                                            info);
        let audio_needs_transcode =
            prober.audio_needs_transcode(selection.audio_stream_index,
                                         settings.force_audio_transcode,
                                         info,
                                         is_audio_only);

        let hw_accel_kind = if video_needs_transcode {
            prober.hw_accel_kind(selection.video_stream_index, info,
                                 settings.enable_hardware_acceleration)
        } else {
            HwAccelKind::None
        };

        TranscodePlan {
            is_audio_only,
            video_needs_transcode,
            audio_needs_transcode,
            hw_accel_kind,
        }
    }

    pub fn is_transcoding(&self) -> bool {
        self.video_needs_transcode || self.audio_needs_transcode
    }
}

impl LocalRequestGenerator {
    pub fn new(prober: Arc<dyn MediaProber>) -> LocalRequestGenerator {
        LocalRequestGenerator { prober }
    }

    fn subtitle_track(server: &FileServer, file: &QueuedFile, info: &ProbedInfo,
                      seek_seconds: f64)
    -> Result<Option<Track>>
    {
        let index = file.selection.subtitle_stream_index;
        if index == NO_STREAM {
            return Ok(None);
        }
        let Some(stream) = info.subtitle(index) else {
            return Ok(None);
        };

        Ok(Some(Track {
            track_id: SUBTITLE_TRACK_ID,
            typ: TrackType::Text,
            track_content_id: Some(server.subtitles_url(&file.mrl, index, seek_seconds)?),
            track_content_type: Some(SUBTITLE_CONTENT_TYPE.to_string()),
            subtype: Some("SUBTITLES".to_string()),
            language: stream.language.clone(),
            name: stream.title.clone().or_else(|| stream.language.clone()),
        }))
    }
}

#[async_trait]
impl MediaRequestGenerator for LocalRequestGenerator {
    fn name(&self) -> &'static str {
        "local"
    }

    fn can_handle(&self, _mrl: &str, kind: FileKind) -> bool {
        kind.is_local && (kind.is_video || kind.is_audio)
    }

    async fn build_request(&self,
                           file: &mut QueuedFile,
                           settings: &Settings,
                           seek_seconds: f64,
                           options_changed: bool,
                           cancel: &CancellationToken)
    -> Result<PlayMediaRequest>
    {
        let info = cancellable(cancel, self.prober.get_file_info(&file.mrl)).await?;
        file.selection.reconcile(&info, options_changed,
                                 settings.load_first_subtitle_found_automatically);
        file.probed_info = Some(info.clone());

        let plan = TranscodePlan::decide(self.prober.as_ref(), &info, &file.selection, settings);

        let thumbnail = cancellable(cancel, async {
            Ok(self.prober.get_thumbnail(&file.mrl).await)
        }).await?;

        let server = FileServer::new(&settings.server_base_url)?;
        let thumbnail_url = thumbnail.map(|path| server.thumbnail_url(&path)).transpose()?;

        let selection = file.selection;
        let play_url = server.play_url(&PlayParams {
            file: &file.mrl,
            seconds: seek_seconds,
            video_needs_transcode: plan.video_needs_transcode,
            audio_needs_transcode: plan.audio_needs_transcode,
            video_stream_index: selection.video_stream_index,
            audio_stream_index: selection.audio_stream_index,
            hw_accel_kind: plan.hw_accel_kind,
            video_scale: settings.video_scale,
            selected_quality: selection.desired_quality(settings),
        })?;

        let content_type = media::content_type_for(&file.mrl, plan.is_audio_only,
                                                   plan.is_transcoding());
        let subtitle = Self::subtitle_track(&server, file, &info, seek_seconds)?;
        let active_track_ids = subtitle.as_ref().map(|t| vec![t.track_id]);

        let media = Media {
            content_id: play_url,
            stream_type: StreamType::Buffered,
            content_type: content_type.to_string(),
            metadata: Some(media::metadata(media::display_title(&file.mrl),
                                           plan.is_audio_only,
                                           thumbnail_url.as_deref())),
            duration: info.duration,
            tracks: subtitle.map(|t| vec![t]),
            custom_data: CustomData::new(),
        };

        Ok(PlayMediaRequest {
            video_stream_index: selection.video_stream_index,
            audio_stream_index: selection.audio_stream_index,
            subtitle_stream_index: selection.subtitle_stream_index,
            seek_seconds,
            video_needs_transcode: plan.video_needs_transcode,
            audio_needs_transcode: plan.audio_needs_transcode,
            hw_accel_kind: plan.hw_accel_kind,
            content_type: content_type.to_string(),
            source_urls: vec![file.mrl.clone()],
            thumbnail_url,
            media,
            active_track_ids,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::VideoScale,
        error::Error,
        media::probe::AudioStream,
        test_util::{self, MockProber},
    };

    const MOVIE: &str = "/media/movie.mkv";

    fn generator() -> (LocalRequestGenerator, Arc<MockProber>) {
        let prober = MockProber::new();
        prober.add_file(MOVIE, test_util::video_info(600.0));
        prober.set_thumbnail(Some("/tmp/thumbs/movie.jpg"));
        (LocalRequestGenerator::new(prober.clone()), prober)
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_payloads() -> Result<()> {
        let (generator, _prober) = generator();
        let settings = Settings::default();
        let cancel = CancellationToken::new();
        let mut file = QueuedFile::new(1, 1, MOVIE, 0);

        let first = generator.build_request(&mut file, &settings, 30.0, false, &cancel).await?;
        let second = generator.build_request(&mut file, &settings, 30.0, false, &cancel).await?;

        assert_eq!(first.opaque_payload()?, second.opaque_payload()?);
        assert_eq!(first, second);
        assert_eq!(first.subtitle_stream_index, 2);
        assert_eq!(first.active_track_ids, Some(vec![SUBTITLE_TRACK_ID]));
        assert!(first.thumbnail_url.as_deref().unwrap().contains("/images?file="));
        Ok(())
    }

    #[tokio::test]
    async fn forced_video_transcode_ignores_scale() -> Result<()> {
        let (generator, _prober) = generator();
        let settings = Settings {
            force_video_transcode: true,
            video_scale: VideoScale::Original,
            enable_hardware_acceleration: true,
            ..Settings::default()
        };
        let mut file = QueuedFile::new(1, 1, MOVIE, 0);

        let req = generator.build_request(&mut file, &settings, 0.0, false,
                                          &CancellationToken::new()).await?;

        assert!(req.video_needs_transcode);
        assert!(!req.audio_needs_transcode);
        assert_eq!(req.hw_accel_kind, HwAccelKind::Nvidia);
        assert_eq!(req.content_type, "video/mp4");
        assert!(req.media.content_id.contains("videoNeedsTranscode=true"));
        assert!(req.media.content_id.contains("hwAccelToUse=nvidia"));
        Ok(())
    }

    #[tokio::test]
    async fn changed_options_keep_no_subtitle() -> Result<()> {
        let (generator, _prober) = generator();
        let mut file = QueuedFile::new(1, 1, MOVIE, 0);
        file.selection.subtitle_stream_index = NO_STREAM;
        file.selection.audio_stream_index = 1;

        let req = generator.build_request(&mut file, &Settings::default(), 0.0, true,
                                          &CancellationToken::new()).await?;

        assert_eq!(req.subtitle_stream_index, NO_STREAM);
        assert_eq!(req.media.tracks, None);
        assert_eq!(req.active_track_ids, None);
        Ok(())
    }

    #[tokio::test]
    async fn audio_only_file() -> Result<()> {
        let prober = MockProber::new();
        prober.add_file("/music/song.flac", ProbedInfo {
            duration: Some(180.0),
            audios: vec![AudioStream { index: 0, codec_name: "flac".into(), language: None }],
            ..ProbedInfo::default()
        });
        let generator = LocalRequestGenerator::new(prober);
        let mut file = QueuedFile::new(1, 1, "/music/song.flac", 0);

        let req = generator.build_request(&mut file, &Settings::default(), 0.0, false,
                                          &CancellationToken::new()).await?;

        assert!(!req.video_needs_transcode && !req.audio_needs_transcode);
        assert_eq!(req.content_type, "audio/flac");
        assert_eq!(req.media.metadata.unwrap().metadata_type,
                   crate::payload::media::METADATA_TYPE_MUSIC_TRACK);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file() {
        let (generator, _prober) = generator();
        let mut file = QueuedFile::new(1, 1, "/media/gone.mp4", 0);

        let res = generator.build_request(&mut file, &Settings::default(), 0.0, false,
                                          &CancellationToken::new()).await;
        assert!(matches!(res, Err(Error::FileNotFound(_))));
        assert_eq!(file.probed_info, None);
    }

    #[tokio::test]
    async fn cancelled_probe() {
        let (generator, prober) = generator();
        prober.set_delay(Some(std::time::Duration::from_secs(30)));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut file = QueuedFile::new(1, 1, MOVIE, 0);

        let res = generator.build_request(&mut file, &Settings::default(), 0.0, false,
                                          &cancel).await;
        assert!(matches!(res, Err(Error::Cancelled)));
    }
}
