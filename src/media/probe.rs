//! Collaborators that inspect media: the local prober and the remote URL decoder.
//!
//! Both are external services; only their inputs and outputs are modelled here.

use async_trait::async_trait;
use crate::{
    config::VideoScale,
    error::Result,
    media::HwAccelKind,
};
use serde::{Deserialize, Serialize};

/// Video codecs a receiver plays without transcoding.
pub const SUPPORTED_VIDEO_CODECS: &[&str] = &["h264"];

pub const SUPPORTED_VIDEO_PROFILES: &[&str] = &["Baseline", "Constrained Baseline", "Main", "High"];

/// H.264 level 4.1, as reported by ffprobe.
pub const MAX_VIDEO_LEVEL: i32 = 41;

pub const SUPPORTED_PIXEL_FORMATS: &[&str] = &["yuv420p"];

pub const SUPPORTED_AUDIO_CODECS: &[&str] = &["aac", "mp3", "opus", "vorbis", "flac"];

/// Transfer characteristics of HDR video.
const HDR_COLOR_TRANSFERS: &[&str] = &["smpte2084", "arib-std-b67"];

/// Result of probing one media resource.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbedInfo {
    /// Seconds; `None` when unknown, e.g. live streams.
    pub duration: Option<f64>,

    #[serde(default)]
    pub videos: Vec<VideoStream>,

    #[serde(default)]
    pub audios: Vec<AudioStream>,

    #[serde(default)]
    pub subtitles: Vec<SubtitleStream>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStream {
    pub index: i32,
    pub codec_name: String,
    pub profile: Option<String>,
    pub level: Option<i32>,
    pub width: u32,
    pub height: u32,
    pub pix_fmt: Option<String>,
    pub color_transfer: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStream {
    pub index: i32,
    pub codec_name: String,
    pub language: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleStream {
    pub index: i32,
    pub codec_name: String,
    pub language: Option<String>,
    pub title: Option<String>,
}

impl ProbedInfo {
    /// Placeholder for media that cannot be probed.
    pub fn unknown() -> ProbedInfo {
        ProbedInfo::default()
    }

    pub fn video(&self, index: i32) -> Option<&VideoStream> {
        self.videos.iter().find(|s| s.index == index)
    }

    pub fn audio(&self, index: i32) -> Option<&AudioStream> {
        self.audios.iter().find(|s| s.index == index)
    }

    pub fn subtitle(&self, index: i32) -> Option<&SubtitleStream> {
        self.subtitles.iter().find(|s| s.index == index)
    }

    pub fn is_audio_only(&self) -> bool {
        self.videos.is_empty() && !self.audios.is_empty()
    }
}

impl VideoStream {
    pub fn is_hdr(&self) -> bool {
        self.color_transfer.as_deref()
            .is_some_and(|t| HDR_COLOR_TRANSFERS.contains(&t))
    }
}

/// Probing and transcode decisions for local files and manifests.
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Fails with `FileNotFound` when `mrl` doesn't exist.
    async fn get_file_info(&self, mrl: &str) -> Result<ProbedInfo>;

    /// Path of a thumbnail image for `mrl`, generating one if needed.
    async fn get_thumbnail(&self, mrl: &str) -> Option<String>;

    fn video_needs_transcode(&self,
                             stream_index: i32,
                             force: bool,
                             scale: VideoScale,
                             info: &ProbedInfo)
    -> bool
    {
        if force {
            return true;
        }

        let Some(video) = info.video(stream_index) else {
            return false;
        };

        let codec_ok = SUPPORTED_VIDEO_CODECS.contains(&video.codec_name.as_str());
        let profile_ok = video.profile.as_deref()
            .map_or(true, |p| SUPPORTED_VIDEO_PROFILES.contains(&p));
        let level_ok = video.level.map_or(true, |l| l <= MAX_VIDEO_LEVEL);
        let pix_fmt_ok = video.pix_fmt.as_deref()
            .map_or(true, |f| SUPPORTED_PIXEL_FORMATS.contains(&f));
        let scale_ok = scale.width().map_or(true, |w| w == video.width);

        !(codec_ok && profile_ok && level_ok && pix_fmt_ok && scale_ok) || video.is_hdr()
    }

    fn audio_needs_transcode(&self,
                             stream_index: i32,
                             force: bool,
                             info: &ProbedInfo,
                             is_audio_only: bool)
    -> bool
    {
        if force {
            return true;
        }

        let Some(audio) = info.audio(stream_index) else {
            return false;
        };

        // Receivers only play flac as a standalone audio file.
        if audio.codec_name == "flac" && !is_audio_only {
            return true;
        }

        !SUPPORTED_AUDIO_CODECS.contains(&audio.codec_name.as_str())
    }

    /// Accelerator to transcode `stream_index` with; `None` unless `enabled`.
    fn hw_accel_kind(&self, _stream_index: i32, _info: &ProbedInfo, _enabled: bool)
    -> HwAccelKind
    {
        HwAccelKind::None
    }
}

/// What a remote URL decoder learns before choosing a quality.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicMedia {
    pub url: String,
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration: Option<f64>,
}

/// Playable URLs for a remote source.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullMedia {
    /// `urls[0]` is an adaptive bitrate manifest.
    pub is_hls: bool,

    /// `urls` are separately addressable single-quality streams, video first.
    pub is_adaptive: bool,

    pub urls: Vec<String>,

    /// Heights offered; for plain formats `qualities[i]` is served by `urls[i]`.
    pub qualities: Vec<u32>,

    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration: Option<f64>,
}

/// Extracts playable streams from web pages of video hosting sites.
#[async_trait]
pub trait RemoteDecoder: Send + Sync {
    fn is_supported_url(&self, url: &str) -> bool;

    async fn parse_basic_info(&self, url: &str) -> Result<BasicMedia>;

    async fn parse(&self, basic: &BasicMedia, desired_quality: u32) -> Result<FullMedia>;
}

#[cfg(test)]
mod test {
    use super::*;

    struct DefaultRules;

    #[async_trait]
    impl MediaProber for DefaultRules {
        async fn get_file_info(&self, _mrl: &str) -> Result<ProbedInfo> {
            Ok(ProbedInfo::unknown())
        }

        async fn get_thumbnail(&self, _mrl: &str) -> Option<String> {
            None
        }
    }

    fn info(video: VideoStream, audio_codec: &str) -> ProbedInfo {
        ProbedInfo {
            duration: Some(60.0),
            videos: vec![video],
            audios: vec![AudioStream { index: 1, codec_name: audio_codec.into(), language: None }],
            subtitles: Vec::new(),
        }
    }

    fn h264_1080p() -> VideoStream {
        VideoStream {
            index: 0,
            codec_name: "h264".into(),
            profile: Some("High".into()),
            level: Some(41),
            width: 1920,
            height: 1080,
            pix_fmt: Some("yuv420p".into()),
            color_transfer: None,
        }
    }

    #[test]
    fn compatible_video_plays_directly() {
        let info = info(h264_1080p(), "aac");
        assert!(!DefaultRules.video_needs_transcode(0, false, VideoScale::Original, &info));
        assert!(!DefaultRules.video_needs_transcode(0, false, VideoScale::FullHd, &info));
        assert!(!DefaultRules.audio_needs_transcode(1, false, &info, false));
    }

    #[test]
    fn force_wins() {
        let info = info(h264_1080p(), "aac");
        assert!(DefaultRules.video_needs_transcode(0, true, VideoScale::Original, &info));
        assert!(DefaultRules.audio_needs_transcode(1, true, &info, false));
    }

    #[test]
    fn incompatible_streams_transcode() {
        let hevc = VideoStream { codec_name: "hevc".into(), ..h264_1080p() };
        assert!(DefaultRules.video_needs_transcode(0, false, VideoScale::Original,
                                                   &info(hevc, "aac")));

        let high_level = VideoStream { level: Some(51), ..h264_1080p() };
        assert!(DefaultRules.video_needs_transcode(0, false, VideoScale::Original,
                                                   &info(high_level, "aac")));

        let hdr = VideoStream { color_transfer: Some("smpte2084".into()), ..h264_1080p() };
        assert!(DefaultRules.video_needs_transcode(0, false, VideoScale::Original,
                                                   &info(hdr, "aac")));

        assert!(DefaultRules.video_needs_transcode(0, false, VideoScale::Hd,
                                                   &info(h264_1080p(), "aac")));

        let ac3 = info(h264_1080p(), "ac3");
        assert!(DefaultRules.audio_needs_transcode(1, false, &ac3, false));

        let flac = info(h264_1080p(), "flac");
        assert!(DefaultRules.audio_needs_transcode(1, false, &flac, false));
        assert!(!DefaultRules.audio_needs_transcode(1, false, &flac, true));
    }
}
