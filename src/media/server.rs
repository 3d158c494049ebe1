//! URLs served by the external file server that streams (and transcodes) media.

use crate::{
    config::VideoScale,
    error::{Error, Result},
    media::HwAccelKind,
};
use url::Url;

pub const PLAY_PATH: &str = "/videos";
pub const IMAGES_PATH: &str = "/images";
pub const SUBTITLES_PATH: &str = "/subtitles";

#[derive(Clone, Debug)]
pub struct FileServer {
    base: Url,
}

/// Query of a play URL.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayParams<'a> {
    pub file: &'a str,
    pub seconds: f64,
    pub video_needs_transcode: bool,
    pub audio_needs_transcode: bool,
    pub video_stream_index: i32,
    pub audio_stream_index: i32,
    pub hw_accel_kind: HwAccelKind,
    pub video_scale: VideoScale,
    pub selected_quality: u32,
}

impl FileServer {
    pub fn new(base_url: &str) -> Result<FileServer> {
        let base = Url::parse(base_url)
            .map_err(|err| Error::InvalidRequest(format!("server base url {base_url:?}: {err}")))?;

        Ok(FileServer { base })
    }

    pub fn play_url(&self, params: &PlayParams) -> Result<String> {
        let mut url = self.join(PLAY_PATH)?;
        url.query_pairs_mut()
            .append_pair("seconds", &params.seconds.to_string())
            .append_pair("file", params.file)
            .append_pair("videoNeedsTranscode", &params.video_needs_transcode.to_string())
            .append_pair("audioNeedsTranscode", &params.audio_needs_transcode.to_string())
            .append_pair("videoStreamIndex", &params.video_stream_index.to_string())
            .append_pair("audioStreamIndex", &params.audio_stream_index.to_string())
            .append_pair("hwAccelToUse", params.hw_accel_kind.as_query_value())
            .append_pair("videoScale", params.video_scale.as_query_value())
            .append_pair("selectedQuality", &params.selected_quality.to_string());

        Ok(url.into())
    }

    pub fn thumbnail_url(&self, path: &str) -> Result<String> {
        let mut url = self.join(IMAGES_PATH)?;
        url.query_pairs_mut().append_pair("file", path);
        Ok(url.into())
    }

    pub fn subtitles_url(&self, file: &str, stream_index: i32, seconds: f64) -> Result<String> {
        let mut url = self.join(SUBTITLES_PATH)?;
        url.query_pairs_mut()
            .append_pair("file", file)
            .append_pair("streamIndex", &stream_index.to_string())
            .append_pair("seconds", &seconds.to_string());
        Ok(url.into())
    }

    fn join(&self, path: &str) -> Result<Url> {
        self.base.join(path)
            .map_err(|err| Error::InvalidRequest(format!("server url {path:?}: {err}")))
    }
}
