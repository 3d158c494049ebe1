//! Device connection parameters and player settings.

use crate::{
    error::{Error, Result},
    types::{EndpointId, EndpointIdConst},
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

pub const DEFAULT_SENDER_ID: EndpointIdConst = "sender-0";
pub const DEFAULT_RECEIVER_ID: EndpointIdConst = "receiver-0";

pub const DEFAULT_PORT: u16 = 8009;

/// Well known cast receiver app IDs
pub mod app {
    use crate::types::AppIdConst;

    pub const DEFAULT_MEDIA_RECEIVER: AppIdConst = "CC1AD845";
    pub const BACKDROP: AppIdConst = "E8C28D3C";
}

/// Duration for an RPC request and response to the receiver.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Intervals without any heartbeat traffic before the session is torn down.
pub const DEFAULT_HEARTBEAT_MISSED_BUDGET: u32 = 3;

#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub addr: SocketAddr,

    /// `EndpointId` used as the sender, and source of messages we send.
    pub sender: EndpointId,

    pub rpc_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_missed_budget: u32,
}

impl DeviceConfig {
    pub fn new(addr: SocketAddr) -> DeviceConfig {
        DeviceConfig {
            addr,
            sender: DEFAULT_SENDER_ID.to_string(),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_missed_budget: DEFAULT_HEARTBEAT_MISSED_BUDGET,
        }
    }

    /// Silence after which the connection is considered dead.
    pub fn heartbeat_window(&self) -> Duration {
        self.heartbeat_interval * self.heartbeat_missed_budget.max(1)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum VideoScale {
    #[default]
    Original,

    /// 1280x720
    Hd,

    /// 1920x1080
    FullHd,
}

impl VideoScale {
    /// Target width, `None` to keep the source size.
    pub fn width(self) -> Option<u32> {
        match self {
            VideoScale::Original => None,
            VideoScale::Hd => Some(1280),
            VideoScale::FullHd => Some(1920),
        }
    }

    pub fn as_query_value(self) -> &'static str {
        match self {
            VideoScale::Original => "0",
            VideoScale::Hd => "1280",
            VideoScale::FullHd => "1920",
        }
    }
}

/// Player settings, as read from the user's settings file.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub play_next_file_automatically: bool,
    pub force_video_transcode: bool,
    pub force_audio_transcode: bool,
    pub video_scale: VideoScale,
    pub enable_hardware_acceleration: bool,

    /// Desired video height for remote and HLS media.
    pub current_video_quality: u32,

    /// Seconds skipped when a file starts from the beginning.
    pub start_files_from: f64,

    pub load_first_subtitle_found_automatically: bool,

    /// Base URL of the file server that streams local and transcoded media.
    pub server_base_url: String,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            play_next_file_automatically: true,
            force_video_transcode: false,
            force_audio_transcode: false,
            video_scale: VideoScale::Original,
            enable_hardware_acceleration: false,
            current_video_quality: 1080,
            start_files_from: 0.0,
            load_first_subtitle_found_automatically: true,
            server_base_url: "http://127.0.0.1:9696".to_string(),
        }
    }
}

impl Settings {
    pub fn from_toml_str(s: &str) -> Result<Settings> {
        toml::from_str(s)
            .map_err(|err| Error::InvalidRequest(format!("settings: {err}")))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() -> Result<()> {
        let settings = Settings::from_toml_str(r#"
            forceVideoTranscode = true
            videoScale = "FullHd"
            currentVideoQuality = 720
        "#)?;

        assert!(settings.force_video_transcode);
        assert_eq!(settings.video_scale, VideoScale::FullHd);
        assert_eq!(settings.current_video_quality, 720);
        assert!(settings.play_next_file_automatically);
        assert_eq!(settings.start_files_from, 0.0);

        Ok(())
    }

    #[test]
    fn bad_toml_is_invalid_request() {
        assert!(matches!(Settings::from_toml_str("videoScale = 3"),
                         Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn heartbeat_window() {
        let mut config = DeviceConfig::new(([127, 0, 0, 1], DEFAULT_PORT).into());
        assert_eq!(config.heartbeat_window(), Duration::from_secs(15));

        config.heartbeat_missed_budget = 0;
        assert_eq!(config.heartbeat_window(), DEFAULT_HEARTBEAT_INTERVAL);
    }
}
