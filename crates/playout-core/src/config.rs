use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PlayoutError, PlayoutResult};
use crate::format::VideoFormat;

/// How the channel image is fitted into the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stretch {
    None,
    Uniform,
    #[default]
    Fill,
    UniformToFill,
}

/// Display aspect ratio override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "4:3")]
    Aspect4x3,
    #[serde(rename = "16:9")]
    Aspect16x9,
}

/// Colour handling requested from the presentation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ColourSpace {
    #[default]
    Rgb,
    DatavideoFull,
    DatavideoLimited,
}

impl ColourSpace {
    pub fn is_datavideo(&self) -> bool {
        matches!(self, ColourSpace::DatavideoFull | ColourSpace::DatavideoLimited)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ScreenConfig {
    pub name: String,
    pub screen_index: u32,
    pub x: i32,
    pub y: i32,
    /// Window width, 0 to derive from the channel format.
    pub width: u32,
    /// Window height, 0 to derive from the channel format.
    pub height: u32,
    pub stretch: Stretch,
    pub windowed: bool,
    pub key_only: bool,
    /// Side-by-side fill and key.
    pub sbs_key: bool,
    pub aspect_ratio: AspectRatio,
    pub vsync: bool,
    pub interactive: bool,
    pub borderless: bool,
    pub always_on_top: bool,
    pub colour_space: ColourSpace,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            name: "Screen consumer".to_string(),
            screen_index: 0,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            stretch: Stretch::Fill,
            windowed: true,
            key_only: false,
            sbs_key: false,
            aspect_ratio: AspectRatio::Default,
            vsync: false,
            interactive: true,
            borderless: false,
            always_on_top: false,
            colour_space: ColourSpace::Rgb,
        }
    }
}

impl ScreenConfig {
    /// Resolve combinations the presentation stage cannot honour.
    pub fn sanitize(mut self) -> Self {
        if self.sbs_key && self.key_only {
            tracing::warn!("Key-only not supported with side-by-side fill and key. Ignored.");
            self.key_only = false;
        }
        if self.colour_space.is_datavideo() && self.sbs_key {
            tracing::warn!("Side-by-side fill and key not supported for DataVideo TC100/TC200. Ignored.");
            self.sbs_key = false;
        }
        if self.colour_space.is_datavideo() && self.key_only {
            tracing::warn!("Key only not supported for DataVideo TC100/TC200. Ignored.");
            self.key_only = false;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ChannelConfig {
    pub name: String,
    /// Video format preset name.
    pub format: String,
    /// Capacity of the queue between the renderer and each consumer.
    pub queue_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "channel-1".to_string(),
            format: "1080p5000".to_string(),
            queue_capacity: 1,
        }
    }
}

impl ChannelConfig {
    pub fn video_format(&self) -> PlayoutResult<VideoFormat> {
        VideoFormat::preset(&self.format)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct PlayoutConfig {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub screen: ScreenConfig,
}

impl PlayoutConfig {
    pub fn load_from_file(path: &Path) -> PlayoutResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)
            .map_err(|e| PlayoutError::config(e.to_string(), Some(path.to_path_buf())))?;
        Ok(config)
    }

    /// Parse, validate and sanitize a TOML document.
    pub fn from_toml(contents: &str) -> PlayoutResult<Self> {
        let mut config: PlayoutConfig = toml::from_str(contents)?;
        config.validate()?;
        config.screen = config.screen.sanitize();
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> PlayoutResult<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn validate(&self) -> PlayoutResult<()> {
        self.channel.video_format()?;
        if self.channel.queue_capacity == 0 {
            return Err(PlayoutError::config("queue-capacity must be at least 1", None));
        }
        Ok(())
    }
}
