//! Output video formats.
//!
//! A [`VideoFormat`] fixes the pixel geometry and frame rate of a channel.
//! Every stage sized for a format (renderer canvas, frame pool, presentation
//! slots) has to be rebuilt when the format changes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{PlayoutError, PlayoutResult};
use crate::frame::PixelFormat;

/// Field order of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldMode {
    Progressive,
    Upper,
    Lower,
}

/// Geometry and timing of one output channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    /// Preset name, e.g. `1080p5000`.
    pub name: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Width after pixel-aspect correction.
    pub square_width: u32,
    /// Height after pixel-aspect correction.
    pub square_height: u32,
    /// Frame rate numerator.
    pub fps_num: u32,
    /// Frame rate denominator.
    pub fps_den: u32,
    pub field_mode: FieldMode,
    /// Audio sample rate in Hz.
    pub audio_sample_rate: u32,
    /// Number of interleaved audio channels.
    pub audio_channels: u16,
}

struct Preset {
    name: &'static str,
    width: u32,
    height: u32,
    square_width: u32,
    square_height: u32,
    fps_num: u32,
    fps_den: u32,
    field_mode: FieldMode,
}

const PRESETS: &[Preset] = &[
    Preset { name: "pal", width: 720, height: 576, square_width: 768, square_height: 576, fps_num: 25, fps_den: 1, field_mode: FieldMode::Upper },
    Preset { name: "ntsc", width: 720, height: 486, square_width: 720, square_height: 540, fps_num: 30000, fps_den: 1001, field_mode: FieldMode::Lower },
    Preset { name: "720p2500", width: 1280, height: 720, square_width: 1280, square_height: 720, fps_num: 25, fps_den: 1, field_mode: FieldMode::Progressive },
    Preset { name: "720p5000", width: 1280, height: 720, square_width: 1280, square_height: 720, fps_num: 50, fps_den: 1, field_mode: FieldMode::Progressive },
    Preset { name: "720p5994", width: 1280, height: 720, square_width: 1280, square_height: 720, fps_num: 60000, fps_den: 1001, field_mode: FieldMode::Progressive },
    Preset { name: "720p6000", width: 1280, height: 720, square_width: 1280, square_height: 720, fps_num: 60, fps_den: 1, field_mode: FieldMode::Progressive },
    Preset { name: "1080i5000", width: 1920, height: 1080, square_width: 1920, square_height: 1080, fps_num: 25, fps_den: 1, field_mode: FieldMode::Upper },
    Preset { name: "1080i5994", width: 1920, height: 1080, square_width: 1920, square_height: 1080, fps_num: 30000, fps_den: 1001, field_mode: FieldMode::Upper },
    Preset { name: "1080p2500", width: 1920, height: 1080, square_width: 1920, square_height: 1080, fps_num: 25, fps_den: 1, field_mode: FieldMode::Progressive },
    Preset { name: "1080p5000", width: 1920, height: 1080, square_width: 1920, square_height: 1080, fps_num: 50, fps_den: 1, field_mode: FieldMode::Progressive },
    Preset { name: "1080p5994", width: 1920, height: 1080, square_width: 1920, square_height: 1080, fps_num: 60000, fps_den: 1001, field_mode: FieldMode::Progressive },
    Preset { name: "2160p2500", width: 3840, height: 2160, square_width: 3840, square_height: 2160, fps_num: 25, fps_den: 1, field_mode: FieldMode::Progressive },
    Preset { name: "2160p5000", width: 3840, height: 2160, square_width: 3840, square_height: 2160, fps_num: 50, fps_den: 1, field_mode: FieldMode::Progressive },
];

impl VideoFormat {
    /// Default audio sample rate for every preset.
    pub const AUDIO_SAMPLE_RATE: u32 = 48_000;
    /// Default audio channel count for every preset.
    pub const AUDIO_CHANNELS: u16 = 2;

    /// Look up a preset by name (case-insensitive).
    pub fn preset(name: &str) -> PlayoutResult<Self> {
        PRESETS
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| Self {
                name: p.name.to_string(),
                width: p.width,
                height: p.height,
                square_width: p.square_width,
                square_height: p.square_height,
                fps_num: p.fps_num,
                fps_den: p.fps_den,
                field_mode: p.field_mode,
                audio_sample_rate: Self::AUDIO_SAMPLE_RATE,
                audio_channels: Self::AUDIO_CHANNELS,
            })
            .ok_or_else(|| PlayoutError::config(format!("unknown video format '{}'", name), None))
    }

    /// Names of every known preset.
    pub fn preset_names() -> impl Iterator<Item = &'static str> {
        PRESETS.iter().map(|p| p.name)
    }

    /// A progressive format with arbitrary geometry, mostly for tests and tools.
    pub fn custom(name: impl Into<String>, width: u32, height: u32, fps_num: u32, fps_den: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            square_width: width,
            square_height: height,
            fps_num,
            fps_den: fps_den.max(1),
            field_mode: FieldMode::Progressive,
            audio_sample_rate: Self::AUDIO_SAMPLE_RATE,
            audio_channels: Self::AUDIO_CHANNELS,
        }
    }

    /// Frames per second.
    pub fn fps(&self) -> f64 {
        self.fps_num as f64 / self.fps_den as f64
    }

    /// Wall-clock duration of one frame.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 * self.fps_den as u64 / self.fps_num.max(1) as u64)
    }

    /// Byte size of one frame in the native pixel layout.
    pub fn size(&self) -> usize {
        (self.width as usize) * (self.height as usize) * self.pixel_format().bytes_per_pixel()
    }

    /// The pixel layout every stage of the pipeline works in.
    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Bgra8
    }

    /// Average number of audio sample frames per video frame.
    pub fn audio_samples_per_frame(&self) -> usize {
        let num = self.audio_sample_rate as u64 * self.fps_den as u64;
        ((num + self.fps_num as u64 / 2) / self.fps_num.max(1) as u64) as usize
    }

    pub fn is_ntsc(&self) -> bool {
        self.name.eq_ignore_ascii_case("ntsc")
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
