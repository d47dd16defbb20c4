use serde::{Deserialize, Serialize};

/// Pixel format of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit BGRA (4 bytes per pixel). Native layout of the output stage.
    Bgra8,
    /// 8-bit RGBA (4 bytes per pixel).
    Rgba8,
}

impl PixelFormat {
    /// Bytes per pixel for this format.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
        }
    }
}

/// Per-frame visual state handed over by the mixing layer and consumed at
/// the draw call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameTransform {
    /// Opacity multiplier in `[0, 1]`.
    pub opacity: f64,
    /// Horizontal offset in pixels.
    pub offset_x: i32,
    /// Vertical offset in pixels.
    pub offset_y: i32,
}

impl Default for FrameTransform {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            offset_x: 0,
            offset_y: 0,
        }
    }
}

/// A single video frame as a raw pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    /// Raw pixel data.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: PixelFormat,
}

impl FrameBuffer {
    /// Create a new frame buffer filled with zeros (transparent black).
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let size = Self::byte_len(width, height, format);
        Self {
            data: vec![0u8; size],
            width,
            height,
            format,
        }
    }

    /// Create a zeroed frame buffer, reporting failure instead of aborting
    /// when the allocation cannot be satisfied.
    pub fn try_new(width: u32, height: u32, format: PixelFormat) -> Option<Self> {
        let size = Self::byte_len(width, height, format);
        let mut data = Vec::new();
        data.try_reserve_exact(size).ok()?;
        data.resize(size, 0);
        Some(Self {
            data,
            width,
            height,
            format,
        })
    }

    /// Create a frame buffer filled with a single pixel value.
    pub fn solid(width: u32, height: u32, format: PixelFormat, pixel: [u8; 4]) -> Self {
        let mut fb = Self::new(width, height, format);
        fb.fill(pixel);
        fb
    }

    /// Number of bytes needed for the given geometry.
    pub fn byte_len(width: u32, height: u32, format: PixelFormat) -> usize {
        (width as usize) * (height as usize) * format.bytes_per_pixel()
    }

    /// Total number of pixels.
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Total byte size of the pixel data.
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    /// Whether `other` has the same width, height and format.
    pub fn same_geometry(&self, other: &FrameBuffer) -> bool {
        self.width == other.width && self.height == other.height && self.format == other.format
    }

    /// Reset every pixel to transparent black.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Set every pixel to `pixel`.
    pub fn fill(&mut self, pixel: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&pixel);
        }
    }

    /// Copy the pixels of `src` into `self`. Both buffers must share geometry.
    pub fn copy_from(&mut self, src: &FrameBuffer) -> bool {
        if !self.same_geometry(src) {
            return false;
        }
        self.data.copy_from_slice(&src.data);
        true
    }

    /// Get the raw 4-byte value at a pixel coordinate. Returns None if out of bounds.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = self.offset(x, y);
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    /// Set the raw 4-byte value at a pixel coordinate. No-op if out of bounds.
    pub fn set_pixel(&mut self, x: u32, y: u32, px: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = self.offset(x, y);
        self.data[offset..offset + 4].copy_from_slice(&px);
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        ((y as usize) * (self.width as usize) + (x as usize)) * self.format.bytes_per_pixel()
    }

    /// Alpha-composite `src` on top of `self` at position (dx, dy), scaling
    /// the source alpha by `opacity`.
    ///
    /// Both buffers must share a pixel format; the alpha channel is the last
    /// byte for every supported format so the colour order does not matter.
    pub fn composite_over(&mut self, src: &FrameBuffer, dx: i32, dy: i32, opacity: f64) {
        if self.format != src.format {
            return;
        }
        let opacity = (opacity.clamp(0.0, 1.0) * 255.0).round() as u32;
        if opacity == 0 {
            return;
        }

        // Offsets may sit anywhere in i32, so clip in i64.
        let (dx, dy) = (i64::from(dx), i64::from(dy));
        let dst_width = i64::from(self.width);
        let dst_height = i64::from(self.height);

        let start_y = (-dy).max(0);
        let end_y = i64::from(src.height).min(dst_height - dy);
        let start_x = (-dx).max(0);
        let end_x = i64::from(src.width).min(dst_width - dx);

        if start_x >= end_x || start_y >= end_y {
            return;
        }

        let src_stride = src.width as usize * 4;
        let dst_stride = self.width as usize * 4;

        for sy in start_y..end_y {
            let dst_y = dy + sy;
            let src_row_start = (sy as usize * src_stride) + (start_x as usize * 4);
            let dst_row_start = (dst_y as usize * dst_stride) + ((dx + start_x) as usize * 4);
            let len = (end_x - start_x) as usize * 4;

            let src_slice = &src.data[src_row_start..src_row_start + len];
            let dst_slice = &mut self.data[dst_row_start..dst_row_start + len];

            for (s, d) in src_slice.chunks_exact(4).zip(dst_slice.chunks_exact_mut(4)) {
                let sa = (s[3] as u32 * opacity) / 255;
                if sa == 0 {
                    continue;
                }
                if sa == 255 {
                    d.copy_from_slice(s);
                    continue;
                }

                let da = d[3] as u32;
                let inv_sa = 255 - sa;
                let out_a = sa + ((da * inv_sa) / 255);

                if out_a == 0 { continue; }

                for c in 0..3 {
                    let sc = s[c] as u32;
                    let dc = d[c] as u32;
                    d[c] = ((sc * sa * 255 + dc * da * inv_sa) / (out_a * 255)) as u8;
                }
                d[3] = out_a as u8;
            }
        }
    }
}

/// A block of interleaved audio samples travelling with a video frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioBlock {
    /// Interleaved samples, `channels` values per sample frame.
    pub samples: Vec<i32>,
    /// Number of interleaved channels.
    pub channels: u16,
}

impl AudioBlock {
    pub fn new(channels: u16) -> Self {
        Self {
            samples: Vec::new(),
            channels,
        }
    }

    /// Create a block of silence for `sample_frames` frames.
    pub fn silence(channels: u16, sample_frames: usize) -> Self {
        Self {
            samples: vec![0; sample_frames * channels as usize],
            channels,
        }
    }

    /// Number of sample frames (samples per channel).
    pub fn sample_frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Move the samples out, leaving an empty block with the same layout.
    pub fn take(&mut self) -> AudioBlock {
        AudioBlock {
            samples: std::mem::take(&mut self.samples),
            channels: self.channels,
        }
    }
}
