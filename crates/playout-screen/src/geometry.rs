//! Fitting the channel image into the screen.

use playout_core::{AspectRatio, ScreenConfig, Stretch, VideoFormat};

/// One textured vertex in normalized device coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "wgpu", derive(bytemuck::Pod, bytemuck::Zeroable))]
pub struct Coord {
    pub x: f32,
    pub y: f32,
    pub u: f32,
    pub v: f32,
}

impl Coord {
    const fn new(x: f32, y: f32, u: f32, v: f32) -> Self {
        Self { x, y, u, v }
    }
}

/// Triangle list for one display pass. With side-by-side key the first half
/// draws the fill and the second half the key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DrawCoords {
    pub vertices: Vec<Coord>,
    pub sbs_key: bool,
}

impl DrawCoords {
    pub fn fill(&self) -> &[Coord] {
        if self.sbs_key {
            &self.vertices[..self.vertices.len() / 2]
        } else {
            &self.vertices
        }
    }

    /// Key half; empty unless side-by-side key is on.
    pub fn key(&self) -> &[Coord] {
        if self.sbs_key {
            &self.vertices[self.vertices.len() / 2..]
        } else {
            &[]
        }
    }
}

/// Square (aspect-corrected) and on-screen sizes of a screen consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenGeometry {
    pub square_width: u32,
    pub square_height: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    pub screen_x: i32,
    pub screen_y: i32,
    pub stretch: Stretch,
    pub sbs_key: bool,
}

impl ScreenGeometry {
    pub fn new(config: &ScreenConfig, format: &VideoFormat) -> Self {
        let mut square_width = format.square_width;
        let square_height = format.square_height;

        // NTSC square sizes are already 4:3.
        if !(format.is_ntsc() && config.aspect_ratio == AspectRatio::Aspect4x3) {
            match config.aspect_ratio {
                AspectRatio::Aspect16x9 => square_width = format.height * 16 / 9,
                AspectRatio::Aspect4x3 => square_width = format.height * 4 / 3,
                AspectRatio::Default => {}
            }
        }

        let mut geometry = Self {
            square_width,
            square_height,
            screen_width: format.width,
            screen_height: format.height,
            screen_x: 0,
            screen_y: 0,
            stretch: config.stretch,
            sbs_key: config.sbs_key,
        };

        if config.windowed {
            geometry.screen_x += config.x;
            geometry.screen_y += config.y;

            let (width, height) = match (config.width, config.height) {
                (w, h) if w > 0 && h > 0 => (w, h),
                (w, _) if w > 0 => (w, scale(square_height, w, square_width)),
                (_, h) if h > 0 => (scale(square_width, h, square_height), h),
                _ => (square_width, square_height),
            };
            geometry.screen_width = width;
            geometry.screen_height = height;
        }

        geometry
    }

    /// Width of the window to open; doubled for side-by-side key.
    pub fn window_width(&self) -> u32 {
        if self.sbs_key {
            self.screen_width * 2
        } else {
            self.screen_width
        }
    }

    /// Adopt the size the window actually has.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.screen_width = width.max(1);
        self.screen_height = height.max(1);
    }

    fn image_width(&self) -> f32 {
        let w = if self.sbs_key {
            self.square_width * 2
        } else {
            self.square_width
        };
        w as f32
    }

    /// Half-extents of the image quad in normalized device coordinates.
    pub fn target_ratio(&self) -> (f32, f32) {
        let screen_w = self.screen_width.max(1) as f32;
        let screen_h = self.screen_height.max(1) as f32;
        let square_h = self.square_height.max(1) as f32;

        match self.stretch {
            Stretch::Fill => (1.0, 1.0),
            Stretch::None => (self.image_width() / screen_w, square_h / screen_h),
            Stretch::Uniform => {
                let aspect = self.image_width() / square_h;
                let width = (screen_h * aspect / screen_w).min(1.0);
                let height = (screen_w * width) / (screen_h * aspect);
                (width, height)
            }
            Stretch::UniformToFill => {
                let wr = self.image_width() / screen_w;
                let hr = square_h / screen_h;
                let r_inv = 1.0 / wr.min(hr);
                (wr * r_inv, hr * r_inv)
            }
        }
    }

    pub fn draw_coords(&self) -> DrawCoords {
        let (w, h) = self.target_ratio();

        let vertices = if self.sbs_key {
            vec![
                // fill
                Coord::new(-w, h, 0.0, 0.0),
                Coord::new(0.0, h, 1.0, 0.0),
                Coord::new(0.0, -h, 1.0, 1.0),
                Coord::new(-w, h, 0.0, 0.0),
                Coord::new(0.0, -h, 1.0, 1.0),
                Coord::new(-w, -h, 0.0, 1.0),
                // key
                Coord::new(0.0, h, 0.0, 0.0),
                Coord::new(w, h, 1.0, 0.0),
                Coord::new(w, -h, 1.0, 1.0),
                Coord::new(0.0, h, 0.0, 0.0),
                Coord::new(w, -h, 1.0, 1.0),
                Coord::new(0.0, -h, 0.0, 1.0),
            ]
        } else {
            vec![
                Coord::new(-w, h, 0.0, 0.0),
                Coord::new(w, h, 1.0, 0.0),
                Coord::new(w, -h, 1.0, 1.0),
                Coord::new(-w, h, 0.0, 0.0),
                Coord::new(w, -h, 1.0, 1.0),
                Coord::new(-w, -h, 0.0, 1.0),
            ]
        };

        DrawCoords {
            vertices,
            sbs_key: self.sbs_key,
        }
    }
}

fn scale(value: u32, num: u32, den: u32) -> u32 {
    (u64::from(value) * u64::from(num) / u64::from(den.max(1))) as u32
}
