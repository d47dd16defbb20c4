use parking_lot::Mutex;
use std::collections::HashMap;
use wgpu::{
    Adapter, Device, Extent3d, Instance, Queue, Texture, TextureDescriptor, TextureFormat,
    TextureUsages,
};

use playout_core::{PlayoutError, PlayoutResult, VideoFormat};

#[derive(Hash, Eq, PartialEq, Clone, Copy)]
struct TextureDescKey {
    width: u32,
    height: u32,
    format: TextureFormat,
    usage: TextureUsages,
}

/// Textures kept alive across format-compatible rebuilds.
pub struct TexturePool {
    free_textures: Mutex<HashMap<TextureDescKey, Vec<Texture>>>,
}

impl TexturePool {
    pub fn new() -> Self {
        Self {
            free_textures: Mutex::new(HashMap::new()),
        }
    }

    pub fn acquire(
        &self,
        device: &Device,
        label: Option<&str>,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsages,
    ) -> Texture {
        let key = TextureDescKey {
            width,
            height,
            format,
            usage,
        };

        if let Some(texture) = self.free_textures.lock().get_mut(&key).and_then(Vec::pop) {
            return texture;
        }

        device.create_texture(&TextureDescriptor {
            label,
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        })
    }

    pub fn release(&self, texture: Texture, format: TextureFormat, usage: TextureUsages) {
        let size = texture.size();
        let key = TextureDescKey {
            width: size.width,
            height: size.height,
            format,
            usage,
        };
        self.free_textures.lock().entry(key).or_default().push(texture);
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared device context for GPU presentation.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
    pub texture_pool: TexturePool,
}

impl GpuContext {
    /// Initialize wgpu on the best available backend, headless.
    pub fn init(label: &str) -> PlayoutResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| PlayoutError::Unsupported("no suitable wgpu adapter".into()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some(label),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .map_err(|e| PlayoutError::Unsupported(format!("wgpu device: {e}")))?;

        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "gpu context ready");

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            texture_pool: TexturePool::new(),
        })
    }

    /// Fail if `format` cannot be represented by this device.
    pub fn check_capabilities(&self, format: &VideoFormat) -> PlayoutResult<()> {
        let max = self.device.limits().max_texture_dimension_2d;
        if format.width > max || format.height > max {
            return Err(PlayoutError::Unsupported(format!(
                "{} needs {}x{} textures, device limit is {}",
                format.name, format.width, format.height, max
            )));
        }
        Ok(())
    }
}
