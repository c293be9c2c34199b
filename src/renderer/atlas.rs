//! The glyph atlas: one R8 texture holding every tile the cache can
//! reference. The core writes tiles (through `TileStore`) and the renderer
//! samples them, never both in the same span of a frame: writes are
//! flushed before the draw is encoded.

use crate::rasterizer::TileStore;

pub const ATLAS_WIDTH: u32 = 2048;
pub const ATLAS_HEIGHT: u32 = 2048;

struct PendingTile {
    gpu_index: u32,
    offset: usize,
}

pub struct GlyphAtlas {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    tile_width: u32,
    tile_height: u32,
    tiles_per_row: u32,
    capacity: u32,
    staging: Vec<u8>,
    pending: Vec<PendingTile>,
}

impl GlyphAtlas {
    pub fn new(device: &wgpu::Device) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("glyph_atlas"),
            size: wgpu::Extent3d {
                width: ATLAS_WIDTH,
                height: ATLAS_HEIGHT,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            tile_width: 8,
            tile_height: 16,
            tiles_per_row: ATLAS_WIDTH / 8,
            capacity: (ATLAS_WIDTH / 8) * (ATLAS_HEIGHT / 16),
            staging: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn tiles_per_row(&self) -> u32 {
        self.tiles_per_row
    }

    pub fn tile_dims(&self) -> (u32, u32) {
        (self.tile_width, self.tile_height)
    }

    fn tile_origin(&self, gpu_index: u32) -> (u32, u32) {
        let x = (gpu_index % self.tiles_per_row) * self.tile_width;
        let y = (gpu_index / self.tiles_per_row) * self.tile_height;
        (x, y)
    }

    /// Upload everything the core transferred since the last frame. Must
    /// run before the cell pass samples the atlas.
    pub fn flush(&mut self, queue: &wgpu::Queue) {
        let tile_bytes = (self.tile_width * self.tile_height) as usize;
        for tile in std::mem::take(&mut self.pending) {
            let (x, y) = self.tile_origin(tile.gpu_index);
            let data = &self.staging[tile.offset..tile.offset + tile_bytes];
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &self.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d { x, y, z: 0 },
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.tile_width),
                    rows_per_image: Some(self.tile_height),
                },
                wgpu::Extent3d {
                    width: self.tile_width,
                    height: self.tile_height,
                    depth_or_array_layers: 1,
                },
            );
        }
        self.staging.clear();
    }
}

impl TileStore for GlyphAtlas {
    fn reset(&mut self, tile_width: u32, tile_height: u32) -> u32 {
        self.tile_width = tile_width.max(1);
        self.tile_height = tile_height.max(1);
        self.tiles_per_row = (ATLAS_WIDTH / self.tile_width).max(1);
        self.capacity = self.tiles_per_row * (ATLAS_HEIGHT / self.tile_height).max(1);
        self.staging.clear();
        self.pending.clear();
        self.capacity
    }

    fn store_tile(&mut self, gpu_index: u32, pixels: &[u8]) {
        if gpu_index >= self.capacity {
            log::warn!("tile {} past atlas capacity {}", gpu_index, self.capacity);
            return;
        }
        debug_assert_eq!(pixels.len() as u32, self.tile_width * self.tile_height);
        let offset = self.staging.len();
        self.staging.extend_from_slice(pixels);
        self.pending.push(PendingTile { gpu_index, offset });
    }
}
