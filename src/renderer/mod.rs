pub mod atlas;
pub mod cells;

use std::sync::Arc;

use wgpu::SurfaceError;
use winit::window::Window;

use crate::terminal::screen::ScreenBuffer;
use atlas::{GlyphAtlas, ATLAS_HEIGHT, ATLAS_WIDTH};
use cells::{CellsRenderer, Globals};

pub struct Renderer {
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,

    pub atlas: GlyphAtlas,
    cells: CellsRenderer,
}

impl Renderer {
    pub fn new(window: Arc<Window>) -> Self {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let surface = instance.create_surface(window.clone()).expect("create surface");

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .expect("request adapter");

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
            },
        ))
        .expect("request device");

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let atlas = GlyphAtlas::new(&device);
        let cells = CellsRenderer::new(&device, surface_format, &atlas.view);

        Self { surface, device, queue, config, atlas, cells }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    /// Throttled frames ride vsync; unthrottled frames present immediately
    /// so the loop spins, trading CPU for latency.
    pub fn set_throttle(&mut self, throttle: bool) {
        let mode = if throttle {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        if self.config.present_mode != mode {
            self.config.present_mode = mode;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Draw one frame: upload pending tiles, then the cell grid.
    pub fn render(
        &mut self,
        screen: &ScreenBuffer,
        margin: u32,
        cursor_color: [f32; 4],
        clear_color: [f32; 3],
    ) -> Result<(), SurfaceError> {
        // Tile writes land before the pass that samples them.
        self.atlas.flush(&self.queue);

        let (cell_width, cell_height) = self.atlas.tile_dims();
        let globals = Globals {
            surface_cell: [
                self.config.width as f32,
                self.config.height as f32,
                cell_width as f32,
                cell_height as f32,
            ],
            grid: [screen.dim_x, screen.dim_y, screen.first_line_y, margin],
            atlas: [self.atlas.tiles_per_row(), ATLAS_WIDTH, ATLAS_HEIGHT, 0],
            cursor_color,
        };
        self.cells.prepare(&self.device, &self.queue, &globals, &screen.cells);

        let output = self.surface.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame") });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("cells_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: clear_color[0] as f64,
                            g: clear_color[1] as f64,
                            b: clear_color[2] as f64,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.cells.render(&mut pass, screen.dim_x * screen.dim_y);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}
