use std::sync::Arc;
use std::time::{Duration, Instant};

use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::ModifiersState;
use winit::window::{Window, WindowAttributes, WindowId};

use crate::config::{parse_packed_color, Config};
use crate::input::{handle_key_event, InputAction};
use crate::renderer::Renderer;
use crate::terminal::Terminal;

const BLINK: Duration = Duration::from_millis(500);

pub struct App {
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    terminal: Terminal,
    config: Config,
    modifiers: ModifiersState,
    start: Instant,
    title_deadline: Instant,
    frame_count: u32,
    started: bool,
}

impl App {
    pub fn new(config: Config) -> Self {
        let terminal = Terminal::new(&config);
        Self {
            window: None,
            renderer: None,
            terminal,
            config,
            modifiers: ModifiersState::empty(),
            start: Instant::now(),
            title_deadline: Instant::now() + Duration::from_secs(1),
            frame_count: 0,
            started: false,
        }
    }

    fn refresh_font(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else { return };
        if let Err(error) = self.terminal.refresh_font(&mut renderer.atlas) {
            log::error!("{error:#}");
            event_loop.exit();
        }
    }

    fn grid_for_window(&self) -> (u32, u32) {
        let (width, height) = self
            .window
            .as_ref()
            .map(|w| {
                let size = w.inner_size();
                (size.width, size.height)
            })
            .unwrap_or((self.config.window.width, self.config.window.height));

        let margin = 2 * self.config.window.margin;
        let cols = width.saturating_sub(margin) / self.terminal.raster.font_width.max(1);
        let rows = height.saturating_sub(margin) / self.terminal.raster.font_height.max(1);
        (cols.max(1), rows.max(1))
    }

    fn cursor_color(&self) -> [f32; 4] {
        let phase = (self.start.elapsed().as_millis() / BLINK.as_millis()) & 1;
        let hex = if phase == 0 {
            &self.config.colors.cursor_bright
        } else {
            &self.config.colors.cursor_dim
        };
        let packed = parse_packed_color(hex, 0x00FF_FFFF);
        let [r, g, b] = unpack_rgb(packed);
        [r, g, b, 1.0]
    }

    fn update_title(&mut self) {
        if Instant::now() < self.title_deadline {
            return;
        }
        self.title_deadline = Instant::now() + Duration::from_secs(1);
        let fps = self.frame_count;
        self.frame_count = 0;

        let Some(window) = self.window.as_ref() else { return };
        if self.terminal.no_throttle {
            let stats = self.terminal.stats();
            window.set_title(&format!(
                "torrent_terminal Size={}x{} FPS={} CacheHits/Misses={}/{} Recycle:{}",
                self.terminal.screen.dim_x,
                self.terminal.screen.dim_y,
                fps,
                stats.hits,
                stats.misses,
                stats.recycles,
            ));
        } else {
            window.set_title("torrent_terminal");
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let attrs = WindowAttributes::default()
            .with_title(concat!("torrent_terminal ", env!("CARGO_PKG_VERSION")))
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = Arc::new(event_loop.create_window(attrs).expect("create window"));
        let renderer = Renderer::new(window.clone());

        self.window = Some(window);
        self.renderer = Some(renderer);

        self.refresh_font(event_loop);
        if !self.started {
            self.started = true;
            self.terminal.banner();
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(new_size.width, new_size.height);
                }
            }

            WindowEvent::ModifiersChanged(new_modifiers) => {
                self.modifiers = new_modifiers.state();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                match handle_key_event(&event, self.modifiers) {
                    InputAction::Type(text) => self.terminal.push_input(&text),
                    InputAction::Backspace => self.terminal.backspace(),
                    InputAction::Submit => {
                        let effect = self.terminal.execute_command_line();
                        if effect.font_changed {
                            self.refresh_font(event_loop);
                        }
                        if self.terminal.quit {
                            event_loop.exit();
                        }
                    }
                    InputAction::PageUp => self.terminal.page_up(),
                    InputAction::PageDown => self.terminal.page_down(),
                    InputAction::None => {}
                }
            }

            WindowEvent::RedrawRequested => {
                self.terminal.drain_child();

                let (cols, rows) = self.grid_for_window();
                self.terminal.resize_grid(cols, rows);

                let cursor_color = self.cursor_color();
                let background =
                    parse_packed_color(&self.config.colors.background, 0x000C_0C0C);
                let clear = unpack_rgb(background);
                let margin = self.config.window.margin;

                let Some(renderer) = self.renderer.as_mut() else { return };
                renderer.set_throttle(!self.terminal.no_throttle);

                self.terminal.layout(&mut renderer.atlas);

                match renderer.render(&self.terminal.screen, margin, cursor_color, clear) {
                    Ok(()) => {}
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        if let Some(window) = &self.window {
                            let size = window.inner_size();
                            renderer.resize(size.width, size.height);
                        }
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        log::error!("out of GPU memory");
                        event_loop.exit();
                    }
                    Err(error) => {
                        log::warn!("surface error: {error:?}");
                    }
                }

                self.frame_count += 1;
                self.update_title();

                if self.terminal.quit {
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }
}

fn unpack_rgb(packed: u32) -> [f32; 3] {
    [
        (packed & 0xFF) as f32 / 255.0,
        ((packed >> 8) & 0xFF) as f32 / 255.0,
        ((packed >> 16) & 0xFF) as f32 / 255.0,
    ]
}
