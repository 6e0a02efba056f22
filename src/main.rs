//! Hand Pose Viewer - Main Entry Point
//!
//! Shows a live camera feed with the detected hand skeleton and joint bend
//! angles drawn on top.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use hand_pose_viewer::settings::AppSettings;
use hand_pose_viewer::telemetry::{init_logging, LogConfig};
use hand_pose_viewer::App;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

const WINDOW_TITLE: &str = "Hand Pose Viewer";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 800;

/// Application state machine
enum AppState {
    /// Initial state before window is created
    Uninitialized { settings: AppSettings },
    /// Window and graphics context are ready
    Running { window: Arc<Window>, app: App },
    /// Startup failed, waiting for the event loop to exit
    Failed,
}

/// Main application handler implementing winit's ApplicationHandler trait
struct HandPoseViewer {
    state: AppState,
    next_redraw_at: Instant,
}

impl HandPoseViewer {
    fn new(settings: AppSettings) -> Self {
        Self {
            state: AppState::Uninitialized { settings },
            next_redraw_at: Instant::now(),
        }
    }

    fn start(event_loop: &ActiveEventLoop, settings: AppSettings) -> anyhow::Result<(Arc<Window>, App)> {
        let window_attributes = WindowAttributes::default()
            .with_title(WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(DEFAULT_WIDTH, DEFAULT_HEIGHT));

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("failed to create window")?,
        );
        tracing::info!(
            width = window.inner_size().width,
            height = window.inner_size().height,
            "Window created"
        );

        let app = pollster::block_on(App::new(window.clone(), settings))?;
        Ok((window, app))
    }
}

impl ApplicationHandler for HandPoseViewer {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        // Only initialize if we haven't already
        let AppState::Uninitialized { settings } = &self.state else {
            return;
        };

        match Self::start(event_loop, settings.clone()) {
            Ok((window, app)) => {
                tracing::info!("Ready. Esc quits, F11 fullscreen, C/D connect/disconnect, S switch camera, M mirror, A angles");
                self.state = AppState::Running { window, app };
            }
            Err(e) => {
                tracing::error!("Startup failed: {:#}", e);
                self.state = AppState::Failed;
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let AppState::Running { window, app } = &mut self.state else {
            return;
        };

        // Let egui handle the event first
        let egui_consumed = app.handle_window_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                tracing::info!("Close requested, exiting");
                app.save_settings();
                event_loop.exit();
            }

            // Keyboard shortcuts only when egui doesn't want the key
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } if !egui_consumed => match key_code {
                KeyCode::Escape => {
                    tracing::info!("Escape pressed, exiting");
                    app.save_settings();
                    event_loop.exit();
                }
                KeyCode::F11 => {
                    if window.fullscreen().is_some() {
                        window.set_fullscreen(None);
                    } else {
                        window.set_fullscreen(Some(winit::window::Fullscreen::Borderless(None)));
                    }
                }
                KeyCode::KeyC => app.connect_default_camera(),
                KeyCode::KeyD => app.disconnect_camera(),
                KeyCode::KeyS => app.switch_camera(),
                KeyCode::KeyM => app.toggle_mirror(),
                KeyCode::KeyA => app.toggle_angles(),
                _ => {}
            },

            WindowEvent::Resized(physical_size) => {
                app.resize(physical_size);
            }

            WindowEvent::RedrawRequested => {
                app.update_camera();
                app.update_ml();

                match app.render() {
                    Ok(()) => {}
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        tracing::warn!("Surface lost, reconfiguring");
                        app.resize(app.size());
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        tracing::error!("Out of GPU memory");
                        event_loop.exit();
                    }
                    Err(e) => {
                        tracing::warn!("Surface error: {:?}", e);
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let AppState::Running { window, app } = &mut self.state else {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        };

        // Drive redraws at target FPS
        let frame_duration = Duration::from_nanos(1_000_000_000u64 / app.target_fps().max(1) as u64);
        let wake_early = Duration::from_micros(1000);
        let wake_at = self
            .next_redraw_at
            .checked_sub(wake_early)
            .unwrap_or(self.next_redraw_at);
        let now = Instant::now();

        if now >= wake_at {
            // Spin-wait for precise timing
            while Instant::now() < self.next_redraw_at {
                std::hint::spin_loop();
            }

            window.request_redraw();
            self.next_redraw_at += frame_duration;

            // Reset if too far behind
            let max_behind = frame_duration * 2;
            let now_after = Instant::now();
            if now_after > self.next_redraw_at + max_behind {
                self.next_redraw_at = now_after + frame_duration;
            }
        }

        event_loop.set_control_flow(ControlFlow::WaitUntil(wake_at));
    }
}

fn main() -> anyhow::Result<()> {
    let (settings, settings_error) = match AppSettings::load() {
        Ok(settings) => (settings, None),
        Err(e) => (AppSettings::default(), Some(e)),
    };

    // Keep the guard alive so the log file is flushed on exit
    let _log_guard = init_logging(&LogConfig::from(&settings.logging)).context("failed to initialize logging")?;

    tracing::info!("Hand Pose Viewer v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = settings_error {
        tracing::warn!("Failed to load settings, using defaults: {}", e);
    }

    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut viewer = HandPoseViewer::new(settings);
    event_loop.run_app(&mut viewer).context("event loop error")?;

    if matches!(viewer.state, AppState::Failed) {
        anyhow::bail!("startup failed");
    }

    Ok(())
}
