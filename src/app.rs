//! Main application state and rendering
//!
//! Owns the wgpu surface, egui integration, camera capture and the inference
//! worker, and ties them together once per frame.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use egui::{Color32, Pos2, Rect, TextureHandle, TextureOptions, Vec2};
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::camera::{CameraCapture, CameraFrame, CameraInfo, CaptureEvent, SessionStatus};
use crate::geometry::{video_rect_in_view, VideoGravity};
use crate::ml::{InferenceResult, InferenceStatus, MlInference};
use crate::overlay::{build_overlay, is_stale, OverlayStyle, ViewMapping};
use crate::settings::AppSettings;
use crate::telemetry::{FrameProfiler, LatencyTracker};

/// Actions requested from the UI, applied after the egui pass
enum UiAction {
    Connect(u32),
    Disconnect,
    SwitchCamera,
    RefreshCameras,
}

/// Main application state
pub struct App {
    /// Reference to the window
    window: Arc<Window>,
    /// The wgpu surface for presenting rendered frames
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    /// Current window size in physical pixels
    size: PhysicalSize<u32>,

    settings: AppSettings,
    /// Settings changed since the last save
    settings_dirty: bool,

    // Camera capture
    camera: Option<CameraCapture>,
    session: SessionStatus,
    cameras: Vec<CameraInfo>,
    video_texture: Option<TextureHandle>,
    video_size: Option<Vec2>,
    last_camera_frame: Option<u64>,
    /// Bumped whenever capture stops; frames and results carry it
    capture_generation: u64,

    // Hand tracking
    ml_inference: Option<MlInference>,
    hand_result: Option<InferenceResult>,
    latency: LatencyTracker,

    // egui integration
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,

    profiler: FrameProfiler,
}

impl App {
    /// Create a new App instance with initialized wgpu context
    pub async fn new(window: Arc<Window>, settings: AppSettings) -> anyhow::Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .context("failed to create surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let adapter_info = adapter.get_info();
        tracing::info!(gpu = %adapter_info.name, backend = ?adapter_info.backend, "GPU adapter selected");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Hand Pose Viewer Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .context("failed to create GPU device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .context("surface reports no supported formats")?;

        let present_mode = if surface_caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
            wgpu::PresentMode::Mailbox
        } else {
            wgpu::PresentMode::Fifo
        };

        tracing::info!(format = ?surface_format, present_mode = ?present_mode, "Surface configured");

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &config);

        // Initialize egui
        let egui_ctx = egui::Context::default();
        let mut style = (*egui_ctx.style()).clone();
        style.visuals.window_shadow = egui::epaint::Shadow::NONE;
        egui_ctx.set_style(style);

        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        let mut app = Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            settings,
            settings_dirty: false,
            camera: None,
            session: SessionStatus::new(),
            cameras: CameraCapture::list_cameras(),
            video_texture: None,
            video_size: None,
            last_camera_frame: None,
            capture_generation: 0,
            ml_inference: None,
            hand_result: None,
            latency: LatencyTracker::new(),
            egui_ctx,
            egui_state,
            egui_renderer,
            profiler: FrameProfiler::new(),
        };

        tracing::info!(count = app.cameras.len(), "Cameras found");

        app.init_ml();
        if app.settings.camera.auto_connect {
            app.connect_default_camera();
        }

        Ok(app)
    }

    /// Handle a window event, returning true if egui consumed it
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(&self.window, event);
        response.consumed
    }

    /// Resize the surface
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn target_fps(&self) -> u32 {
        self.settings.target_fps
    }

    /// Connect to the camera remembered in settings
    pub fn connect_default_camera(&mut self) {
        self.connect_camera(self.settings.camera.index);
    }

    /// Connect to a camera, replacing any current one
    pub fn connect_camera(&mut self, camera_index: u32) {
        self.stop_capture();
        tracing::info!(camera = camera_index, "Connecting to camera");

        let (width, height) = (self.settings.camera.width, self.settings.camera.height);
        match CameraCapture::new(camera_index, width, height) {
            Ok(capture) => {
                self.session.begin(camera_index);
                self.camera = Some(capture);
                if self.settings.camera.index != camera_index {
                    self.settings.camera.index = camera_index;
                    self.settings_dirty = true;
                }
            }
            Err(e) => {
                tracing::error!(camera = camera_index, "Failed to connect camera: {}", e);
                self.session.apply(&CaptureEvent::Failed(e));
            }
        }
    }

    /// Disconnect current camera
    pub fn disconnect_camera(&mut self) {
        if self.camera.is_some() {
            tracing::info!("Camera disconnected");
        }
        self.stop_capture();
        self.session.reset();
    }

    /// Cycle to the next enumerated camera
    pub fn switch_camera(&mut self) {
        self.cameras = CameraCapture::list_cameras();
        let current = self
            .camera
            .as_ref()
            .map(|c| c.camera_index())
            .unwrap_or(self.settings.camera.index);

        match next_camera(&self.cameras, current) {
            Some(next) => self.connect_camera(next),
            None => tracing::warn!("No cameras available to switch to"),
        }
    }

    /// Stop capture and clear everything tied to the current device
    fn stop_capture(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            camera.stop();
        }
        self.video_texture = None;
        self.video_size = None;
        self.last_camera_frame = None;
        self.hand_result = None;
        self.latency.clear();
        self.capture_generation = self.capture_generation.wrapping_add(1);
    }

    pub fn toggle_mirror(&mut self) {
        self.settings.camera.mirrored = !self.settings.camera.mirrored;
        self.settings_dirty = true;
        tracing::info!(mirrored = self.settings.camera.mirrored, "Mirroring toggled");
    }

    pub fn toggle_angles(&mut self) {
        self.settings.overlay.show_angles = !self.settings.overlay.show_angles;
        self.settings_dirty = true;
        tracing::info!(show_angles = self.settings.overlay.show_angles, "Angle labels toggled");
    }

    /// Start the inference worker if it is not running
    pub fn init_ml(&mut self) {
        if self.ml_inference.is_some() {
            return;
        }

        match MlInference::new(self.settings.model.clone()) {
            Ok(ml) => self.ml_inference = Some(ml),
            Err(e) => tracing::warn!("Failed to start hand inference: {}", e),
        }
    }

    /// Poll camera events, upload new frames and hand them to inference
    pub fn update_camera(&mut self) {
        let Some(camera) = &self.camera else { return };

        for event in camera.poll_events() {
            self.session.apply(&event);
        }

        if !camera.is_running() {
            // Thread exited on its own; collect whatever it sent last
            if let Some(mut camera) = self.camera.take() {
                camera.stop();
                for event in camera.poll_events() {
                    self.session.apply(&event);
                }
            }
            return;
        }

        let Some(frame) = camera.latest_frame() else { return };
        if self.last_camera_frame == Some(frame.frame_number) {
            return;
        }
        self.last_camera_frame = Some(frame.frame_number);

        self.upload_frame(&frame);

        if let Some(ml) = &self.ml_inference {
            if ml.is_ready() {
                ml.process_frame(frame.to_frame_data(self.capture_generation));
            }
        }
    }

    fn upload_frame(&mut self, frame: &CameraFrame) {
        let (width, height) = (frame.width as usize, frame.height as usize);
        if frame.data.len() != width * height * 4 {
            tracing::warn!(
                frame = frame.frame_number,
                len = frame.data.len(),
                width,
                height,
                "Skipping camera frame with unexpected size"
            );
            return;
        }

        let image = egui::ColorImage::from_rgba_unmultiplied([width, height], &frame.data);
        match &mut self.video_texture {
            Some(texture) => texture.set(image, TextureOptions::LINEAR),
            None => {
                tracing::info!(width, height, "Creating camera texture");
                self.video_texture = Some(self.egui_ctx.load_texture("camera", image, TextureOptions::LINEAR));
            }
        }
        self.video_size = Some(Vec2::new(frame.width as f32, frame.height as f32));
    }

    /// Pick up the newest inference result
    pub fn update_ml(&mut self) {
        let Some(ml) = &self.ml_inference else { return };
        let Some(result) = ml.latest_result() else { return };

        if !is_current_result(&result, self.capture_generation) {
            return;
        }
        self.latency.record(result.frame_number, result.latency);
        self.hand_result = Some(result);
    }

    /// Save settings if they changed
    pub fn save_settings(&mut self) {
        if !self.settings_dirty {
            return;
        }
        match self.settings.save() {
            Ok(()) => {
                self.settings_dirty = false;
                tracing::debug!("Settings saved");
            }
            Err(e) => {
                tracing::warn!("Failed to save settings: {}", e);
                // Don't retry every frame
                self.settings_dirty = false;
            }
        }
    }

    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        self.profiler.begin_frame();

        let output = self.surface.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });

        self.render_ui(&mut encoder, &view);

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }

    fn render_ui(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        let raw_input = self.egui_state.take_egui_input(&self.window);

        // Snapshot state so the egui closure doesn't borrow self
        let fps = self.profiler.fps();
        let status_message = self.session.message();
        let connected = self.camera.is_some();
        let current_camera = self.camera.as_ref().map(|c| c.camera_index());
        let cameras = self.cameras.clone();
        let ml_status = self.ml_inference.as_ref().map(|ml| ml.status());
        let dropped_frames = self.ml_inference.as_ref().map(|ml| ml.dropped_frames()).unwrap_or(0);
        let processed_frames = self.ml_inference.as_ref().map(|ml| ml.processed_frames()).unwrap_or(0);
        let latency_stats = self.latency.stats();
        let last_latency = self.latency.last_ms();
        let video = self.video_texture.as_ref().map(|t| t.id()).zip(self.video_size);

        let stale_after = Duration::from_millis(self.settings.overlay.stale_after_ms);
        let hand = self
            .hand_result
            .as_ref()
            .filter(|r| !is_stale(r.completed_at, Instant::now(), stale_after))
            .and_then(|r| r.observation.clone());

        let mut edited = self.settings.clone();
        let mut actions: Vec<UiAction> = Vec::new();

        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            egui::TopBottomPanel::top("status_bar").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label(&status_message);
                    ui.separator();
                    ui.label(format!("FPS: {:.1}", fps));
                    ui.separator();
                    match last_latency {
                        Some(ms) => ui.label(format!("Inference: {:.1} ms", ms)),
                        None => ui.label("Inference: -"),
                    };
                    ui.separator();
                    ui.label(format!("Dropped: {}", dropped_frames));
                });
            });

            egui::SidePanel::right("controls").default_width(240.0).show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    ui.heading("Camera");
                    ui.separator();

                    if cameras.is_empty() {
                        ui.label("No cameras found");
                    }
                    for cam in &cameras {
                        let selected = current_camera == Some(cam.index);
                        if ui
                            .selectable_label(selected, format!("{}: {}", cam.index, cam.name))
                            .clicked()
                            && !selected
                        {
                            actions.push(UiAction::Connect(cam.index));
                        }
                    }

                    ui.horizontal(|ui| {
                        if ui.button("Refresh").clicked() {
                            actions.push(UiAction::RefreshCameras);
                        }
                        if connected {
                            if ui.button("Switch").clicked() {
                                actions.push(UiAction::SwitchCamera);
                            }
                            if ui.button("Disconnect").clicked() {
                                actions.push(UiAction::Disconnect);
                            }
                        }
                    });

                    ui.add_space(8.0);
                    ui.heading("Display");
                    ui.separator();

                    ui.checkbox(&mut edited.camera.mirrored, "Mirror video (M)");
                    ui.checkbox(&mut edited.overlay.show_angles, "Show angles (A)");
                    ui.horizontal(|ui| {
                        ui.label("Video:");
                        ui.radio_value(&mut edited.overlay.gravity, VideoGravity::Fit, VideoGravity::Fit.display_name());
                        ui.radio_value(&mut edited.overlay.gravity, VideoGravity::Fill, VideoGravity::Fill.display_name());
                    });
                    ui.add(egui::Slider::new(&mut edited.overlay.min_confidence, 0.0..=1.0).text("Min confidence"));
                    ui.add(egui::Slider::new(&mut edited.overlay.line_width, 0.5..=12.0).text("Line width"));

                    ui.add_space(8.0);
                    ui.heading("Detector");
                    ui.separator();

                    match &ml_status {
                        Some(InferenceStatus::Loading) => ui.label("Loading model..."),
                        Some(InferenceStatus::Ready { detector }) => ui.label(format!("Ready: {}", detector)),
                        Some(InferenceStatus::Failed(reason)) => {
                            ui.colored_label(Color32::from_rgb(230, 110, 90), format!("Unavailable: {}", reason))
                        }
                        None => ui.label("Not running"),
                    };
                    ui.label(format!("Processed: {}  Dropped: {}", processed_frames, dropped_frames));
                    if latency_stats.sample_count > 0 {
                        ui.label(format!(
                            "Latency p50 {:.1} ms  p95 {:.1} ms",
                            latency_stats.p50_ms, latency_stats.p95_ms
                        ));
                    }

                    ui.add_space(8.0);
                    ui.heading("Hand");
                    ui.separator();

                    match &hand {
                        Some(hand) => {
                            let chirality = hand.chirality.map(|c| c.display_name()).unwrap_or("Unknown");
                            ui.label(format!("{} hand, confidence {:.2}", chirality, hand.confidence));

                            egui::Grid::new("bend_angles").striped(true).num_columns(2).show(ui, |ui| {
                                for angle in hand.bend_angles(edited.overlay.min_confidence) {
                                    ui.label(angle.joint.display_name());
                                    ui.label(format!("{:.0}°", angle.degrees));
                                    ui.end_row();
                                }
                            });
                        }
                        None => {
                            ui.label("No hand detected");
                        }
                    }
                });
            });

            egui::CentralPanel::default()
                .frame(egui::Frame::NONE.fill(Color32::BLACK))
                .show(ctx, |ui| {
                    let view_rect = ui.max_rect();
                    let painter = ui.painter_at(view_rect);

                    let Some((texture_id, video_size)) = video else {
                        return;
                    };

                    let video_rect = video_rect_in_view(video_size, view_rect, edited.overlay.gravity);
                    painter.image(texture_id, video_rect, video_uv(edited.camera.mirrored), Color32::WHITE);

                    if let Some(hand) = &hand {
                        let mapping = ViewMapping {
                            video_size,
                            view_rect,
                            gravity: edited.overlay.gravity,
                            mirrored: edited.camera.mirrored,
                        };
                        let style = OverlayStyle::from_settings(&edited.overlay);
                        build_overlay(hand, &mapping, &style).paint(&painter, style.label_color);
                    }
                });
        });

        if edited != self.settings {
            self.settings = edited;
            self.settings_dirty = true;
        }
        // Avoid writing the file on every slider step
        if !self.egui_ctx.input(|i| i.pointer.any_down()) {
            self.save_settings();
        }

        for action in actions {
            match action {
                UiAction::Connect(index) => self.connect_camera(index),
                UiAction::Disconnect => self.disconnect_camera(),
                UiAction::SwitchCamera => self.switch_camera(),
                UiAction::RefreshCameras => self.cameras = CameraCapture::list_cameras(),
            }
        }

        self.egui_state.handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = self.egui_ctx.tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer.update_texture(&self.device, &self.queue, *id, image_delta);
        }

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: self.window.scale_factor() as f32,
        };

        self.egui_renderer
            .update_buffers(&self.device, &self.queue, encoder, &paint_jobs, &screen_descriptor);

        {
            let mut render_pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("egui Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                })
                .forget_lifetime();

            self.egui_renderer.render(&mut render_pass, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }
}

/// Texture coordinates for the video, flipped horizontally when mirrored
fn video_uv(mirrored: bool) -> Rect {
    if mirrored {
        Rect::from_min_max(Pos2::new(1.0, 0.0), Pos2::new(0.0, 1.0))
    } else {
        Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0))
    }
}

/// Index of the camera after `current`, wrapping around
fn next_camera(cameras: &[CameraInfo], current: u32) -> Option<u32> {
    if cameras.is_empty() {
        return None;
    }
    let next = cameras
        .iter()
        .position(|c| c.index == current)
        .map(|pos| (pos + 1) % cameras.len())
        .unwrap_or(0);
    Some(cameras[next].index)
}

/// Whether a result came from frames of the current capture session
fn is_current_result(result: &InferenceResult, capture_generation: u64) -> bool {
    result.generation == capture_generation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cameras(indices: &[u32]) -> Vec<CameraInfo> {
        indices
            .iter()
            .map(|&index| CameraInfo {
                index,
                name: format!("Camera {}", index),
            })
            .collect()
    }

    #[test]
    fn test_next_camera_cycles() {
        let list = cameras(&[0, 1, 2]);
        assert_eq!(next_camera(&list, 0), Some(1));
        assert_eq!(next_camera(&list, 2), Some(0));
    }

    #[test]
    fn test_next_camera_unknown_current() {
        assert_eq!(next_camera(&cameras(&[3, 5]), 9), Some(3));
        assert_eq!(next_camera(&[], 0), None);
    }

    #[test]
    fn test_result_from_previous_camera_is_ignored() {
        let result = InferenceResult {
            observation: None,
            frame_number: 12,
            generation: 1,
            latency: std::time::Duration::from_millis(8),
            completed_at: std::time::Instant::now(),
        };
        assert!(is_current_result(&result, 1));
        // Finished after the switch, but computed on the old camera's frame
        assert!(!is_current_result(&result, 2));
    }

    #[test]
    fn test_video_uv_mirrored() {
        let uv = video_uv(true);
        assert_eq!(uv.min.x, 1.0);
        assert_eq!(uv.max.x, 0.0);
        assert_eq!(video_uv(false), Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)));
    }
}
