//! Hand Pose Viewer - live camera feed with a hand skeleton overlay
//!
//! Captures camera frames, runs a single-hand landmark model on a background
//! thread, and draws the detected skeleton with joint bend angles over the
//! video.

pub mod app;
pub mod camera;
pub mod geometry;
pub mod ml;
pub mod overlay;
pub mod pose;
pub mod settings;
pub mod telemetry;

pub use app::App;
