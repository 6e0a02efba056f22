//! Geometry helpers for the hand overlay
//!
//! Detector output lives in a normalized space with the origin at the
//! bottom-left corner of the frame. The screen uses a top-left origin, so every
//! point passes through [`flip_to_top_left`] before it is placed on the view.

use egui::{Pos2, Rect, Vec2};
use serde::{Deserialize, Serialize};

/// Segments shorter than this are treated as degenerate
const MIN_SEGMENT_LENGTH: f32 = 1e-6;

/// A position in [0, 1] x [0, 1] relative to the frame, origin at bottom-left
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f32,
    pub y: f32,
}

impl NormalizedPoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance(&self, other: NormalizedPoint) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Whether the point lies inside the unit square
    pub fn is_in_frame(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

/// Interior angle at `joint` in degrees, formed by `previous` and `next`.
///
/// Uses the law of cosines on the three side lengths. Returns `None` when
/// either segment touching `joint` has zero length.
///
/// A straight chain (joint between its neighbours) gives 180°; a chain folded
/// back onto itself gives 0°.
pub fn bend_angle(previous: NormalizedPoint, joint: NormalizedPoint, next: NormalizedPoint) -> Option<f32> {
    let a = previous.distance(joint);
    let b = joint.distance(next);
    let c = previous.distance(next);

    if a < MIN_SEGMENT_LENGTH || b < MIN_SEGMENT_LENGTH {
        return None;
    }

    let cos_angle = ((a * a + b * b - c * c) / (2.0 * a * b)).clamp(-1.0, 1.0);
    Some(cos_angle.acos().to_degrees())
}

/// Convert a bottom-left normalized point into top-left normalized space.
///
/// `mirrored` flips horizontally as well, for mirrored (selfie) previews.
pub fn flip_to_top_left(point: NormalizedPoint, mirrored: bool) -> Pos2 {
    let x = if mirrored { 1.0 - point.x } else { point.x };
    Pos2::new(x, 1.0 - point.y)
}

/// Inverse of [`flip_to_top_left`]
pub fn flip_to_bottom_left(point: Pos2, mirrored: bool) -> NormalizedPoint {
    let x = if mirrored { 1.0 - point.x } else { point.x };
    NormalizedPoint::new(x, 1.0 - point.y)
}

/// How the video is placed inside a view of a different aspect ratio
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoGravity {
    /// Whole frame visible, letterboxed
    #[default]
    Fit,
    /// View fully covered, frame cropped
    Fill,
}

impl VideoGravity {
    pub fn display_name(&self) -> &'static str {
        match self {
            VideoGravity::Fit => "Fit",
            VideoGravity::Fill => "Fill",
        }
    }
}

/// Rectangle the video occupies when placed in `view` with `gravity`.
///
/// With [`VideoGravity::Fill`] the returned rectangle extends past `view`.
pub fn video_rect_in_view(video_size: Vec2, view: Rect, gravity: VideoGravity) -> Rect {
    if video_size.x <= 0.0 || video_size.y <= 0.0 || view.width() <= 0.0 || view.height() <= 0.0 {
        return view;
    }

    let scale_x = view.width() / video_size.x;
    let scale_y = view.height() / video_size.y;
    let scale = match gravity {
        VideoGravity::Fit => scale_x.min(scale_y),
        VideoGravity::Fill => scale_x.max(scale_y),
    };

    Rect::from_center_size(view.center(), video_size * scale)
}

/// Map a top-left normalized video point to view coordinates
pub fn video_to_view(point: Pos2, video_size: Vec2, view: Rect, gravity: VideoGravity) -> Pos2 {
    let rect = video_rect_in_view(video_size, view, gravity);
    Pos2::new(
        rect.min.x + point.x * rect.width(),
        rect.min.y + point.y * rect.height(),
    )
}

/// Map a view coordinate back to top-left normalized video space
pub fn view_to_video(point: Pos2, video_size: Vec2, view: Rect, gravity: VideoGravity) -> Pos2 {
    let rect = video_rect_in_view(video_size, view, gravity);
    if rect.width() <= 0.0 || rect.height() <= 0.0 {
        return Pos2::ZERO;
    }
    Pos2::new(
        (point.x - rect.min.x) / rect.width(),
        (point.y - rect.min.y) / rect.height(),
    )
}

/// Axis-aligned square region of a frame in pixels, top-left origin.
///
/// May extend past the frame edges; the part outside is padded when cropped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Roi {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Roi {
    /// The whole frame
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
        }
    }

    /// Square of side `side` centered on `center`
    pub fn square(center: Pos2, side: f32) -> Self {
        Self {
            x: center.x - side / 2.0,
            y: center.y - side / 2.0,
            width: side,
            height: side,
        }
    }

    /// Square around the bounding box of `points`, enlarged by `scale`
    pub fn around_points(points: impl IntoIterator<Item = Pos2>, scale: f32) -> Option<Self> {
        let bounds = Rect::from_points(&points.into_iter().collect::<Vec<_>>());
        if !bounds.is_finite() || bounds.width().max(bounds.height()) <= MIN_SEGMENT_LENGTH {
            return None;
        }
        Some(Self::square(bounds.center(), bounds.width().max(bounds.height()) * scale))
    }

    pub fn center(&self) -> Pos2 {
        Pos2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Whether any part of the region lies on a `width` x `height` frame
    pub fn overlaps_frame(&self, width: u32, height: u32) -> bool {
        self.x < width as f32 && self.y < height as f32 && self.x + self.width > 0.0 && self.y + self.height > 0.0
    }
}

/// Placement of a frame region inside a square model input, padded to keep
/// its aspect ratio
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    /// Side of the square input in pixels
    pub size: u32,
    /// Scaled region width inside the square
    pub scaled_width: u32,
    /// Scaled region height inside the square
    pub scaled_height: u32,
    /// Horizontal padding on the left
    pub pad_x: u32,
    /// Vertical padding on the top
    pub pad_y: u32,
    /// Frame region that was placed
    pub source: Roi,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Compute the letterbox for a whole `src_width` x `src_height` frame in a `size` square
pub fn letterbox(src_width: u32, src_height: u32, size: u32) -> Letterbox {
    letterbox_region(src_width, src_height, Roi::full_frame(src_width, src_height), size)
}

/// Compute the letterbox for `region` of a `frame_width` x `frame_height` frame
pub fn letterbox_region(frame_width: u32, frame_height: u32, region: Roi, size: u32) -> Letterbox {
    let longest = region.width.max(region.height).max(1.0);
    let scale = size as f32 / longest;

    let scaled_width = ((region.width * scale).round() as u32).clamp(1, size.max(1));
    let scaled_height = ((region.height * scale).round() as u32).clamp(1, size.max(1));

    Letterbox {
        size,
        scaled_width,
        scaled_height,
        pad_x: (size.saturating_sub(scaled_width)) / 2,
        pad_y: (size.saturating_sub(scaled_height)) / 2,
        source: region,
        frame_width: frame_width.max(1),
        frame_height: frame_height.max(1),
    }
}

impl Letterbox {
    /// Frame pixels per model-input pixel
    pub fn pixels_per_input(&self) -> Vec2 {
        Vec2::new(
            self.source.width / self.scaled_width as f32,
            self.source.height / self.scaled_height as f32,
        )
    }

    /// Map model-input pixel coordinates to frame pixel coordinates
    pub fn unmap_pixels(&self, x: f32, y: f32) -> Pos2 {
        let scale = self.pixels_per_input();
        Pos2::new(
            self.source.x + (x - self.pad_x as f32) * scale.x,
            self.source.y + (y - self.pad_y as f32) * scale.y,
        )
    }

    /// Map model-input pixel coordinates to top-left normalized frame coordinates
    pub fn unmap(&self, x: f32, y: f32) -> Pos2 {
        let pixel = self.unmap_pixels(x, y);
        Pos2::new(
            pixel.x / self.frame_width as f32,
            pixel.y / self.frame_height as f32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f32, y: f32) -> NormalizedPoint {
        NormalizedPoint::new(x, y)
    }

    #[test]
    fn test_collinear_straight_is_180() {
        let angle = bend_angle(p(0.0, 0.0), p(0.5, 0.0), p(1.0, 0.0)).unwrap();
        assert!((angle - 180.0).abs() < 0.01);
    }

    #[test]
    fn test_collinear_folded_is_0() {
        let angle = bend_angle(p(0.0, 0.0), p(0.5, 0.5), p(0.2, 0.2)).unwrap();
        assert!(angle.abs() < 0.5);
    }

    #[test]
    fn test_perpendicular_is_90() {
        let angle = bend_angle(p(0.0, 1.0), p(0.0, 0.0), p(1.0, 0.0)).unwrap();
        assert!((angle - 90.0).abs() < 0.01);

        let angle = bend_angle(p(0.3, 0.3), p(0.5, 0.3), p(0.5, 0.1)).unwrap();
        assert!((angle - 90.0).abs() < 0.01);
    }

    #[test]
    fn test_coincident_points_have_no_angle() {
        assert!(bend_angle(p(0.2, 0.2), p(0.2, 0.2), p(0.8, 0.1)).is_none());
        assert!(bend_angle(p(0.1, 0.2), p(0.4, 0.4), p(0.4, 0.4)).is_none());
        assert!(bend_angle(p(0.5, 0.5), p(0.5, 0.5), p(0.5, 0.5)).is_none());
    }

    #[test]
    fn test_neighbours_coincident_is_0() {
        // Both neighbours at the same spot: the chain folds back completely
        let angle = bend_angle(p(0.0, 0.0), p(1.0, 0.0), p(0.0, 0.0)).unwrap();
        assert!(angle.abs() < 0.01);
    }

    #[test]
    fn test_flip_unmirrored() {
        let q = flip_to_top_left(p(0.25, 0.1), false);
        assert!((q.x - 0.25).abs() < 1e-6);
        assert!((q.y - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_flip_mirrored() {
        let q = flip_to_top_left(p(0.25, 0.1), true);
        assert!((q.x - 0.75).abs() < 1e-6);
        assert!((q.y - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_flip_round_trip() {
        let points = [p(0.0, 0.0), p(1.0, 1.0), p(0.3, 0.7), p(0.9, 0.05)];
        for mirrored in [false, true] {
            for point in points {
                let back = flip_to_bottom_left(flip_to_top_left(point, mirrored), mirrored);
                assert!((back.x - point.x).abs() < 1e-6);
                assert!((back.y - point.y).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_fit_letterboxes_wide_view() {
        let view = Rect::from_min_size(Pos2::ZERO, Vec2::new(1600.0, 900.0));
        let rect = video_rect_in_view(Vec2::new(640.0, 480.0), view, VideoGravity::Fit);
        assert!((rect.height() - 900.0).abs() < 1e-3);
        assert!((rect.width() - 1200.0).abs() < 1e-3);
        assert!((rect.min.x - 200.0).abs() < 1e-3);
    }

    #[test]
    fn test_fill_covers_view() {
        let view = Rect::from_min_size(Pos2::ZERO, Vec2::new(1600.0, 900.0));
        let rect = video_rect_in_view(Vec2::new(640.0, 480.0), view, VideoGravity::Fill);
        assert!((rect.width() - 1600.0).abs() < 1e-3);
        assert!((rect.height() - 1200.0).abs() < 1e-3);
        assert!(rect.min.y < 0.0);
    }

    #[test]
    fn test_view_mapping_round_trip() {
        let view = Rect::from_min_size(Pos2::new(200.0, 40.0), Vec2::new(800.0, 600.0));
        let video = Vec2::new(1280.0, 720.0);
        for gravity in [VideoGravity::Fit, VideoGravity::Fill] {
            let q = Pos2::new(0.3, 0.6);
            let on_view = video_to_view(q, video, view, gravity);
            let back = view_to_video(on_view, video, view, gravity);
            assert!((back.x - q.x).abs() < 1e-4);
            assert!((back.y - q.y).abs() < 1e-4);
        }
    }

    #[test]
    fn test_center_maps_to_view_center() {
        let view = Rect::from_min_size(Pos2::new(10.0, 20.0), Vec2::new(300.0, 500.0));
        let center = video_to_view(Pos2::new(0.5, 0.5), Vec2::new(1920.0, 1080.0), view, VideoGravity::Fit);
        assert!((center - view.center()).length() < 1e-3);
    }

    #[test]
    fn test_letterbox_landscape() {
        let lb = letterbox(640, 480, 224);
        assert_eq!(lb.scaled_width, 224);
        assert_eq!(lb.scaled_height, 168);
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 28);

        let top_middle = lb.unmap(112.0, 28.0);
        assert!((top_middle.x - 0.5).abs() < 1e-6);
        assert!(top_middle.y.abs() < 1e-6);

        let bottom_right = lb.unmap(224.0, 196.0);
        assert!((bottom_right.x - 1.0).abs() < 1e-6);
        assert!((bottom_right.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_portrait() {
        let lb = letterbox(720, 1280, 256);
        assert_eq!(lb.scaled_height, 256);
        assert_eq!(lb.scaled_width, 144);
        assert_eq!(lb.pad_x, 56);
        assert_eq!(lb.pad_y, 0);

        // Padding maps outside the frame
        assert!(lb.unmap(10.0, 100.0).x < 0.0);
    }

    #[test]
    fn test_region_unmap_to_frame() {
        // 200px square around (400, 300) in a 1280x720 frame
        let roi = Roi::square(Pos2::new(400.0, 300.0), 200.0);
        let lb = letterbox_region(1280, 720, roi, 224);
        assert_eq!((lb.scaled_width, lb.scaled_height), (224, 224));
        assert_eq!((lb.pad_x, lb.pad_y), (0, 0));

        let center = lb.unmap_pixels(112.0, 112.0);
        assert!((center.x - 400.0).abs() < 1e-3);
        assert!((center.y - 300.0).abs() < 1e-3);

        let corner = lb.unmap(0.0, 0.0);
        assert!((corner.x - 300.0 / 1280.0).abs() < 1e-5);
        assert!((corner.y - 200.0 / 720.0).abs() < 1e-5);
    }

    #[test]
    fn test_region_past_frame_edge() {
        let roi = Roi::square(Pos2::new(10.0, 10.0), 100.0);
        assert!(roi.overlaps_frame(640, 480));
        let lb = letterbox_region(640, 480, roi, 100);
        let origin = lb.unmap_pixels(40.0, 40.0);
        assert!(origin.x.abs() < 1e-4 && origin.y.abs() < 1e-4);

        assert!(!Roi::square(Pos2::new(-200.0, 50.0), 100.0).overlaps_frame(640, 480));
    }

    #[test]
    fn test_roi_around_points() {
        let points = [Pos2::new(100.0, 100.0), Pos2::new(140.0, 180.0), Pos2::new(120.0, 150.0)];
        let roi = Roi::around_points(points, 2.0).unwrap();
        // Bounding box is 40x80 centered at (120, 140)
        assert_eq!(roi.center(), Pos2::new(120.0, 140.0));
        assert_eq!((roi.width, roi.height), (160.0, 160.0));

        assert!(Roi::around_points([Pos2::new(5.0, 5.0)], 2.0).is_none());
        assert!(Roi::around_points(std::iter::empty(), 2.0).is_none());
    }
}
