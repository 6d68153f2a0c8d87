use image::RgbImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Axis-aligned bounding box in pixels, `x1 < x2`, `y1 < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) * 0.5, (self.y1 + self.y2) * 0.5)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }
}

/// Lane boundary as two endpoints. After extrapolation `(x1, y1)` sits at
/// the frame bottom and `(x2, y2)` at the upper extrapolation row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaneLine {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl LaneLine {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from slope/intercept, evaluated at two rows.
    pub fn from_slope_intercept(slope: f32, intercept: f32, y_bottom: f32, y_top: f32) -> Self {
        Self {
            x1: (y_bottom - intercept) / slope,
            y1: y_bottom,
            x2: (y_top - intercept) / slope,
            y2: y_top,
        }
    }

    #[cfg(test)]
    pub fn slope(&self) -> Option<f32> {
        let dx = self.x2 - self.x1;
        if dx.abs() < f32::EPSILON {
            None
        } else {
            Some((self.y2 - self.y1) / dx)
        }
    }

    /// x on this line at row `y`. Horizontal lines return the midpoint.
    pub fn x_at(&self, y: f32) -> f32 {
        let dy = self.y2 - self.y1;
        if dy.abs() < f32::EPSILON {
            return (self.x1 + self.x2) * 0.5;
        }
        self.x1 + (y - self.y1) * (self.x2 - self.x1) / dy
    }

    /// Smallest y (highest point in the image) of the two endpoints.
    pub fn top_y(&self) -> f32 {
        self.y1.min(self.y2)
    }

    pub fn vertical_span(&self) -> f32 {
        (self.y2 - self.y1).abs()
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }
}

/// Named danger zone relative to the ego lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    High,
    Mid,
    Low,
    SideLeft,
    SideRight,
}

impl Zone {
    /// Classification order: first intersecting zone wins.
    pub const PRIORITY: [Zone; 5] = [
        Zone::High,
        Zone::SideRight,
        Zone::SideLeft,
        Zone::Mid,
        Zone::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::High => "high",
            Zone::Mid => "mid",
            Zone::Low => "low",
            Zone::SideLeft => "side_left",
            Zone::SideRight => "side_right",
        }
    }

    pub fn is_side(&self) -> bool {
        matches!(self, Zone::SideLeft | Zone::SideRight)
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Mid,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Mid => "mid",
            RiskLevel::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decoded input frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub timestamp_s: f64,
    pub image: RgbImage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_line_interpolation() {
        let line = LaneLine::new(100.0, 720.0, 200.0, 432.0);
        assert!((line.x_at(720.0) - 100.0).abs() < 1e-4);
        assert!((line.x_at(432.0) - 200.0).abs() < 1e-4);
        assert!((line.x_at(576.0) - 150.0).abs() < 1e-4);
        assert_eq!(line.top_y(), 432.0);
    }

    #[test]
    fn test_horizontal_line_uses_midpoint() {
        let line = LaneLine::new(100.0, 300.0, 200.0, 300.0);
        assert_eq!(line.x_at(10.0), 150.0);
    }

    #[test]
    fn test_from_slope_intercept_roundtrips_slope() {
        let line = LaneLine::from_slope_intercept(-0.8, 800.0, 720.0, 432.0);
        assert!((line.slope().unwrap() + 0.8).abs() < 1e-4);
        assert_eq!(line.y1, 720.0);
    }

    #[test]
    fn test_zone_serde_names() {
        let z: Zone = serde_json::from_str("\"side_left\"").unwrap();
        assert_eq!(z, Zone::SideLeft);
        assert_eq!(Zone::SideRight.to_string(), "side_right");
    }
}
