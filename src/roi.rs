// src/roi.rs
//
// Dynamic danger zones built from the smoothed lane lines.
//
//   ┌──────────────────────────────────────────────┐
//   │                                              │
//   │               /  LOW   \                     │
//   │              /   MID    \                    │
//   │  SIDE_LEFT  /    HIGH    \  SIDE_RIGHT       │
//   └─────────────────────────────────────────────-┘
//
// Zones stack upward from the frame bottom. Their heights grow with a
// scale factor that follows ego speed, so faster driving pushes the
// danger zones further ahead.

use crate::config::RoiConfig;
use crate::geometry::{bbox_intersects_polygon, Polygon};
use crate::types::{BBox, LaneLine, Point, Zone};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct RoiSet {
    pub zones: BTreeMap<Zone, Polygon>,
    pub scale: f32,
    pub lane_width: f32,
}

impl RoiSet {
    pub fn get(&self, zone: Zone) -> Option<&Polygon> {
        self.zones.get(&zone)
    }

    /// First zone, in priority order, whose polygon overlaps the box.
    pub fn classify(&self, bbox: &BBox) -> Option<Zone> {
        Zone::PRIORITY.iter().copied().find(|zone| {
            self.zones
                .get(zone)
                .is_some_and(|poly| bbox_intersects_polygon(bbox, poly))
        })
    }
}

pub struct RoiBuilder {
    config: RoiConfig,
}

impl RoiBuilder {
    pub fn new(config: RoiConfig) -> Self {
        Self { config }
    }

    /// Base scale from lane width, raised by ego speed, capped at 1.0.
    /// Non-decreasing in `ego_speed` and never below the base scale.
    pub fn scale(&self, lane_width: f32, ego_speed: f32) -> f32 {
        let cfg = &self.config;
        let base = (lane_width / cfg.reference_lane_width).clamp(cfg.min_base_scale, cfg.max_base_scale);
        let boost = ego_speed.max(0.0) * cfg.speed_gain * cfg.speed_scale_factor;
        (base + boost).min(1.0).max(base)
    }

    /// `None` when either line is missing or the lane has no width.
    pub fn build(
        &self,
        left: Option<&LaneLine>,
        right: Option<&LaneLine>,
        frame_size: (u32, u32),
        ego_speed: f32,
    ) -> Option<RoiSet> {
        let (left, right) = (left?, right?);
        let (w, h) = frame_size;
        let max_x = (w as f32 - 1.0).max(0.0);
        let y_bottom = h as f32;

        let lane_width = (right.x_at(y_bottom) - left.x_at(y_bottom)).abs();
        if !lane_width.is_finite() || lane_width <= f32::EPSILON {
            return None;
        }

        let cfg = &self.config;
        let scale = self.scale(lane_width, ego_speed);

        let high_top = (y_bottom - cfg.high_height * scale).max(0.0);
        let mid_top = (high_top - cfg.mid_height * scale).max(0.0);
        // Never let the far zone float above where the lane was actually seen
        let lane_top = left.top_y().max(right.top_y());
        let low_top = (mid_top - cfg.low_height * scale)
            .max(lane_top)
            .max(0.0)
            .min(mid_top);

        let lx = |y: f32| Point::new(left.x_at(y), y);
        let rx = |y: f32| Point::new(right.x_at(y), y);

        let mut zones = BTreeMap::new();
        zones.insert(
            Zone::High,
            vec![lx(y_bottom), lx(high_top), rx(high_top), rx(y_bottom)],
        );
        zones.insert(
            Zone::Mid,
            vec![lx(high_top), lx(mid_top), rx(mid_top), rx(high_top)],
        );
        zones.insert(
            Zone::Low,
            vec![lx(mid_top), lx(low_top), rx(low_top), rx(mid_top)],
        );

        let offset = lane_width * cfg.side_offset_ratio;
        let side_top = (high_top - cfg.side_raise_px).max(0.0);
        let clamp_x = |x: f32| x.clamp(0.0, max_x);

        let (rb, rt) = (right.x_at(y_bottom), right.x_at(high_top));
        zones.insert(
            Zone::SideRight,
            vec![
                Point::new(clamp_x(rb), y_bottom),
                Point::new(clamp_x(rt), high_top),
                Point::new(clamp_x(rt + offset), side_top),
                Point::new(clamp_x(rb + offset), y_bottom),
            ],
        );

        let (lb, lt) = (left.x_at(y_bottom), left.x_at(high_top));
        zones.insert(
            Zone::SideLeft,
            vec![
                Point::new(clamp_x(lb - offset), y_bottom),
                Point::new(clamp_x(lt - offset), side_top),
                Point::new(clamp_x(lt), high_top),
                Point::new(clamp_x(lb), y_bottom),
            ],
        );

        debug!(
            "ROI built: lane_width={:.1}, scale={:.3}, tops high={:.1} mid={:.1} low={:.1}",
            lane_width, scale, high_top, mid_top, low_top
        );

        Some(RoiSet {
            zones,
            scale,
            lane_width,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::geometry::is_simple_quad;

    /// 1280x720 frame, 300px wide lane at the bottom.
    pub(crate) fn lane_pair() -> (LaneLine, LaneLine) {
        (
            LaneLine::new(490.0, 720.0, 560.0, 432.0),
            LaneLine::new(790.0, 720.0, 720.0, 432.0),
        )
    }

    fn builder() -> RoiBuilder {
        RoiBuilder::new(RoiConfig::default())
    }

    fn close(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3
    }

    #[test]
    fn test_missing_line_gives_no_roi() {
        let (left, _) = lane_pair();
        assert!(builder().build(Some(&left), None, (1280, 720), 0.0).is_none());
        assert!(builder().build(None, None, (1280, 720), 0.0).is_none());
    }

    #[test]
    fn test_zones_are_contiguous_quads() {
        let (left, right) = lane_pair();
        for speed in [0.0, 10.0, 40.0, 200.0] {
            let roi = builder()
                .build(Some(&left), Some(&right), (1280, 720), speed)
                .unwrap();
            assert_eq!(roi.zones.len(), 5);
            for poly in roi.zones.values() {
                assert!(is_simple_quad(poly), "not a simple quad: {:?}", poly);
            }
            let high = roi.get(Zone::High).unwrap();
            let mid = roi.get(Zone::Mid).unwrap();
            let low = roi.get(Zone::Low).unwrap();
            assert!(close(mid[0], high[1]) && close(mid[3], high[2]));
            assert!(close(low[0], mid[1]) && close(low[3], mid[2]));
        }
    }

    #[test]
    fn test_high_zone_height_follows_scale() {
        let (left, right) = lane_pair();
        let roi = builder()
            .build(Some(&left), Some(&right), (1280, 720), 0.0)
            .unwrap();
        // 300px lane -> base scale clamps to 0.6
        assert!((roi.scale - 0.6).abs() < 1e-6);
        let high = roi.get(Zone::High).unwrap();
        assert!((high[1].y - (720.0 - 150.0 * 0.6)).abs() < 1e-3);
    }

    #[test]
    fn test_scale_monotonic_and_clamped() {
        let b = builder();
        let mut prev = 0.0;
        for i in 0..200 {
            let s = b.scale(300.0, i as f32);
            assert!(s >= prev);
            assert!((0.6..=1.0).contains(&s));
            prev = s;
        }
        assert_eq!(b.scale(300.0, 1e6), 1.0);
        assert_eq!(b.scale(100.0, 0.0), 0.5);
        assert_eq!(b.scale(220.0, 0.0), 0.55);
    }

    #[test]
    fn test_low_zone_clamped_to_lane_top() {
        let (left, right) = lane_pair();
        let roi = builder()
            .build(Some(&left), Some(&right), (1280, 720), 1000.0)
            .unwrap();
        // At scale 1.0 the stacked tops would reach y=320, above the lane top 432
        let low = roi.get(Zone::Low).unwrap();
        assert!((low[1].y - 432.0).abs() < 1e-3);
    }

    #[test]
    fn test_side_zones_clamped_to_frame() {
        let left = LaneLine::new(100.0, 720.0, 200.0, 432.0);
        let right = LaneLine::new(1200.0, 720.0, 1100.0, 432.0);
        let roi = builder()
            .build(Some(&left), Some(&right), (1280, 720), 0.0)
            .unwrap();
        for p in roi.get(Zone::SideRight).unwrap() {
            assert!(p.x <= 1279.0);
        }
        for p in roi.get(Zone::SideLeft).unwrap() {
            assert!(p.x >= 0.0);
        }
    }

    #[test]
    fn test_classification_priority() {
        let (left, right) = lane_pair();
        let roi = builder()
            .build(Some(&left), Some(&right), (1280, 720), 0.0)
            .unwrap();
        // Box straddling high and mid resolves to high
        assert_eq!(roi.classify(&BBox::new(600.0, 600.0, 680.0, 660.0)), Some(Zone::High));
        // Box right of the lane near the bottom
        assert_eq!(roi.classify(&BBox::new(850.0, 650.0, 950.0, 710.0)), Some(Zone::SideRight));
        // Box straddling right lane boundary and the side zone still picks high first
        assert_eq!(roi.classify(&BBox::new(760.0, 680.0, 860.0, 710.0)), Some(Zone::High));
        // Far above everything
        assert_eq!(roi.classify(&BBox::new(10.0, 10.0, 50.0, 50.0)), None);
    }
}
