// src/geometry.rs
//
// Planar helpers for zone membership. Boxes have area, so membership is an
// area-overlap test rather than a point-in-polygon test.

use crate::types::{BBox, Point};

pub type Polygon = Vec<Point>;

/// Shoelace area, always non-negative.
pub fn polygon_area(poly: &[Point]) -> f32 {
    if poly.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0f32;
    for i in 0..poly.len() {
        let a = poly[i];
        let b = poly[(i + 1) % poly.len()];
        twice += a.x * b.y - b.x * a.y;
    }
    (twice * 0.5).abs()
}

#[derive(Clone, Copy)]
enum Edge {
    Left(f32),
    Right(f32),
    Top(f32),
    Bottom(f32),
}

impl Edge {
    fn inside(&self, p: &Point) -> bool {
        match *self {
            Edge::Left(x) => p.x >= x,
            Edge::Right(x) => p.x <= x,
            Edge::Top(y) => p.y >= y,
            Edge::Bottom(y) => p.y <= y,
        }
    }

    fn intersect(&self, a: &Point, b: &Point) -> Point {
        match *self {
            Edge::Left(x) | Edge::Right(x) => {
                let t = (x - a.x) / (b.x - a.x);
                Point::new(x, a.y + t * (b.y - a.y))
            }
            Edge::Top(y) | Edge::Bottom(y) => {
                let t = (y - a.y) / (b.y - a.y);
                Point::new(a.x + t * (b.x - a.x), y)
            }
        }
    }
}

/// Sutherland-Hodgman clip of `subject` against an axis-aligned box.
/// The box is convex, so any simple subject polygon clips correctly.
pub fn clip_polygon_to_rect(subject: &[Point], rect: &BBox) -> Polygon {
    let edges = [
        Edge::Left(rect.x1),
        Edge::Right(rect.x2),
        Edge::Top(rect.y1),
        Edge::Bottom(rect.y2),
    ];

    let mut output: Polygon = subject.to_vec();
    for edge in edges {
        if output.is_empty() {
            break;
        }
        let input = std::mem::take(&mut output);
        let mut prev = input[input.len() - 1];
        for curr in input {
            let curr_in = edge.inside(&curr);
            let prev_in = edge.inside(&prev);
            if curr_in {
                if !prev_in {
                    output.push(edge.intersect(&prev, &curr));
                }
                output.push(curr);
            } else if prev_in {
                output.push(edge.intersect(&prev, &curr));
            }
            prev = curr;
        }
    }
    output
}

/// Overlap area between a box and a polygon.
pub fn intersection_area(bbox: &BBox, poly: &[Point]) -> f32 {
    if bbox.width() <= 0.0 || bbox.height() <= 0.0 || poly.len() < 3 {
        return 0.0;
    }
    polygon_area(&clip_polygon_to_rect(poly, bbox))
}

pub fn bbox_intersects_polygon(bbox: &BBox, poly: &[Point]) -> bool {
    intersection_area(bbox, poly) > 0.0
}

#[cfg(test)]
fn cross(o: &Point, a: &Point, b: &Point) -> f32 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

#[cfg(test)]
fn segments_cross(p1: &Point, p2: &Point, q1: &Point, q2: &Point) -> bool {
    let d1 = cross(q1, q2, p1);
    let d2 = cross(q1, q2, p2);
    let d3 = cross(p1, p2, q1);
    let d4 = cross(p1, p2, q2);
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

/// True when `quad` has four vertices and its two pairs of opposite edges
/// do not properly cross. Degenerate (zero-height) quads count as simple.
#[cfg(test)]
pub fn is_simple_quad(quad: &[Point]) -> bool {
    if quad.len() != 4 {
        return false;
    }
    !segments_cross(&quad[0], &quad[1], &quad[2], &quad[3])
        && !segments_cross(&quad[1], &quad[2], &quad[3], &quad[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f32, y: f32, s: f32) -> Polygon {
        vec![
            Point::new(x, y),
            Point::new(x + s, y),
            Point::new(x + s, y + s),
            Point::new(x, y + s),
        ]
    }

    #[test]
    fn test_area_of_square() {
        assert!((polygon_area(&square(0.0, 0.0, 10.0)) - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_partial_overlap_area() {
        let poly = square(0.0, 0.0, 10.0);
        let bbox = BBox::new(5.0, 5.0, 15.0, 15.0);
        assert!((intersection_area(&bbox, &poly) - 25.0).abs() < 1e-3);
    }

    #[test]
    fn test_box_inside_polygon_without_containing_center() {
        // Trapezoid; box overlaps only a corner region
        let poly = vec![
            Point::new(0.0, 100.0),
            Point::new(40.0, 0.0),
            Point::new(60.0, 0.0),
            Point::new(100.0, 100.0),
        ];
        let bbox = BBox::new(80.0, 80.0, 140.0, 140.0);
        assert!(bbox_intersects_polygon(&bbox, &poly));
        assert!(!bbox_intersects_polygon(&BBox::new(0.0, 0.0, 10.0, 10.0), &poly));
    }

    #[test]
    fn test_touching_edge_is_not_intersection() {
        let poly = square(0.0, 0.0, 10.0);
        let bbox = BBox::new(10.0, 0.0, 20.0, 10.0);
        assert!(!bbox_intersects_polygon(&bbox, &poly));
    }

    #[test]
    fn test_simple_quad_detection() {
        assert!(is_simple_quad(&square(0.0, 0.0, 5.0)));
        let bowtie = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 10.0),
        ];
        assert!(!is_simple_quad(&bowtie));
    }
}
