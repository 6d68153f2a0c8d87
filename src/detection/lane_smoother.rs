// src/detection/lane_smoother.rs
use crate::types::LaneLine;
use std::collections::VecDeque;

/// Rolling average of lane-line endpoints over the last few detections.
///
/// Once a line has been seen the smoother is sticky: frames without a new
/// detection keep returning the average of the retained history.
pub struct LineSmoother {
    history: VecDeque<LaneLine>,
    window_size: usize,
}

impl LineSmoother {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            history: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    pub fn push(&mut self, line: Option<LaneLine>) -> Option<LaneLine> {
        if let Some(line) = line {
            self.history.push_back(line);
            if self.history.len() > self.window_size {
                self.history.pop_front();
            }
        }
        self.average()
    }

    pub fn average(&self) -> Option<LaneLine> {
        if self.history.is_empty() {
            return None;
        }
        let n = self.history.len() as f32;
        let (x1, y1, x2, y2) = self
            .history
            .iter()
            .fold((0.0, 0.0, 0.0, 0.0), |acc, l| {
                (acc.0 + l.x1, acc.1 + l.y1, acc.2 + l.x2, acc.3 + l.y2)
            });
        Some(LaneLine::new(x1 / n, y1 / n, x2 / n, y2 / n))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.history.len()
    }
}
