//! Zero-order-hold reconstruction of sparse level changes.

use serde::{Deserialize, Serialize};

/// One vertex of a step trace. `level` is `None` until the first change.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepSample {
    pub time_s: f64,
    pub level: Option<f64>,
}

impl StepSample {
    pub fn new(time_s: f64, level: Option<f64>) -> Self {
        Self { time_s, level }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PiecewiseTrace {
    pub points: Vec<StepSample>,
}

impl PiecewiseTrace {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Copy of the trace with every vertex moved by `dt` seconds.
    pub fn shifted(&self, dt: f64) -> Self {
        Self {
            points: self
                .points
                .iter()
                .map(|p| StepSample::new(p.time_s + dt, p.level))
                .collect(),
        }
    }

    /// Plot-ready vertices; the absent initial level is drawn as zero.
    pub fn scaled_points(&self, scale: f64) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .map(|p| (p.time_s, p.level.unwrap_or(0.0) * scale))
            .collect()
    }
}

/// Expand `(time, level)` changes into a step trace.
///
/// The trace starts with a seed vertex at `t = 0` with no level. Each change
/// contributes two vertices at its time: the previous level, then the new one.
pub fn reconstruct_steps(events: &[(f64, f64)]) -> PiecewiseTrace {
    let mut points = Vec::with_capacity(1 + events.len() * 2);
    points.push(StepSample::new(0.0, None));
    let mut previous = None;
    for &(time_s, level) in events {
        points.push(StepSample::new(time_s, previous));
        points.push(StepSample::new(time_s, Some(level)));
        previous = Some(level);
    }
    PiecewiseTrace { points }
}
