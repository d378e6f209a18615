//! Optional temporal smoothing of the eye region.
//!
//! With the defaults (`alpha = 1.0`, `hold_frames = 0`) every frame uses its
//! own raw region and a lost frame yields no region.

use serde::{Deserialize, Serialize};

use crate::geometry::{EyeRegion, Point2};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// Weight of the newest region in `(0, 1]`.
    pub alpha: f32,
    /// Frames to keep reusing the last region after tracking drops.
    pub hold_frames: u32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            hold_frames: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegionSmoother {
    config: SmoothingConfig,
    last: Option<EyeRegion>,
    missed: u32,
}

impl RegionSmoother {
    pub fn new(config: SmoothingConfig) -> Self {
        Self {
            config,
            last: None,
            missed: 0,
        }
    }

    /// Fold in this frame's region, `None` when tracking was lost.
    pub fn update(&mut self, raw: Option<EyeRegion>) -> Option<EyeRegion> {
        match raw {
            Some(region) => {
                self.missed = 0;
                let next = match self.last {
                    Some(prev) if self.config.alpha < 1.0 => blend(&prev, &region, self.config.alpha),
                    _ => region,
                };
                self.last = Some(next);
                Some(next)
            }
            None => {
                self.missed += 1;
                if self.missed > self.config.hold_frames {
                    self.last = None;
                }
                self.last
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.missed = 0;
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn blend(prev: &EyeRegion, next: &EyeRegion, alpha: f32) -> EyeRegion {
    // blend the angle along the shortest arc
    let mut delta = next.angle - prev.angle;
    while delta > std::f32::consts::PI {
        delta -= std::f32::consts::TAU;
    }
    while delta < -std::f32::consts::PI {
        delta += std::f32::consts::TAU;
    }

    EyeRegion {
        x: lerp(prev.x, next.x, alpha),
        y: lerp(prev.y, next.y, alpha),
        width: lerp(prev.width, next.width, alpha),
        height: lerp(prev.height, next.height, alpha),
        angle: prev.angle + delta * alpha,
        side: lerp(prev.side, next.side, alpha),
        center: Point2 {
            x: lerp(prev.center.x, next.center.x, alpha),
            y: lerp(prev.center.y, next.center.y, alpha),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(cx: f32, angle: f32) -> EyeRegion {
        EyeRegion {
            x: cx - 10.0,
            y: 45.0,
            width: 20.0,
            height: 10.0,
            angle,
            side: 23.0,
            center: Point2::new(cx, 50.0),
        }
    }

    #[test]
    fn test_default_is_passthrough() {
        let mut s = RegionSmoother::new(SmoothingConfig::default());
        assert_eq!(s.update(Some(region(100.0, 0.1))), Some(region(100.0, 0.1)));
        assert_eq!(s.update(Some(region(120.0, 0.2))), Some(region(120.0, 0.2)));
        assert_eq!(s.update(None), None);
    }

    #[test]
    fn test_exponential_blend() {
        let mut s = RegionSmoother::new(SmoothingConfig {
            alpha: 0.5,
            hold_frames: 0,
        });
        s.update(Some(region(100.0, 0.0)));
        let r = s.update(Some(region(120.0, 0.2))).unwrap();
        assert!((r.center.x - 110.0).abs() < 1e-5);
        assert!((r.angle - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_angle_blends_across_pi() {
        let mut s = RegionSmoother::new(SmoothingConfig {
            alpha: 0.5,
            hold_frames: 0,
        });
        s.update(Some(region(100.0, 3.1)));
        let r = s.update(Some(region(100.0, -3.1))).unwrap();
        assert!(r.angle.abs() > 3.0, "angle={}", r.angle);
    }

    #[test]
    fn test_hold_last_region() {
        let mut s = RegionSmoother::new(SmoothingConfig {
            alpha: 1.0,
            hold_frames: 2,
        });
        s.update(Some(region(100.0, 0.0)));
        assert!(s.update(None).is_some());
        assert!(s.update(None).is_some());
        assert!(s.update(None).is_none());
        // reacquired
        assert!(s.update(Some(region(90.0, 0.0))).is_some());
    }
}
