//! Smooth marker interpolation between position samples.
//!
//! Samples arrive a few seconds apart; rendering them directly makes the
//! marker jump. [`MarkerAnimator`] produces intermediate positions along an
//! ease-out-cubic curve, driven by the presentation layer's paint loop (one
//! `position_at` call per frame, no timers of its own). A new sample
//! retargets the animation from wherever the marker currently is;
//! last-write-wins, stale targets are never queued.

use couriertrack_protocol::LatLng;

/// Ease-out cubic: fast start, gentle landing.
pub fn ease_out_cubic(progress: f64) -> f64 {
    let p = progress.clamp(0.0, 1.0);
    1.0 - (1.0 - p).powi(3)
}

/// Position along the eased blend from `start` to `end`.
pub fn interpolate_position(
    start: LatLng,
    end: LatLng,
    elapsed_ms: f64,
    duration_ms: f64,
) -> LatLng {
    if duration_ms <= 0.0 || elapsed_ms >= duration_ms {
        return end;
    }
    let eased = ease_out_cubic(elapsed_ms / duration_ms);
    LatLng::new(
        start.lat + (end.lat - start.lat) * eased,
        start.lng + (end.lng - start.lng) * eased,
    )
}

/// Initial compass bearing from one coordinate to another, degrees 0-360.
/// Used to rotate the courier marker along its direction of travel.
pub fn bearing_degrees(from: LatLng, to: LatLng) -> f64 {
    let phi1 = from.lat.to_radians();
    let phi2 = to.lat.to_radians();
    let dlambda = (to.lng - from.lng).to_radians();

    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Animates one map marker between incoming samples.
#[derive(Debug, Clone)]
pub struct MarkerAnimator {
    start: LatLng,
    target: LatLng,
    current: LatLng,
    started_at_ms: f64,
    duration_ms: f64,
}

impl MarkerAnimator {
    pub fn new(initial: LatLng, duration_ms: f64) -> Self {
        Self {
            start: initial,
            target: initial,
            current: initial,
            started_at_ms: 0.0,
            duration_ms,
        }
    }

    /// Restart the animation toward a new target, beginning at the marker's
    /// current (possibly mid-flight) position.
    pub fn retarget(&mut self, target: LatLng, now_ms: f64) {
        self.start = self.current;
        self.target = target;
        self.started_at_ms = now_ms;
    }

    /// Rendered position for this frame.
    pub fn position_at(&mut self, now_ms: f64) -> LatLng {
        let elapsed = now_ms - self.started_at_ms;
        self.current = interpolate_position(self.start, self.target, elapsed, self.duration_ms);
        self.current
    }

    /// Marker rotation for this frame, or `None` while not moving.
    pub fn rotation_degrees(&self) -> Option<f64> {
        if self.start == self.target {
            return None;
        }
        Some(bearing_degrees(self.start, self.target))
    }

    pub fn target(&self) -> LatLng {
        self.target
    }

    /// Whether the current animation has reached its target.
    pub fn is_settled(&self, now_ms: f64) -> bool {
        now_ms - self.started_at_ms >= self.duration_ms
    }
}
