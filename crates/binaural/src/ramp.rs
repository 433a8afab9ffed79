//! Smooth direction changes.
//!
//! Switching HRIRs abruptly clicks, so the direction a renderer uses trails the requested one.  Each axis has its own
//! [Ramp].  A request restarts that axis's fixed-length ramp from wherever it currently is, and each frame moves the
//! current value the remaining fraction of the way there.  That is linear within one ramp, and a new request mid-ramp
//! bends the path without a jump.
use crate::config::{DIRECTION_DEADBAND_DEGREES, RAMP_DURATION_MS};

/// Anything left below this is treated as done, so float error cannot leave a ramp a hair short of its target.
const REMAINING_EPSILON_MS: f64 = 1e-6;

/// One axis.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Ramp {
    current: f32,
    target: f32,
    remaining_ms: f64,
}

impl Ramp {
    /// A ramp at rest at `value`.
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            remaining_ms: 0.0,
        }
    }

    /// Request a new value.  Requests within [DIRECTION_DEADBAND_DEGREES] of the current target are ignored; anything
    /// else restarts the ramp at full length.
    pub fn set_target(&mut self, target: f32) {
        if (target - self.target).abs() <= DIRECTION_DEADBAND_DEGREES {
            return;
        }

        self.target = target;
        self.remaining_ms = RAMP_DURATION_MS;
    }

    pub fn jump_to(&mut self, value: f32) {
        *self = Self::new(value);
    }

    /// Move `dt_ms` along the ramp and return the new current value.
    pub fn advance(&mut self, dt_ms: f64) -> f32 {
        if self.remaining_ms <= 0.0 {
            return self.current;
        }

        if dt_ms >= self.remaining_ms - REMAINING_EPSILON_MS {
            self.current = self.target;
            self.remaining_ms = 0.0;
            return self.current;
        }

        let frac = (dt_ms / self.remaining_ms) as f32;
        self.current += (self.target - self.current) * frac;
        self.remaining_ms -= dt_ms;
        self.current
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn remaining_ms(&self) -> f64 {
        self.remaining_ms
    }

    pub fn is_idle(&self) -> bool {
        self.remaining_ms <= 0.0
    }
}

/// Azimuth and elevation, ramped independently.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DirectionRamp {
    pub azimuth: Ramp,
    pub elevation: Ramp,
}

impl Default for DirectionRamp {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl DirectionRamp {
    pub fn new(azimuth: f32, elevation: f32) -> Self {
        Self {
            azimuth: Ramp::new(azimuth),
            elevation: Ramp::new(elevation),
        }
    }

    pub fn set_target(&mut self, azimuth: f32, elevation: f32) {
        self.azimuth.set_target(azimuth);
        self.elevation.set_target(elevation);
    }

    /// Move straight to a direction with no ramp, for sources which are not rendering.
    pub fn jump_to(&mut self, azimuth: f32, elevation: f32) {
        self.azimuth.jump_to(azimuth);
        self.elevation.jump_to(elevation);
    }

    /// Advance both axes and return the current `(azimuth, elevation)`.
    pub fn advance(&mut self, dt_ms: f64) -> (f32, f32) {
        (self.azimuth.advance(dt_ms), self.elevation.advance(dt_ms))
    }

    pub fn current(&self) -> (f32, f32) {
        (self.azimuth.current(), self.elevation.current())
    }

    pub fn target(&self) -> (f32, f32) {
        (self.azimuth.target(), self.elevation.target())
    }

    pub fn is_idle(&self) -> bool {
        self.azimuth.is_idle() && self.elevation.is_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::config::SR;

    fn frame_ms() -> f64 {
        1000.0 / SR as f64
    }

    #[test]
    fn test_reaches_target_after_duration() {
        let mut ramp = DirectionRamp::new(0.0, 0.0);
        ramp.set_target(30.0, 10.0);

        // 50ms is 2205 frames.
        for _ in 0..2204 {
            ramp.advance(frame_ms());
        }
        assert!(!ramp.is_idle());
        assert!(ramp.azimuth.current() < 30.0);

        assert_eq!(ramp.advance(frame_ms()), (30.0, 10.0));
        assert!(ramp.is_idle());
        assert_eq!(ramp.azimuth.remaining_ms(), 0.0);
    }

    #[test]
    fn test_halfway_is_halfway() {
        let mut ramp = Ramp::new(0.0);
        ramp.set_target(40.0);
        assert!((ramp.advance(25.0) - 20.0).abs() < 1e-4);
        assert_eq!(ramp.advance(25.0), 40.0);
    }

    #[test]
    fn test_idle_does_not_drift() {
        let mut ramp = Ramp::new(0.0);
        ramp.set_target(80.0);
        ramp.advance(RAMP_DURATION_MS);
        for _ in 0..10_000 {
            assert_eq!(ramp.advance(frame_ms()), 80.0);
        }
        assert_eq!(ramp.remaining_ms(), 0.0);
    }

    #[test]
    fn test_deadband() {
        let mut ramp = DirectionRamp::new(10.0, 0.0);
        ramp.set_target(10.05, -0.05);
        assert!(ramp.is_idle());
        assert_eq!(ramp.target(), (10.0, 0.0));

        ramp.set_target(10.5, 0.0);
        assert!(!ramp.azimuth.is_idle());
        assert!(ramp.elevation.is_idle());
        assert_eq!(ramp.azimuth.remaining_ms(), RAMP_DURATION_MS);
    }

    #[test]
    fn test_retarget_midway_restarts_from_current() {
        let mut ramp = Ramp::new(0.0);
        ramp.set_target(40.0);
        let before = ramp.advance(25.0);

        ramp.set_target(-40.0);
        assert_eq!(ramp.current(), before);
        assert_eq!(ramp.remaining_ms(), RAMP_DURATION_MS);

        assert_eq!(ramp.advance(RAMP_DURATION_MS), -40.0);
    }

    #[test]
    fn test_jump_to() {
        let mut ramp = DirectionRamp::new(0.0, 0.0);
        ramp.set_target(40.0, 0.0);
        ramp.jump_to(-5.0, 12.0);
        assert!(ramp.is_idle());
        assert_eq!(ramp.current(), (-5.0, 12.0));
        assert_eq!(ramp.target(), (-5.0, 12.0));
    }

    proptest! {
        /// Moving toward a higher target never goes backwards or past it, and lands exactly within the ramp's length.
        #[test]
        fn test_monotonic_and_exact(start in -80.0f32..80.0, delta in 0.2f32..160.0) {
            let target = start + delta;
            let mut ramp = Ramp::new(start);
            ramp.set_target(target);

            let mut last = ramp.current();
            let mut elapsed = 0.0;
            while !ramp.is_idle() {
                let now = ramp.advance(frame_ms());
                elapsed += frame_ms();
                prop_assert!(now >= last);
                prop_assert!(now <= target);
                last = now;
            }

            prop_assert_eq!(ramp.current(), target);
            prop_assert!(elapsed <= RAMP_DURATION_MS + frame_ms());
        }

        /// Remaining time never leaves [0, duration], whatever the sequence of requests.
        #[test]
        fn test_remaining_bounded(targets in proptest::collection::vec((-80.0f32..80.0, 0usize..3000), 1..20)) {
            let mut ramp = Ramp::new(0.0);
            for (target, frames) in targets {
                ramp.set_target(target);
                for _ in 0..frames {
                    ramp.advance(frame_ms());
                    prop_assert!((0.0..=RAMP_DURATION_MS).contains(&ramp.remaining_ms()));
                    if ramp.is_idle() {
                        prop_assert_eq!(ramp.current(), ramp.target());
                    }
                }
            }
        }
    }
}
