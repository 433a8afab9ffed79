use std::sync::atomic::{AtomicBool, Ordering};

use audio_synchronization::AtomicF32;

use crate::config::{clamp_azimuth, clamp_elevation};

/// The part of a source which the control thread writes and the render thread reads.
///
/// Everything is a separate atomic, so a reader can see a new azimuth with an old elevation for one block.  That is
/// harmless: the next block sees both, and the ramps smooth over it.
#[derive(Debug)]
pub struct SourceControls {
    azimuth: AtomicF32,
    elevation: AtomicF32,
    volume: AtomicF32,
    muted: AtomicBool,

    /// Written by the render thread after every block.
    level: AtomicF32,
}

impl Default for SourceControls {
    fn default() -> Self {
        Self {
            azimuth: AtomicF32::new(0.0),
            elevation: AtomicF32::new(0.0),
            volume: AtomicF32::new(1.0),
            muted: AtomicBool::new(false),
            level: AtomicF32::new(0.0),
        }
    }
}

impl SourceControls {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn azimuth(&self) -> f32 {
        self.azimuth.load(Ordering::Relaxed)
    }

    pub fn elevation(&self) -> f32 {
        self.elevation.load(Ordering::Relaxed)
    }

    pub fn direction(&self) -> (f32, f32) {
        (self.azimuth(), self.elevation())
    }

    /// Clamped to the azimuth range.  NaN is ignored.
    pub fn set_azimuth(&self, azimuth: f32) {
        if azimuth.is_nan() {
            log::warn!("Ignoring a NaN azimuth");
            return;
        }
        self.azimuth
            .store(clamp_azimuth(azimuth), Ordering::Relaxed);
    }

    /// Clamped to the elevation range.  NaN is ignored.
    pub fn set_elevation(&self, elevation: f32) {
        if elevation.is_nan() {
            log::warn!("Ignoring a NaN elevation");
            return;
        }
        self.elevation
            .store(clamp_elevation(elevation), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        self.volume.load(Ordering::Relaxed)
    }

    /// Clamped to `0..=1`.  NaN is treated as 0.
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.volume.store(volume, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// The most recent level a renderer published, in `0..=1`.
    pub fn level(&self) -> f32 {
        self.level.load(Ordering::Relaxed)
    }

    pub(crate) fn publish_level(&self, level: f32) {
        self.level.store(level, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = SourceControls::new();
        assert_eq!(c.direction(), (0.0, 0.0));
        assert_eq!(c.volume(), 1.0);
        assert!(!c.is_muted());
        assert_eq!(c.level(), 0.0);
    }

    #[test]
    fn test_clamping() {
        let c = SourceControls::new();
        c.set_azimuth(-100.0);
        c.set_elevation(300.0);
        c.set_volume(1.5);
        assert_eq!(c.direction(), (-80.0, 231.0));
        assert_eq!(c.volume(), 1.0);

        c.set_volume(-0.5);
        assert_eq!(c.volume(), 0.0);
        c.set_volume(f32::NAN);
        assert_eq!(c.volume(), 0.0);
    }

    #[test]
    fn test_nan_angles_keep_the_direction() {
        let c = SourceControls::new();
        c.set_azimuth(30.0);
        c.set_elevation(-20.0);
        c.set_azimuth(f32::NAN);
        c.set_elevation(f32::NAN);
        assert_eq!(c.direction(), (30.0, -20.0));
    }
}
