//! Fixed parameters of the renderer, plus the few knobs which are chosen at runtime.
use serde::Deserialize;

/// The sample rate of the live (capture) path, and of the CIPIC measurements.
///
/// Playback sessions run at the rate of their file instead; nothing in this crate resamples.
pub const SR: u32 = 44100;

/// How long a direction change takes to complete.
pub const RAMP_DURATION_MS: f64 = 50.0;

/// Target changes smaller than this are ignored, so that slider jitter does not keep restarting a ramp.
pub const DIRECTION_DEADBAND_DEGREES: f32 = 0.1;

/// Range the control surface may ask for.
pub const AZIMUTH_RANGE: (f32, f32) = (-80.0, 80.0);

/// Range the control surface may ask for; past 180 is behind the listener.
pub const ELEVATION_RANGE: (f32, f32) = (-45.0, 231.0);

/// The level meter looks at no more than this many of the most recent samples.
pub const LEVEL_METER_CAPACITY: usize = 4096;

/// RMS is multiplied by this before clamping to 1, so that speech at ordinary levels moves the meter.
pub const LEVEL_METER_GAIN: f32 = 2.0;

/// Capture blocks are rendered in pieces of at most this many frames, which bounds the scratch space the capture
/// callback needs.
pub const CAPTURE_CHUNK_FRAMES: usize = 1024;

/// What the capture path does when the playback ring cannot take a whole rendered block.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep what is queued and drop the part of the new block that does not fit.
    #[default]
    DropNewest,

    /// Keep latency bounded from the reading side: before every read, the output callback discards the oldest queued
    /// audio beyond the high-water mark.  Whatever does not fit at write time is still dropped.
    DropOldest,
}

/// Options used when creating sessions.
///
/// `Default::default()` is what the live path was tuned with.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub overflow_policy: OverflowPolicy,

    /// Length of the capture-to-playback ring.
    pub output_buffer_ms: u32,

    /// How many level updates may wait for the control thread.  Updates past this are dropped until it drains; lifecycle
    /// notifications are never dropped.
    pub event_queue_len: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            overflow_policy: OverflowPolicy::DropNewest,
            output_buffer_ms: 200,
            event_queue_len: 1024,
        }
    }
}

impl SessionOptions {
    /// Ring capacity in samples for interleaved stereo at [SR].
    pub(crate) fn ring_capacity_samples(&self) -> usize {
        let frames = (SR as u64 * self.output_buffer_ms as u64 / 1000).max(1);
        frames as usize * 2
    }
}

pub(crate) fn clamp_azimuth(azimuth: f32) -> f32 {
    azimuth.clamp(AZIMUTH_RANGE.0, AZIMUTH_RANGE.1)
}

pub(crate) fn clamp_elevation(elevation: f32) -> f32 {
    elevation.clamp(ELEVATION_RANGE.0, ELEVATION_RANGE.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ring_is_200ms_of_stereo() {
        assert_eq!(SessionOptions::default().ring_capacity_samples(), 8820 * 2);
    }

    #[test]
    fn test_options_from_yaml() {
        let opts: SessionOptions =
            serde_yaml::from_str("overflow_policy: drop_oldest\noutput_buffer_ms: 100\n").unwrap();
        assert_eq!(opts.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(opts.output_buffer_ms, 100);
        assert_eq!(opts.event_queue_len, 1024);
    }
}
