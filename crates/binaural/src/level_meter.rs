//! Signal level for display, measured on the audio thread without allocating.
use arrayvec::ArrayVec;

use crate::config::{LEVEL_METER_CAPACITY, LEVEL_METER_GAIN};

/// A peak-ish meter for a UI: the RMS of the most recent block, scaled up and clamped to 1.
///
/// Storage is inline and fixed, so pushing never allocates.  Only the most recent [LEVEL_METER_CAPACITY] samples of a
/// block count.
pub struct LevelMeter {
    samples: ArrayVec<f32, LEVEL_METER_CAPACITY>,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelMeter {
    pub fn new() -> Self {
        Self {
            samples: ArrayVec::new(),
        }
    }

    /// Replace the meter's contents with `block`, keeping its tail if it is too long.
    pub fn update(&mut self, block: &[f32]) {
        self.samples.clear();
        let start = block.len().saturating_sub(LEVEL_METER_CAPACITY);
        // Cannot fail: the slice is at most the capacity.
        let _ = self.samples.try_extend_from_slice(&block[start..]);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `min(1, gain * rms)`, or 0 when nothing has been pushed.
    pub fn current_level(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let sum_sq: f64 = self.samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
        let rms = (sum_sq / self.samples.len() as f64).sqrt() as f32;
        (rms * LEVEL_METER_GAIN).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        let meter = LevelMeter::new();
        assert_eq!(meter.current_level(), 0.0);
    }

    #[test]
    fn test_quiet_constant() {
        let mut meter = LevelMeter::new();
        meter.update(&[0.25; 100]);
        assert!((meter.current_level() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_clamps_at_one() {
        let mut meter = LevelMeter::new();
        meter.update(&[-0.9; 64]);
        assert_eq!(meter.current_level(), 1.0);
    }

    #[test]
    fn test_sine_rms() {
        let mut meter = LevelMeter::new();
        let block = (0..4000)
            .map(|i| 0.1 * (i as f32 * 2.0 * std::f32::consts::PI / 100.0).sin())
            .collect::<Vec<_>>();
        meter.update(&block);
        // 2 * 0.1 / sqrt(2)
        assert!((meter.current_level() - 0.141_421).abs() < 1e-3);
    }

    #[test]
    fn test_keeps_tail_of_long_blocks() {
        let mut meter = LevelMeter::new();
        let mut block = vec![1.0; 10_000];
        block[10_000 - LEVEL_METER_CAPACITY..].fill(0.0);
        meter.update(&block);
        assert_eq!(meter.len(), LEVEL_METER_CAPACITY);
        assert_eq!(meter.current_level(), 0.0);
    }
}
