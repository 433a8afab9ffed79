//! The filter which turns a mono sample into a stereo pair for one direction.
use std::sync::Arc;

use crate::catalog::HrirSet;

/// Something which can filter mono audio through an HRIR pair.
///
/// Renderers own their engine and call it from the render thread, once per frame.  Implementations must not allocate
/// or block in either method.
///
/// Idle renderers sit in cells shared with the control thread, hence `Sync`.
pub trait ConvolutionEngine: Send + Sync {
    /// Select the direction to render.  Called every frame; usually with the same values as last time.
    fn set_direction(&mut self, azimuth: f32, elevation: f32);

    fn process(&mut self, sample: f32) -> (f32, f32);
}

/// Direct evaluation of the convolution sum against the nearest measured cell.
///
/// HRIRs are short (200 taps for CIPIC), which is where direct convolution beats anything FFT-based.  Complexity is
/// `theta(L)` per frame where `L` is the impulse length.
pub struct DirectHrirEngine {
    hrirs: Arc<HrirSet>,
    azimuth_index: usize,
    elevation_index: usize,
    last_direction: Option<(f32, f32)>,

    /// Every input sample is written twice, at `pos` and `pos + L`, so that the most recent `L` samples are always one
    /// contiguous slice.
    history: Vec<f32>,
    pos: usize,
}

impl DirectHrirEngine {
    /// # Panics
    ///
    /// Panics if the set is empty.  Renderers check this before getting here.
    pub fn new(hrirs: Arc<HrirSet>, azimuth: f32, elevation: f32) -> Self {
        assert!(!hrirs.is_empty());
        let len = hrirs.impulse_len();
        let mut ret = Self {
            hrirs,
            azimuth_index: 0,
            elevation_index: 0,
            last_direction: None,
            history: vec![0.0; len * 2],
            pos: 0,
        };
        ret.set_direction(azimuth, elevation);
        ret
    }

    /// The grid cell in use.
    pub fn cell(&self) -> (usize, usize) {
        (self.azimuth_index, self.elevation_index)
    }
}

impl ConvolutionEngine for DirectHrirEngine {
    fn set_direction(&mut self, azimuth: f32, elevation: f32) {
        if self.last_direction == Some((azimuth, elevation)) {
            return;
        }

        let grid = self.hrirs.grid();
        self.azimuth_index = grid.nearest_azimuth(azimuth);
        self.elevation_index = grid.nearest_elevation(elevation);
        self.last_direction = Some((azimuth, elevation));
    }

    fn process(&mut self, sample: f32) -> (f32, f32) {
        let len = self.hrirs.impulse_len();
        self.history[self.pos] = sample;
        self.history[self.pos + len] = sample;

        // The window ends with the sample just written.
        let window = &self.history[self.pos + 1..self.pos + 1 + len];
        self.pos = (self.pos + 1) % len;

        let left = self.hrirs.left(self.azimuth_index, self.elevation_index);
        let right = self.hrirs.right(self.azimuth_index, self.elevation_index);

        // We could use f64 for precision, but the impulses are short and f32 keeps the loop vectorizable.
        let mut l = 0.0f32;
        let mut r = 0.0f32;
        for ((hl, hr), x) in left.iter().zip(right.iter()).zip(window.iter().rev()) {
            l += hl * x;
            r += hr * x;
        }

        (l, r)
    }
}
