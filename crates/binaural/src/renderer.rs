//! Per-source rendering: ramps, convolution, volume and metering.
use std::sync::Arc;

use crate::catalog::HrirSet;
use crate::controls::SourceControls;
use crate::convolution::{ConvolutionEngine, DirectHrirEngine};
use crate::error::{Error, Result};
use crate::level_meter::LevelMeter;
use crate::ramp::DirectionRamp;

/// Azimuth at which the stereo pan law reaches full balance.
const PAN_FULL_AZIMUTH: f32 = 80.0;

/// Everything one source needs to turn its input into stereo.
///
/// A renderer is built on the control thread and then moved into a device callback, where it lives until the session
/// stops.  The control thread reaches it only through the shared [SourceControls].
pub struct BinauralRenderer {
    engine: Option<Box<dyn ConvolutionEngine>>,
    ramp: DirectionRamp,
    meter: LevelMeter,
    dt_ms: f64,
    controls: Arc<SourceControls>,
}

impl BinauralRenderer {
    /// A renderer with no dataset, which passes mono through to both ears until one is bound.
    ///
    /// The ramps start settled at the direction currently in `controls`.
    pub fn new(controls: Arc<SourceControls>, sample_rate: u32) -> Self {
        let (azimuth, elevation) = controls.direction();
        Self {
            engine: None,
            ramp: DirectionRamp::new(azimuth, elevation),
            meter: LevelMeter::new(),
            dt_ms: 1000.0 / sample_rate as f64,
            controls,
        }
    }

    /// Bind to a dataset, replacing any engine already present.
    pub fn load_direction_source(&mut self, hrirs: Arc<HrirSet>) -> Result<()> {
        if hrirs.is_empty() {
            return Err(Error::empty_dataset());
        }

        let (azimuth, elevation) = self.ramp.current();
        self.engine = Some(Box::new(DirectHrirEngine::new(hrirs, azimuth, elevation)));
        Ok(())
    }

    /// Use a specific engine instead of the default one.
    pub fn with_engine(mut self, mut engine: Box<dyn ConvolutionEngine>) -> Self {
        let (azimuth, elevation) = self.ramp.current();
        engine.set_direction(azimuth, elevation);
        self.engine = Some(engine);
        self
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn ramp(&self) -> &DirectionRamp {
        &self.ramp
    }

    pub fn controls(&self) -> &Arc<SourceControls> {
        &self.controls
    }

    /// Pick up direction changes made by the control thread.
    ///
    /// Called once per block; the ramps then run sample-accurately within it.
    pub fn sync_controls(&mut self) {
        let (azimuth, elevation) = self.controls.direction();
        self.ramp.set_target(azimuth, elevation);
    }

    /// Move straight to the direction in the controls, without ramping.  For sources which are about to start.
    pub fn snap_to_controls(&mut self) {
        let (azimuth, elevation) = self.controls.direction();
        self.ramp.jump_to(azimuth, elevation);
    }

    /// Render one mono frame.
    pub fn process_frame(&mut self, sample: f32) -> (f32, f32) {
        let (azimuth, elevation) = self.ramp.advance(self.dt_ms);
        match self.engine.as_mut() {
            Some(engine) => {
                engine.set_direction(azimuth, elevation);
                engine.process(sample)
            }
            None => (sample, sample),
        }
    }

    /// Render one stereo frame with a simple balance law instead of HRIRs.
    ///
    /// Only azimuth matters here; elevation still ramps so that switching back to mono is seamless.
    pub fn process_stereo_frame(&mut self, left: f32, right: f32) -> (f32, f32) {
        let (azimuth, _) = self.ramp.advance(self.dt_ms);
        let (gain_l, gain_r) = pan_gains(azimuth);
        (left * gain_l, right * gain_r)
    }

    pub fn apply_volume_and_mute(left: f32, right: f32, volume: f32, muted: bool) -> (f32, f32) {
        if muted {
            (0.0, 0.0)
        } else {
            (left * volume, right * volume)
        }
    }

    /// Render a block of interleaved input with `channels` channels (1 or 2) into interleaved stereo.
    ///
    /// Frames past the end of the shorter of the two buffers are left alone.  The meter sees the input's first
    /// channel before volume and mute, and the level is published to the controls when the block is done.
    ///
    /// Returns the number of frames rendered.
    pub fn process_block(&mut self, input: &[f32], channels: usize, output: &mut [f32]) -> usize {
        debug_assert!(channels == 1 || channels == 2);

        self.sync_controls();
        let volume = self.controls.volume();
        let muted = self.controls.is_muted();

        let frames = (input.len() / channels).min(output.len() / 2);
        for (inp, out) in input
            .chunks_exact(channels)
            .zip(output.chunks_exact_mut(2))
            .take(frames)
        {
            let (l, r) = if channels == 1 {
                self.process_frame(inp[0])
            } else {
                self.process_stereo_frame(inp[0], inp[1])
            };
            let (l, r) = Self::apply_volume_and_mute(l, r, volume, muted);
            out[0] = l;
            out[1] = r;
        }

        self.meter_first_channel(&input[..frames * channels], channels);
        self.controls.publish_level(self.meter.current_level());
        frames
    }

    fn meter_first_channel(&mut self, input: &[f32], channels: usize) {
        if channels == 1 {
            self.meter.update(input);
            return;
        }

        // Only the tail is kept by the meter anyway, so gather at most its capacity of frames.
        let mut scratch = arrayvec::ArrayVec::<f32, { crate::config::LEVEL_METER_CAPACITY }>::new();
        let frames = input.len() / channels;
        let skip = frames.saturating_sub(scratch.capacity());
        scratch.extend(input.iter().copied().step_by(channels).skip(skip));
        self.meter.update(&scratch);
    }

    /// The level of the most recently rendered block.
    pub fn level(&self) -> f32 {
        self.meter.current_level()
    }
}

/// `(left, right)` gains for an azimuth under the balance law.
pub fn pan_gains(azimuth: f32) -> (f32, f32) {
    let pan = (azimuth / PAN_FULL_AZIMUTH).clamp(-1.0, 1.0);
    ((1.0 - pan).min(1.0), (1.0 + pan).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::catalog::{AngularGrid, Subject};
    use crate::config::SR;

    fn renderer() -> (BinauralRenderer, Arc<SourceControls>) {
        let controls = Arc::new(SourceControls::new());
        (BinauralRenderer::new(controls.clone(), SR), controls)
    }

    /// Left ear hears the sample as is, right ear at half volume, at every cell.
    fn flat_set() -> Arc<HrirSet> {
        let grid = AngularGrid::new(vec![-40.0, 0.0, 40.0], vec![0.0, 45.0]).unwrap();
        let left = vec![1.0; 6];
        let right = vec![0.5; 6];
        let subject = Subject {
            name: "flat".into(),
            path: "flat".into(),
        };
        Arc::new(HrirSet::from_parts(subject, grid, 1, left, right).unwrap())
    }

    struct Recording {
        directions: std::sync::Arc<std::sync::Mutex<Vec<(f32, f32)>>>,
    }

    impl ConvolutionEngine for Recording {
        fn set_direction(&mut self, azimuth: f32, elevation: f32) {
            self.directions.lock().unwrap().push((azimuth, elevation));
        }

        fn process(&mut self, sample: f32) -> (f32, f32) {
            (sample, -sample)
        }
    }

    #[test]
    fn test_passthrough_without_dataset() {
        let (mut r, _) = renderer();
        assert!(!r.has_engine());
        assert_eq!(r.process_frame(0.3), (0.3, 0.3));
    }

    #[test]
    fn test_rejects_empty_dataset() {
        let (mut r, _) = renderer();
        let grid = AngularGrid::new(vec![0.0], vec![0.0]).unwrap();
        let empty = HrirSet::from_parts(
            Subject {
                name: "empty".into(),
                path: "empty".into(),
            },
            grid,
            0,
            vec![],
            vec![],
        )
        .unwrap();
        let err = r.load_direction_source(Arc::new(empty)).unwrap_err();
        assert!(err.is_empty_dataset());
        assert!(!r.has_engine());
    }

    #[test]
    fn test_uses_dataset() {
        let (mut r, _) = renderer();
        r.load_direction_source(flat_set()).unwrap();
        assert_eq!(r.process_frame(0.8), (0.8, 0.4));
    }

    #[test]
    fn test_engine_follows_ramp() {
        let (r, controls) = renderer();
        let directions = Arc::new(std::sync::Mutex::new(vec![]));
        let mut r = r.with_engine(Box::new(Recording {
            directions: directions.clone(),
        }));

        controls.set_azimuth(40.0);
        let input = vec![0.0; 4410];
        let mut output = vec![0.0; 8820];
        r.process_block(&input, 1, &mut output);

        let seen = directions.lock().unwrap();
        // One call from with_engine, then one per frame.
        assert_eq!(seen.len(), 4411);
        assert_eq!(seen[0], (0.0, 0.0));
        assert!(seen[1].0 > 0.0 && seen[1].0 < 1.0);
        assert_eq!(*seen.last().unwrap(), (40.0, 0.0));
        assert!(seen.windows(2).all(|w| w[1].0 >= w[0].0));
    }

    #[test]
    fn test_snap_to_controls() {
        let (mut r, controls) = renderer();
        controls.set_azimuth(-30.0);
        controls.set_elevation(20.0);
        r.snap_to_controls();
        assert!(r.ramp().is_idle());
        assert_eq!(r.ramp().current(), (-30.0, 20.0));
    }

    #[test]
    fn test_pan_law() {
        assert_eq!(pan_gains(0.0), (1.0, 1.0));
        assert_eq!(pan_gains(80.0), (0.0, 1.0));
        assert_eq!(pan_gains(-80.0), (1.0, 0.0));
        assert_eq!(pan_gains(-200.0), (1.0, 0.0));
        assert_eq!(pan_gains(40.0), (0.5, 1.0));
    }

    #[test]
    fn test_stereo_path_pans_without_convolving() {
        let (mut r, controls) = renderer();
        r.load_direction_source(flat_set()).unwrap();
        controls.set_azimuth(40.0);
        r.sync_controls();
        r.ramp.jump_to(40.0, 0.0);
        assert_eq!(r.process_stereo_frame(1.0, 1.0), (0.5, 1.0));
    }

    #[test]
    fn test_volume_and_mute() {
        assert_eq!(BinauralRenderer::apply_volume_and_mute(1.0, -0.5, 0.5, false), (0.5, -0.25));
        assert_eq!(BinauralRenderer::apply_volume_and_mute(1.0, -0.5, 0.5, true), (0.0, 0.0));
    }

    #[test]
    fn test_meter_runs_before_mute() {
        let (mut r, controls) = renderer();
        controls.set_muted(true);
        let input = vec![0.25; 512];
        let mut output = vec![1.0; 1024];
        assert_eq!(r.process_block(&input, 1, &mut output), 512);
        assert!(output.iter().all(|s| *s == 0.0));
        assert!((controls.level() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_block_meters_first_channel() {
        let (mut r, controls) = renderer();
        let input = [0.25, 0.0].repeat(100);
        let mut output = vec![0.0; 200];
        r.process_block(&input, 2, &mut output);
        assert!((controls.level() - 0.5).abs() < 1e-6);
        assert_eq!(&output[..2], &[0.25, 0.0]);
    }

    #[test]
    fn test_short_output_limits_frames() {
        let (mut r, _) = renderer();
        let input = vec![0.1; 100];
        let mut output = vec![0.0; 20];
        assert_eq!(r.process_block(&input, 1, &mut output), 10);
    }
}
