//! Fixture writers shared by unit and integration tests.
use std::path::Path;

use crate::catalog::{hrir_file_name, AngularGrid, Ear};

/// Write interleaved samples as a 32-bit float WAV.
pub fn write_wav(path: &Path, channels: u16, sample_rate: u32, samples: &[f32]) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for s in samples {
        writer.write_sample(*s)?;
    }
    writer.finalize()
}

/// How [write_subject] fills a synthetic subject.
#[derive(Clone, Copy, Debug)]
pub struct SubjectShape {
    /// Impulse length, which is the channel count of every file.
    pub taps: u16,

    /// Frames written past the last elevation.
    pub extra_frames: usize,

    /// Sample value for `(ear, azimuth index, elevation index, tap)`.
    pub value: fn(Ear, usize, usize, usize) -> f32,
}

impl Default for SubjectShape {
    fn default() -> Self {
        Self {
            taps: 8,
            extra_frames: 0,
            value: |ear, _, _, tap| {
                let gain = if ear == Ear::Left { 1.0 } else { 0.5 };
                gain / (tap + 1) as f32
            },
        }
    }
}

/// Write a subject directory laid out like CIPIC, measured on `grid`.
pub fn write_subject(dir: &Path, grid: &AngularGrid, shape: SubjectShape) -> Result<(), hound::Error> {
    std::fs::create_dir_all(dir)?;
    let frames = grid.elevations().len() + shape.extra_frames;

    for (az_index, azimuth) in grid.azimuths().iter().enumerate() {
        for ear in [Ear::Left, Ear::Right] {
            let mut samples = Vec::with_capacity(frames * shape.taps as usize);
            for el_index in 0..frames {
                for tap in 0..shape.taps as usize {
                    samples.push((shape.value)(ear, az_index, el_index, tap));
                }
            }
            write_wav(&dir.join(hrir_file_name(*azimuth, ear)), shape.taps, 44100, &samples)?;
        }
    }

    Ok(())
}
