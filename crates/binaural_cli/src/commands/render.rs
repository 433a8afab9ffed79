use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use binaural::{SourceId, SourceKind, SourceRegistry, VirtualBackend};

use crate::cli_args::{CliArgs, RenderArgs};
use crate::config::CliConfig;

/// Frames pulled from the virtual device at a time.
const BLOCK_FRAMES: usize = 1024;

pub fn render(args: &CliArgs, config: &CliConfig, render_args: &RenderArgs) -> Result<()> {
    let backend = VirtualBackend::default();
    let (mut registry, id) = super::registry_with_source(
        args,
        config,
        Arc::new(backend.clone()),
        SourceKind::File(render_args.input.clone()),
        &render_args.direction,
    )?;

    let frames = render_to_wav(&mut registry, &backend, id, &render_args.output)?;
    log::info!(
        "Rendered {} frames of {} to {}",
        frames,
        render_args.input.display(),
        render_args.output.display()
    );
    Ok(())
}

/// Play the source on `backend`, pulling as fast as it renders, and write it to a float WAV.  Returns frames written.
fn render_to_wav(
    registry: &mut SourceRegistry,
    backend: &VirtualBackend,
    id: SourceId,
    output: &Path,
) -> Result<u64> {
    registry.start_source(id)?;
    let stream = *backend
        .running_outputs()
        .first()
        .context("The source did not open an output")?;
    let format = backend
        .output_format(stream)
        .context("The output closed before rendering began")?;

    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(output, spec)
        .with_context(|| format!("Unable to create {}", output.display()))?;

    let channels = format.channels as usize;
    let mut total = 0u64;
    loop {
        let pulled = backend
            .pull_output(stream, BLOCK_FRAMES)
            .context("The output closed while rendering")?;
        for s in &pulled.samples[..pulled.frames * channels] {
            writer.write_sample(*s)?;
        }
        total += pulled.frames as u64;
        if pulled.frames < BLOCK_FRAMES {
            break;
        }
    }

    writer.finalize()?;
    registry.pump_events();
    registry.stop_source(id)?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::Parser;

    fn write_mono(path: &Path, samples: &[f32]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut w = hound::WavWriter::create(path, spec).unwrap();
        for s in samples {
            w.write_sample(*s).unwrap();
        }
        w.finalize().unwrap();
    }

    #[test]
    fn test_render_writes_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_mono(&input, &vec![0.25; 3000]);

        let args = CliArgs::parse_from([
            "binaural",
            "render",
            input.to_str().unwrap(),
            output.to_str().unwrap(),
            "--volume",
            "0.5",
        ]);
        crate::commands::dispatch_command(&args).unwrap();

        let reader = hound::WavReader::open(&output).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 22050);
        let samples = reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(samples.len(), 6000);
        assert!(samples.iter().all(|s| *s == 0.125));
    }

    #[test]
    fn test_missing_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let args = CliArgs::parse_from([
            "binaural",
            "render",
            dir.path().join("nope.wav").to_str().unwrap(),
            dir.path().join("out.wav").to_str().unwrap(),
        ]);
        let err = crate::commands::dispatch_command(&args).unwrap_err();
        let err = err.downcast::<binaural::Error>().unwrap();
        assert!(err.is_file_not_found());
    }
}
