//! Devices through cpal.
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};

use super::*;
use crate::callback_thread::{mark_callback_thread, CallbackKind};

/// Frames converted per step when the device's format differs from what a callback wants.
const CONVERSION_FRAMES: usize = 1024;

pub struct CpalBackend {
    host: cpal::Host,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    fn input_device(&self, index: usize) -> Result<cpal::Device, DeviceError> {
        self.host
            .input_devices()?
            .nth(index)
            .ok_or(DeviceError::NoSuchDevice(index))
    }
}

struct CpalStream {
    stream: cpal::Stream,
}

impl DeviceStream for CpalStream {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.stream.play().map_err(Into::into)
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        self.stream.pause().map_err(Into::into)
    }
}

fn describe(devices: impl Iterator<Item = cpal::Device>, input: bool) -> Result<Vec<DeviceInfo>, DeviceError> {
    devices
        .enumerate()
        .map(|(index, device)| {
            let name = device.name()?;
            // A device that will not say what it defaults to is still listed; it may fail to open later.
            let config = if input {
                device.default_input_config()
            } else {
                device.default_output_config()
            };
            let channels = config.map(|c| c.channels()).unwrap_or(0);
            Ok(DeviceInfo {
                index,
                name,
                channels,
            })
        })
        .collect()
}

fn supports_rate(range: &cpal::SupportedStreamConfigRange, sample_rate: u32) -> bool {
    range.min_sample_rate().0 <= sample_rate && range.max_sample_rate().0 >= sample_rate
}

/// Find the best capture configuration at exactly the requested rate.
///
/// Scoring prefers the requested channel count, then 16-bit integer samples, then `f32`.  Anything else is converted
/// too, but only `i16`, `f32` and `u16` are handled at all.
fn find_best_input_config(
    device: &cpal::Device,
    format: StreamFormat,
) -> Result<cpal::SupportedStreamConfig, DeviceError> {
    let mut best = None;
    let mut best_score = i32::MIN;

    for supported in device.supported_input_configs()? {
        if !supports_rate(&supported, format.sample_rate) {
            continue;
        }

        let mut score = 0;
        match supported.sample_format() {
            SampleFormat::I16 => score += 100,
            SampleFormat::F32 => score += 50,
            SampleFormat::U16 => score += 10,
            _ => continue,
        }
        if supported.channels() == format.channels {
            score += 1000;
        }

        if score > best_score {
            best_score = score;
            best = Some(supported.with_sample_rate(SampleRate(format.sample_rate)));
        }
    }

    best.ok_or(DeviceError::FormatNotSupported(format))
}

/// Find the best `f32` output configuration at exactly the requested rate with at least the requested channels.
///
/// Exact channel matches win.  Extra channels are filled with silence.
fn find_best_output_config(
    device: &cpal::Device,
    format: StreamFormat,
) -> Result<cpal::SupportedStreamConfig, DeviceError> {
    let mut best = None;
    let mut best_score = i32::MIN;

    for supported in device.supported_output_configs()? {
        if supported.sample_format() != SampleFormat::F32
            || supported.channels() < format.channels
            || !supports_rate(&supported, format.sample_rate)
        {
            continue;
        }

        // Fewer surplus channels is better.
        let score = -((supported.channels() - format.channels) as i32);
        if score > best_score {
            best_score = score;
            best = Some(supported.with_sample_rate(SampleRate(format.sample_rate)));
        }
    }

    best.ok_or(DeviceError::FormatNotSupported(format))
}

fn error_forwarder(mut on_error: ErrorCallback) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        mark_callback_thread(CallbackKind::DeviceError);
        rt_error!("Device stream error: {}", err);
        on_error(err.to_string());
    }
}

/// Build a capture stream for one device sample type, downmixing to mono `i16` in fixed-size steps.
fn build_capture<T: cpal::SizedSample + Send + 'static>(
    device: &cpal::Device,
    config: &StreamConfig,
    convert: fn(T) -> i16,
    mut on_block: CaptureCallback,
    on_error: ErrorCallback,
) -> Result<cpal::Stream, DeviceError> {
    let channels = config.channels as usize;
    let mut scratch = vec![0i16; CONVERSION_FRAMES];

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            mark_callback_thread(CallbackKind::Capture);
            for chunk in data.chunks(CONVERSION_FRAMES * channels) {
                let frames = chunk.len() / channels;
                // Take the first channel.  Averaging would need a wider type per frame and buys little for speech.
                for (dest, frame) in scratch.iter_mut().zip(chunk.chunks_exact(channels)) {
                    *dest = convert(frame[0]);
                }
                on_block(&scratch[..frames]);
            }
        },
        error_forwarder(on_error),
        None,
    )?;

    Ok(stream)
}

fn f32_to_i16(x: f32) -> i16 {
    (x.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn u16_to_i16(x: u16) -> i16 {
    (x as i32 - 32768) as i16
}

impl AudioBackend for CpalBackend {
    fn input_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        describe(self.host.input_devices()?, true)
    }

    fn output_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        describe(self.host.output_devices()?, false)
    }

    fn open_capture(
        &self,
        device_index: usize,
        format: StreamFormat,
        on_block: CaptureCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn DeviceStream>, DeviceError> {
        let device = self.input_device(device_index)?;
        let supported = find_best_input_config(&device, format)?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        log::debug!(
            "Opening capture device {} with {} channels of {:?} at {} Hz",
            device_index,
            config.channels,
            sample_format,
            config.sample_rate.0
        );

        let stream = match sample_format {
            SampleFormat::I16 => build_capture::<i16>(&device, &config, |x| x, on_block, on_error)?,
            SampleFormat::F32 => build_capture::<f32>(&device, &config, f32_to_i16, on_block, on_error)?,
            SampleFormat::U16 => build_capture::<u16>(&device, &config, u16_to_i16, on_block, on_error)?,
            _ => return Err(DeviceError::FormatNotSupported(format)),
        };

        // cpal streams on some hosts start as soon as they are built.
        stream.pause()?;
        Ok(Box::new(CpalStream { stream }))
    }

    fn open_output(
        &self,
        format: StreamFormat,
        mut fill: FillCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn DeviceStream>, DeviceError> {
        let device = self
            .host
            .default_output_device()
            .ok_or(DeviceError::NoDefaultOutput)?;
        let config: StreamConfig = find_best_output_config(&device, format)?.into();
        let channels = config.channels as usize;
        let wanted_channels = format.channels as usize;

        log::debug!(
            "Opening output device with {} channels at {} Hz",
            channels,
            config.sample_rate.0
        );

        let mut scratch = vec![0.0f32; CONVERSION_FRAMES * wanted_channels];
        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mark_callback_thread(CallbackKind::Output);
                if channels == wanted_channels {
                    fill(data);
                    return;
                }

                for chunk in data.chunks_mut(CONVERSION_FRAMES * channels) {
                    let frames = chunk.len() / channels;
                    let src = &mut scratch[..frames * wanted_channels];
                    fill(src);
                    for (dest, frame) in chunk
                        .chunks_exact_mut(channels)
                        .zip(src.chunks_exact(wanted_channels))
                    {
                        dest[..wanted_channels].copy_from_slice(frame);
                        dest[wanted_channels..].fill(0.0);
                    }
                }
            },
            error_forwarder(on_error),
            None,
        )?;

        stream.pause()?;
        Ok(Box::new(CpalStream { stream }))
    }
}
