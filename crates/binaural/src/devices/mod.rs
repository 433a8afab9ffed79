//! The boundary with audio hardware.
//!
//! Sessions never talk to a driver directly.  They ask an [AudioBackend] for streams, hand it callbacks, and get back
//! a [DeviceStream] whose lifetime is the stream's lifetime: dropping it guarantees that no callback is running and
//! none will run again.  [CpalBackend] is the real thing; [VirtualBackend] is driven by hand, for tests and offline
//! rendering.
//!
//! Capture is push-based: the driver calls `on_block` with whatever it captured.  Output is pull-based: the driver
//! calls `fill` with a buffer of interleaved stereo which must be filled completely, and `fill` reports how many frames
//! were real audio as opposed to trailing silence.
mod cpal_backend;
mod virtual_backend;

pub use cpal_backend::*;
pub use virtual_backend::*;

/// Called on the driver's thread with a block of interleaved capture samples.
pub type CaptureCallback = Box<dyn FnMut(&[i16]) + Send + 'static>;

/// Called on the driver's thread with an interleaved stereo buffer.  Returns the frames of real audio written.
pub type FillCallback = Box<dyn FnMut(&mut [f32]) -> usize + Send + 'static>;

/// Called on a driver thread when a running stream fails.
pub type ErrorCallback = Box<dyn FnMut(String) + Send + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("There is no device with index {0}")]
    NoSuchDevice(usize),

    #[error("No default output device is available")]
    NoDefaultOutput,

    #[error("The device does not support {0}")]
    FormatNotSupported(StreamFormat),

    #[error("Failed to enumerate devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("Failed to get a device name: {0}")]
    DeviceName(#[from] cpal::DeviceNameError),

    #[error("Failed to query device configs: {0}")]
    QueryConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("Failed to build stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Failed to start stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Failed to pause stream: {0}")]
    PauseStream(#[from] cpal::PauseStreamError),

    #[error("{0}")]
    Virtual(&'static str),
}

/// What a session wants from a stream.  Capture streams are always 16-bit integer, output streams always `f32`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, derive_more::Display)]
#[display(fmt = "{} channels at {} Hz", channels, sample_rate)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub const CAPTURE: StreamFormat = StreamFormat {
        sample_rate: crate::config::SR,
        channels: 1,
    };

    pub const fn stereo(sample_rate: u32) -> Self {
        StreamFormat {
            sample_rate,
            channels: 2,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub channels: u16,
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({} channels)", self.index, self.name, self.channels)
    }
}

/// An open stream.  Dropping it closes the stream and waits for any callback in flight.
pub trait DeviceStream {
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Stop calling back without closing.  `start` resumes.
    fn pause(&mut self) -> Result<(), DeviceError>;
}

pub trait AudioBackend {
    fn input_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    fn output_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// Open the input device at `device_index` in [AudioBackend::input_devices] for mono capture.
    ///
    /// The stream is opened paused.
    fn open_capture(
        &self,
        device_index: usize,
        format: StreamFormat,
        on_block: CaptureCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn DeviceStream>, DeviceError>;

    /// Open the default output device for stereo.  Nothing resamples: if the device cannot run at the requested rate,
    /// this fails.
    ///
    /// The stream is opened paused.
    fn open_output(
        &self,
        format: StreamFormat,
        fill: FillCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn DeviceStream>, DeviceError>;
}
