#[macro_use]
mod logging;

pub mod capture;
pub mod catalog;
pub mod config;
pub mod controls;
pub mod convolution;
pub mod devices;
mod error;
pub mod events;
mod callback_thread;
pub mod level_meter;
pub mod media;
pub mod playback;
pub mod ramp;
pub mod registry;
pub mod renderer;
#[doc(hidden)]
pub mod test_support;

pub use capture::{CaptureSession, CaptureState};
pub use catalog::{AngularGrid, HrirSet, HrtfCatalog, Subject};
pub use config::{OverflowPolicy, SessionOptions, SR};
pub use controls::SourceControls;
pub use devices::{AudioBackend, CpalBackend, DeviceInfo, VirtualBackend};
pub use error::{Error, Result};
pub use events::{RunId, SessionEvent};
pub use level_meter::LevelMeter;
pub use playback::{PlaybackSession, PlaybackState};
pub use ramp::DirectionRamp;
pub use registry::{Source, SourceId, SourceKind, SourceRegistry};
pub use renderer::BinauralRenderer;
