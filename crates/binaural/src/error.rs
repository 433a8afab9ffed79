use std::path::PathBuf;

use crate::catalog::{DatasetLoadError, GridError};
use crate::devices::DeviceError;
use crate::registry::SourceId;

#[derive(Debug, thiserror::Error, derive_more::IsVariant)]
enum ErrorPayload {
    #[error("{0}")]
    DatasetLoad(DatasetLoadError),

    #[error("Invalid angular grid: {0}")]
    Grid(GridError),

    #[error("Unable to open audio device: {0}")]
    DeviceOpen(DeviceError),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("The HRIR set has no entries")]
    EmptyDataset,

    #[error("Media error: {0}")]
    Media(symphonia::core::errors::Error),

    #[error("Only mono and stereo files can be played, but this one has {0} channels")]
    UnsupportedChannels(usize),

    #[error("No source with id {0}")]
    UnknownSource(SourceId),

    #[error("{0}")]
    InvalidState(&'static str),

    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("{payload}")]
pub struct Error {
    payload: ErrorPayload,
}

macro_rules! conv {
    ($variant: ident, $from_err: path) => {
        impl From<$from_err> for Error {
            fn from(value: $from_err) -> Error {
                Error {
                    payload: ErrorPayload::$variant(value),
                }
            }
        }
    };
}

conv!(DatasetLoad, DatasetLoadError);
conv!(Grid, GridError);
conv!(DeviceOpen, DeviceError);
conv!(Media, symphonia::core::errors::Error);
conv!(Io, std::io::Error);

impl Error {
    pub(crate) fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Error {
            payload: ErrorPayload::FileNotFound(path.into()),
        }
    }

    pub(crate) fn empty_dataset() -> Self {
        Error {
            payload: ErrorPayload::EmptyDataset,
        }
    }

    pub(crate) fn unsupported_channels(channels: usize) -> Self {
        Error {
            payload: ErrorPayload::UnsupportedChannels(channels),
        }
    }

    pub(crate) fn unknown_source(id: SourceId) -> Self {
        Error {
            payload: ErrorPayload::UnknownSource(id),
        }
    }

    pub(crate) fn invalid_state(message: &'static str) -> Self {
        Error {
            payload: ErrorPayload::InvalidState(message),
        }
    }

    /// Did a subject fail to load?
    pub fn is_dataset_load(&self) -> bool {
        self.payload.is_dataset_load()
    }

    /// Was a capture or output device unavailable?
    pub fn is_device_open(&self) -> bool {
        self.payload.is_device_open()
    }

    pub fn is_file_not_found(&self) -> bool {
        self.payload.is_file_not_found()
    }

    /// Was a renderer asked to bind an HRIR set with no entries?
    pub fn is_empty_dataset(&self) -> bool {
        self.payload.is_empty_dataset()
    }

    pub fn is_media(&self) -> bool {
        self.payload.is_media()
    }

    pub fn is_unknown_source(&self) -> bool {
        self.payload.is_unknown_source()
    }

    pub fn is_invalid_state(&self) -> bool {
        self.payload.is_invalid_state()
    }

    /// The dataset error, if this is one.
    pub fn as_dataset_load(&self) -> Option<&DatasetLoadError> {
        match &self.payload {
            ErrorPayload::DatasetLoad(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
