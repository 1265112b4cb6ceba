//! Engine error taxonomy
//! Every fallible operation in the crate reports one of these kinds.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("volume {drive}: unavailable ({reason}). Run as Administrator.")]
    VolumeUnavailable { drive: char, reason: String },

    #[error("device control {code:#010X} failed with OS error {os_error}")]
    IoctlFailed { code: u32, os_error: u32 },

    #[error("buffer does not contain a FILE record")]
    NotAFileRecord,

    #[error("file record has no $DATA attribute")]
    NoDataAttribute,

    #[error("unexpected end of volume data while reading run")]
    UnexpectedVolumeEnd,

    #[error("recycle-bin data file missing: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("write to output failed: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("volume read failed: {0}")]
    ReadFailed(#[source] io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// True when the error is the enumeration end-of-data signal
    /// (`ERROR_HANDLE_EOF`), which terminates the USN loop without failing it.
    pub fn is_enum_eof(&self) -> bool {
        matches!(
            self,
            EngineError::IoctlFailed {
                os_error: crate::volume::ERROR_HANDLE_EOF,
                ..
            }
        )
    }
}
