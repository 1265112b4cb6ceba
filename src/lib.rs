//! NTFS deleted-file discovery and recovery engine
//!
//! Enumerates evidence of deleted files on a mounted NTFS volume from two
//! independent sources and reconstructs file content by reading raw disk
//! clusters through the volume device:
//! - USN change-journal enumeration with full-path reconstruction
//! - Recycle-bin `$I`/`$R` metadata pairing
//! - MFT file-record parsing (attributes, resident data, run lists)
//! - Run-list-driven raw recovery with sparse handling and exact sizing
//!
//! The engine is a library with a single-shot async task surface; it never
//! writes to the source volume and requires Administrator privileges for
//! raw volume access.

pub mod candidates;
pub mod codec;
pub mod engine;
pub mod errors;
pub mod mft_parser;
pub mod recovery;
pub mod recycle_bin;
pub mod run_list;
pub mod tasks;
pub mod usn_scanner;
pub mod volume;

pub use candidates::{CandidateSource, DeletedCandidate, RecoveryHandle};
pub use engine::{get_file_record, recover, recover_data_runs, scan, RecoverySource};
pub use errors::{EngineError, EngineResult};
pub use mft_parser::{AttributeInfo, FileRecordDetails};
pub use run_list::RunSegment;
pub use volume::{DriveLetter, Volume, VolumeGeometry};
