//! Single-shot background tasks
//! Each operation runs to completion on its own thread and signals exactly
//! one completion callback, success with a value or failure with an error,
//! never both, never twice. Concurrent invocations are independent: every
//! task opens its own volume handle and shares no state.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crate::candidates::DeletedCandidate;
use crate::engine::{self, RecoverySource};
use crate::errors::EngineResult;
use crate::mft_parser::FileRecordDetails;
use crate::run_list::RunSegment;
use crate::volume::DriveLetter;

/// Spawn a scan of one drive. The callback fires once, on the worker
/// thread, when the scan finishes or fails.
pub fn spawn_scan<F>(drive: DriveLetter, on_complete: F) -> JoinHandle<()>
where
    F: FnOnce(EngineResult<Vec<DeletedCandidate>>) + Send + 'static,
{
    thread::spawn(move || on_complete(engine::scan(drive)))
}

/// Spawn a file-record fetch. `file_ref` arrives as the decimal string used
/// at the boundary; an unparseable value completes with `InvalidArgument`.
pub fn spawn_get_file_record<F>(drive: DriveLetter, file_ref: String, on_complete: F) -> JoinHandle<()>
where
    F: FnOnce(EngineResult<FileRecordDetails>) + Send + 'static,
{
    thread::spawn(move || {
        let result = crate::codec::parse_u64_str(&file_ref)
            .and_then(|file_ref| engine::get_file_record(drive, file_ref));
        on_complete(result)
    })
}

/// Spawn a data-run recovery to `output_path`.
pub fn spawn_recover_data_runs<F>(
    drive: DriveLetter,
    runs: Vec<RunSegment>,
    cluster_size: u64,
    file_size: u64,
    output_path: PathBuf,
    on_complete: F,
) -> JoinHandle<()>
where
    F: FnOnce(EngineResult<u64>) + Send + 'static,
{
    thread::spawn(move || {
        on_complete(engine::recover_data_runs(
            drive,
            &runs,
            cluster_size,
            file_size,
            &output_path,
        ))
    })
}

/// Spawn a full recovery of one candidate's source.
pub fn spawn_recover<F>(source: RecoverySource, output_path: PathBuf, on_complete: F) -> JoinHandle<()>
where
    F: FnOnce(EngineResult<u64>) + Send + 'static,
{
    thread::spawn(move || on_complete(engine::recover(&source, &output_path)))
}
