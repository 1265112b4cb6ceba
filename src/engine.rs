//! Engine entry points
//! The three operations the engine exposes (scan, file-record fetch and
//! data-run recovery) plus the orchestration that turns an opaque scan
//! candidate into a recovered file. Each call opens and closes its own
//! volume and output handles; nothing is shared between invocations.

use std::fs;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::Path;

use log::{debug, warn};

use crate::candidates::{merge_candidates, DeletedCandidate, RecoveryHandle};
use crate::errors::{EngineError, EngineResult};
use crate::mft_parser::{parse_file_record, FileRecordDetails};
use crate::recovery::{copy_recycle_data, stream_data_runs, write_resident};
use crate::recycle_bin::scan_recycle_bin;
use crate::run_list::RunSegment;
use crate::usn_scanner::scan_usn;
use crate::volume::{query_geometry, DriveLetter, Volume};

pub const FSCTL_GET_NTFS_FILE_RECORD: u32 = 0x0009_0068;

/// Output header of FSCTL_GET_NTFS_FILE_RECORD: returned file reference
/// (8 bytes) followed by the record length (4 bytes), then the record.
const FILE_RECORD_OUTPUT_HEADER: usize = 12;

/// Buffer for one file record plus its attributes.
const FILE_RECORD_BUFFER_SIZE: usize = 1024 * 1024;

const RECORD_INDEX_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// Enumerate deleted-file evidence on a volume: the USN journal and the
/// recycle bin, merged into one deduplicated, newest-first candidate list.
/// A journal failure is fatal; recycle-bin problems degrade to partial
/// results.
pub fn scan(drive: DriveLetter) -> EngineResult<Vec<DeletedCandidate>> {
    let volume = Volume::open_drive(drive)?;
    let usn = scan_usn(&volume, drive)?;
    drop(volume);

    let recycle = scan_recycle_bin(drive);
    debug!(
        "[Scan] drive {}: {} USN + {} recycle-bin candidates before merge",
        drive,
        usn.len(),
        recycle.len()
    );

    Ok(merge_candidates(usn, recycle))
}

/// Fetch and parse the MFT record for a file reference, annotated with the
/// volume's cluster geometry.
pub fn get_file_record(drive: DriveLetter, file_ref: u64) -> EngineResult<FileRecordDetails> {
    let volume = Volume::open_drive(drive)?;
    let geometry = query_geometry(drive)?;

    let input = file_ref.to_le_bytes();
    let mut output = vec![0u8; FILE_RECORD_BUFFER_SIZE];
    let returned = volume.ioctl(FSCTL_GET_NTFS_FILE_RECORD, &input, &mut output)? as usize;

    if returned < FILE_RECORD_OUTPUT_HEADER {
        return Err(EngineError::NotAFileRecord);
    }

    let returned_ref = u64::from_le_bytes(output[0..8].try_into().unwrap_or_default());
    let record_length =
        u32::from_le_bytes(output[8..12].try_into().unwrap_or_default()) as usize;
    if record_length == 0 || FILE_RECORD_OUTPUT_HEADER + record_length > returned {
        return Err(EngineError::NotAFileRecord);
    }

    // For a freed slot the kernel substitutes the nearest in-use record.
    if returned_ref & RECORD_INDEX_MASK != file_ref & RECORD_INDEX_MASK {
        warn!(
            "[Record] requested record {} but the kernel returned {}; the slot may be reused",
            file_ref & RECORD_INDEX_MASK,
            returned_ref & RECORD_INDEX_MASK
        );
    }

    let record =
        &output[FILE_RECORD_OUTPUT_HEADER..FILE_RECORD_OUTPUT_HEADER + record_length];
    let mut details = parse_file_record(record)?;
    details.bytes_per_sector = geometry.bytes_per_sector;
    details.sectors_per_cluster = geometry.sectors_per_cluster;
    details.cluster_size = geometry.cluster_size();
    Ok(details)
}

fn validate_output_path(output_path: &Path) -> EngineResult<()> {
    if output_path.as_os_str().is_empty() {
        return Err(EngineError::InvalidArgument(
            "output path is required".to_string(),
        ));
    }
    Ok(())
}

/// Reconstruct a file from its run list by reading raw clusters off the
/// volume. The output is created with truncate-on-collision semantics and
/// holds exactly `file_size` bytes on success.
pub fn recover_data_runs(
    drive: DriveLetter,
    runs: &[RunSegment],
    cluster_size: u64,
    file_size: u64,
    output_path: &Path,
) -> EngineResult<u64> {
    validate_output_path(output_path)?;
    if cluster_size == 0 {
        return Err(EngineError::InvalidArgument(
            "cluster size must be positive".to_string(),
        ));
    }
    if file_size == 0 {
        return Err(EngineError::InvalidArgument(
            "target file size is zero".to_string(),
        ));
    }

    let mut volume = Volume::open_drive(drive)?;
    let out = fs::File::create(output_path).map_err(EngineError::WriteFailed)?;
    let mut writer = BufWriter::new(out);

    let written = stream_runs_from_volume(&mut volume, &mut writer, runs, cluster_size, file_size)?;
    writer.flush().map_err(EngineError::WriteFailed)?;
    Ok(written)
}

fn stream_runs_from_volume<W: std::io::Write>(
    volume: &mut Volume,
    out: &mut W,
    runs: &[RunSegment],
    cluster_size: u64,
    file_size: u64,
) -> EngineResult<u64> {
    // Volume exposes positioned reads; adapt it to the generic streamer.
    struct VolumeReader<'a> {
        volume: &'a mut Volume,
        position: u64,
    }

    impl Read for VolumeReader<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let read = self
                .volume
                .read_at(self.position, buf)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            self.position += read as u64;
            Ok(read)
        }
    }

    impl Seek for VolumeReader<'_> {
        fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
            match pos {
                std::io::SeekFrom::Start(offset) => {
                    self.position = offset;
                    Ok(offset)
                }
                _ => Err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "volume reader only seeks from start",
                )),
            }
        }
    }

    let mut reader = VolumeReader { volume, position: 0 };
    stream_data_runs(&mut reader, out, runs, cluster_size, file_size)
}

/// What to recover and where the bytes come from.
#[derive(Debug, Clone)]
pub enum RecoverySource {
    /// Resolve the MFT record and read its `$DATA` content off the volume.
    FileRecord { drive: DriveLetter, file_ref: u64 },
    /// Copy a recycle-bin `$R` file, truncating to the `$I`-recorded size.
    RecycleBin {
        data_path: std::path::PathBuf,
        recorded_size: Option<u64>,
    },
}

impl RecoverySource {
    /// Derive the recovery source from a scan candidate.
    pub fn from_candidate(candidate: &DeletedCandidate) -> EngineResult<Self> {
        match &candidate.recovery {
            RecoveryHandle::Usn { drive, file_ref } => Ok(RecoverySource::FileRecord {
                drive: *drive,
                file_ref: *file_ref,
            }),
            RecoveryHandle::RecycleBin { data_path: Some(path) } => {
                Ok(RecoverySource::RecycleBin {
                    data_path: path.clone(),
                    recorded_size: Some(candidate.size),
                })
            }
            RecoveryHandle::RecycleBin { data_path: None } => Err(EngineError::SourceMissing(
                std::path::PathBuf::from(&candidate.full_path),
            )),
        }
    }
}

/// Recover one file to `output_path`. Returns the bytes written.
///
/// The MFT path fetches the record, selects the recovery `$DATA` attribute
/// (unnamed first, any-named as fallback), then either dumps the resident
/// value or streams the run list. Errors are fatal for the call; all
/// handles close on every exit path.
pub fn recover(source: &RecoverySource, output_path: &Path) -> EngineResult<u64> {
    validate_output_path(output_path)?;

    match source {
        RecoverySource::RecycleBin { data_path, recorded_size } => {
            copy_recycle_data(data_path, output_path, *recorded_size)
        }
        RecoverySource::FileRecord { drive, file_ref } => {
            let details = get_file_record(*drive, *file_ref)?;
            let attribute = details
                .recovery_data_attribute()
                .ok_or(EngineError::NoDataAttribute)?;

            if attribute.non_resident {
                recover_data_runs(
                    *drive,
                    &attribute.runs,
                    details.cluster_size,
                    attribute.data_size,
                    output_path,
                )
            } else {
                let out = fs::File::create(output_path).map_err(EngineError::WriteFailed)?;
                let mut writer = BufWriter::new(out);
                let written =
                    write_resident(&mut writer, &attribute.resident_data, attribute.data_size)?;
                writer.flush().map_err(EngineError::WriteFailed)?;
                Ok(written)
            }
        }
    }
}
