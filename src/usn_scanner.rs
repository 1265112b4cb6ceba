//! USN change-journal scanner
//! Drives FSCTL_ENUM_USN_DATA over a raw volume handle, builds the
//! file-identifier table incrementally and emits a candidate for every
//! record carrying the delete reason, with the full path reconstructed by
//! climbing parent references through the same table.

use std::collections::HashMap;

use log::{debug, warn};

use crate::candidates::{
    CandidateSource, DeletedCandidate, RecoveryHandle, CONFIDENCE_USN,
};
use crate::codec::{filetime_to_unix_ms, utf16le_to_string};
use crate::errors::EngineResult;
use crate::volume::{DriveLetter, Volume};

pub const FSCTL_ENUM_USN_DATA: u32 = 0x0009_00B3;

pub const USN_REASON_FILE_DELETE: u32 = 0x0000_0200;
const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;

/// Enumeration buffer: the kernel packs as many records as fit per call.
const ENUM_BUFFER_SIZE: usize = 1024 * 1024;

/// Hard bound on parent-chain hops during path resolution.
const MAX_PATH_DEPTH: usize = 1024;

/// Minimum bytes of a USN_RECORD_V2 before the name field.
const USN_RECORD_HEADER_LEN: usize = 60;

/// One decoded journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsnRecord {
    pub file_ref: u64,
    pub parent_ref: u64,
    pub name: String,
    pub is_directory: bool,
    pub reason: u32,
    pub timestamp_ms: i64,
}

/// Identifier-table row. Later journal events overwrite earlier ones, so the
/// row always reflects the most recent name a reference carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub parent_ref: u64,
    pub name: String,
    pub is_directory: bool,
}

pub type FileTable = HashMap<u64, FileEntry>;

/// Decode one FSCTL_ENUM_USN_DATA response: an 8-byte continuation value
/// followed by packed USN_RECORD_V2 structures. Records are parsed strictly
/// by their RecordLength; a zero or overrunning length ends the batch.
pub fn parse_enum_output(buffer: &[u8]) -> Option<(u64, Vec<UsnRecord>)> {
    if buffer.len() < 8 {
        return None;
    }

    let next_start = u64::from_le_bytes(buffer[0..8].try_into().ok()?);
    let mut records = Vec::new();
    let mut offset = 8usize;

    while offset + USN_RECORD_HEADER_LEN <= buffer.len() {
        let record_length = u32::from_le_bytes(
            buffer[offset..offset + 4].try_into().ok()?,
        ) as usize;
        if record_length == 0 || offset + record_length > buffer.len() {
            break;
        }

        let rec = &buffer[offset..offset + record_length];
        let file_ref = u64::from_le_bytes(rec[8..16].try_into().ok()?);
        let parent_ref = u64::from_le_bytes(rec[16..24].try_into().ok()?);
        let timestamp = i64::from_le_bytes(rec[32..40].try_into().ok()?);
        let reason = u32::from_le_bytes(rec[40..44].try_into().ok()?);
        let file_attributes = u32::from_le_bytes(rec[52..56].try_into().ok()?);
        let name_length = u16::from_le_bytes(rec[56..58].try_into().ok()?) as usize;
        let name_offset = u16::from_le_bytes(rec[58..60].try_into().ok()?) as usize;

        if name_offset + name_length > record_length {
            // One malformed record: skip it, keep paging.
            warn!(
                "[USN] record at offset {} has name beyond its length, skipped",
                offset
            );
            offset += record_length;
            continue;
        }

        records.push(UsnRecord {
            file_ref,
            parent_ref,
            name: utf16le_to_string(&rec[name_offset..name_offset + name_length]),
            is_directory: file_attributes & FILE_ATTRIBUTE_DIRECTORY != 0,
            reason,
            timestamp_ms: filetime_to_unix_ms(timestamp),
        });

        offset += record_length;
    }

    Some((next_start, records))
}

/// Build the 24-byte MFT_ENUM_DATA_V0 input for the next enumeration step.
fn enum_input(start_file_ref: u64) -> [u8; 24] {
    let mut input = [0u8; 24];
    input[0..8].copy_from_slice(&start_file_ref.to_le_bytes());
    // LowUsn = 0 is already in place; HighUsn = i64::MAX.
    input[16..24].copy_from_slice(&i64::MAX.to_le_bytes());
    input
}

/// Resolve the full path of a deletion event by climbing parent references.
/// Stops at the root reference (0), at a missing table row, at a
/// self-parenting entry, or after [`MAX_PATH_DEPTH`] hops. Empty and dot
/// segments are skipped so emitted paths never contain `..`.
pub fn resolve_path(
    drive: DriveLetter,
    name: &str,
    parent_ref: u64,
    table: &FileTable,
) -> (String, String) {
    let mut segments: Vec<&str> = Vec::new();
    let mut current = parent_ref;

    for _ in 0..MAX_PATH_DEPTH {
        if current == 0 {
            break;
        }
        let Some(entry) = table.get(&current) else {
            break;
        };
        // Self-parenting marks the top of the chain (the volume root entry,
        // or corrupt journal data); it contributes no segment.
        if current == entry.parent_ref {
            break;
        }
        if !entry.name.is_empty() && entry.name != "." && entry.name != ".." {
            segments.push(&entry.name);
        }
        current = entry.parent_ref;
    }

    let mut parent_path = drive.path_prefix();
    for segment in segments.iter().rev() {
        if !parent_path.ends_with('\\') {
            parent_path.push('\\');
        }
        parent_path.push_str(segment);
    }

    let mut full_path = parent_path.clone();
    if !name.is_empty() {
        if !full_path.ends_with('\\') {
            full_path.push('\\');
        }
        full_path.push_str(name);
    }

    (parent_path, full_path)
}

/// Turn buffered deletion events into candidates using the completed table.
fn emit_candidates(
    drive: DriveLetter,
    deletions: Vec<UsnRecord>,
    table: &FileTable,
) -> Vec<DeletedCandidate> {
    let mut out = Vec::with_capacity(deletions.len());

    for event in deletions {
        if event.name.is_empty() || event.name == "." || event.name == ".." {
            warn!("[USN] deletion of ref {} has no usable name, skipped", event.file_ref);
            continue;
        }

        let (parent_path, full_path) = resolve_path(drive, &event.name, event.parent_ref, table);

        out.push(DeletedCandidate {
            source: CandidateSource::Usn,
            name: event.name,
            parent_path,
            full_path,
            // The journal does not carry sizes.
            size: 0,
            deleted_time_ms: Some(event.timestamp_ms),
            is_directory: event.is_directory,
            confidence: CONFIDENCE_USN,
            recovery: RecoveryHandle::Usn { drive, file_ref: event.file_ref },
        });
    }

    out
}

/// Enumerate the volume's journal data and return every deletion candidate.
/// The identifier table only grows during the scan; deletion events never
/// remove rows, because a deleted directory may still be the parent of other
/// deletion events resolved later.
pub fn scan_usn(volume: &Volume, drive: DriveLetter) -> EngineResult<Vec<DeletedCandidate>> {
    let mut buffer = vec![0u8; ENUM_BUFFER_SIZE];
    let mut table: FileTable = HashMap::new();
    let mut deletions: Vec<UsnRecord> = Vec::new();
    let mut start_file_ref = 0u64;
    let mut batches = 0u64;

    loop {
        let input = enum_input(start_file_ref);
        let returned = match volume.ioctl(FSCTL_ENUM_USN_DATA, &input, &mut buffer) {
            Ok(n) => n as usize,
            Err(ref e) if e.is_enum_eof() => break,
            Err(e) => return Err(e),
        };

        if returned <= 8 {
            break;
        }

        let Some((next_start, records)) = parse_enum_output(&buffer[..returned]) else {
            break;
        };

        for record in records {
            table.insert(
                record.file_ref,
                FileEntry {
                    parent_ref: record.parent_ref,
                    name: record.name.clone(),
                    is_directory: record.is_directory,
                },
            );
            if record.reason & USN_REASON_FILE_DELETE != 0 {
                deletions.push(record);
            }
        }

        if next_start <= start_file_ref {
            break;
        }
        start_file_ref = next_start;
        batches += 1;
    }

    debug!(
        "[USN] drive {}: {} batches, {} identifiers, {} deletion events",
        drive,
        batches,
        table.len(),
        deletions.len()
    );

    Ok(emit_candidates(drive, deletions, &table))
}
