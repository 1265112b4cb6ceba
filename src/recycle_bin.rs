//! Recycle-bin inspector
//! Walks `X:\$Recycle.Bin\<SID>\$I*` metadata files, decodes the 24-byte
//! header plus UTF-16LE original path, and pairs each with its `$R` data
//! sibling. Malformed entries are logged and skipped; the scan always
//! completes with whatever parsed.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use walkdir::WalkDir;

use crate::candidates::{
    CandidateSource, DeletedCandidate, RecoveryHandle, CONFIDENCE_RECYCLE_METADATA_ONLY,
    CONFIDENCE_RECYCLE_PAIRED,
};
use crate::codec::{filetime_to_unix_ms, utf16le_to_string};
use crate::volume::DriveLetter;

/// Decoded `$I` metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecycleIndex {
    pub version: u8,
    pub size: u64,
    pub deleted_time_ms: i64,
    pub original_path: String,
}

const INDEX_HEADER_LEN: usize = 24;

/// Extract the original path from the bytes following the header.
///
/// Both `$I` versions carry a NUL-padded UTF-16LE path at offset 24. Windows
/// 10 version-2 files additionally prefix it with a u32 character count at
/// offset 24 (path at 28); that prefix is honored when it is plausible and
/// fits the file, otherwise the bytes at 24 are taken as the path itself.
fn extract_original_path(data: &[u8], version: u8) -> String {
    if version == 2 && data.len() >= INDEX_HEADER_LEN + 4 {
        let declared = u32::from_le_bytes(
            data[INDEX_HEADER_LEN..INDEX_HEADER_LEN + 4].try_into().unwrap_or([0; 4]),
        ) as usize;
        let end = INDEX_HEADER_LEN + 4 + declared * 2;
        if (1..=0x7FFF).contains(&declared) && end <= data.len() {
            let text = utf16le_to_string(&data[INDEX_HEADER_LEN + 4..end]);
            return text.trim_end_matches('\0').to_string();
        }
    }

    utf16le_to_string(&data[INDEX_HEADER_LEN..])
        .split('\0')
        .next()
        .unwrap_or("")
        .to_string()
}

/// Parse one `$I` file. Returns None (caller skips silently) when the
/// version byte is unknown or the file is shorter than its header.
pub fn parse_index_bytes(data: &[u8]) -> Option<RecycleIndex> {
    if data.len() < INDEX_HEADER_LEN {
        return None;
    }

    let version = data[0];
    if version != 1 && version != 2 {
        return None;
    }

    let size = u64::from_le_bytes(data[8..16].try_into().ok()?);
    let filetime = i64::from_le_bytes(data[16..24].try_into().ok()?);

    Some(RecycleIndex {
        version,
        size,
        deleted_time_ms: filetime_to_unix_ms(filetime),
        original_path: extract_original_path(data, version),
    })
}

/// Split an original path into (parent, file name) on the last backslash.
fn split_original_path(path: &str) -> (String, String) {
    match path.rsplit_once('\\') {
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => (String::new(), path.to_string()),
    }
}

/// Build a candidate for one parsed `$I`, pairing the `$R` data file.
fn candidate_from_index(
    drive: DriveLetter,
    index: RecycleIndex,
    index_path: &Path,
) -> Option<DeletedCandidate> {
    let prefix = drive.path_prefix();
    // Metadata written for another volume occasionally survives a drive
    // re-letter; those entries cannot be attributed to this scan.
    if !index.original_path.to_uppercase().starts_with(&prefix.to_uppercase()) {
        debug!(
            "[RecycleBin] {} points at {}, not on {}, skipped",
            index_path.display(),
            index.original_path,
            prefix
        );
        return None;
    }
    if index.original_path.contains(r"\..\") || index.original_path.ends_with(r"\..") {
        warn!("[RecycleBin] {} carries a relative path, skipped", index_path.display());
        return None;
    }

    let file_name = index_path.file_name()?.to_string_lossy().into_owned();
    let data_name = format!("$R{}", file_name.strip_prefix("$I")?);
    let data_path = index_path.with_file_name(data_name);

    let (paired, confidence) = if data_path.is_file() {
        (Some(data_path), CONFIDENCE_RECYCLE_PAIRED)
    } else {
        (None, CONFIDENCE_RECYCLE_METADATA_ONLY)
    };

    let (parent_path, name) = split_original_path(&index.original_path);
    let deleted_time_ms =
        (index.deleted_time_ms > 0).then_some(index.deleted_time_ms);

    Some(DeletedCandidate {
        source: CandidateSource::RecycleBin,
        name,
        parent_path,
        full_path: index.original_path,
        size: index.size,
        deleted_time_ms,
        is_directory: false,
        confidence,
        recovery: RecoveryHandle::RecycleBin { data_path: paired },
    })
}

/// Scan `X:\$Recycle.Bin` for this drive: one subdirectory per user SID,
/// `$I` metadata files inside each. Per-entry failures are logged and
/// skipped; an absent or unreadable bin yields an empty list.
pub fn scan_recycle_bin(drive: DriveLetter) -> Vec<DeletedCandidate> {
    let bin_root = PathBuf::from(format!(r"{}$Recycle.Bin", drive.path_prefix()));
    if !bin_root.is_dir() {
        debug!("[RecycleBin] no {} on this volume", bin_root.display());
        return Vec::new();
    }

    let mut candidates = Vec::new();

    for entry in WalkDir::new(&bin_root).min_depth(2).max_depth(2) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("[RecycleBin] walk error under {}: {}", bin_root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file()
            || !entry.file_name().to_string_lossy().starts_with("$I")
        {
            continue;
        }

        let index_path = entry.path();
        let data = match fs::read(index_path) {
            Ok(data) => data,
            Err(e) => {
                warn!("[RecycleBin] cannot read {}: {}", index_path.display(), e);
                continue;
            }
        };

        let Some(index) = parse_index_bytes(&data) else {
            warn!("[RecycleBin] {} is not a usable $I file", index_path.display());
            continue;
        };

        if let Some(candidate) = candidate_from_index(drive, index, index_path) {
            candidates.push(candidate);
        }
    }

    debug!(
        "[RecycleBin] drive {}: {} candidates",
        drive,
        candidates.len()
    );
    candidates
}
