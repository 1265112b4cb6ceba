//! Run-list-driven raw recovery
//! Translates a run list plus logical size plus cluster size into absolute
//! reads against the volume device and writes the reconstructed payload.
//! Sparse runs become zeros, the output is truncated to the exact logical
//! size, and the tail beyond run coverage is zero-padded.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::errors::{EngineError, EngineResult};
use crate::run_list::RunSegment;

/// Clusters moved per read while streaming a run.
const CHUNK_CLUSTERS: u64 = 16;

/// Write `count` zero bytes to the output.
fn write_zeros<W: Write>(out: &mut W, count: u64) -> EngineResult<()> {
    let zeros = [0u8; 8192];
    let mut remaining = count;
    while remaining > 0 {
        let chunk = remaining.min(zeros.len() as u64) as usize;
        out.write_all(&zeros[..chunk]).map_err(EngineError::WriteFailed)?;
        remaining -= chunk as u64;
    }
    Ok(())
}

/// Stream one run's worth of real clusters from the volume to the output.
/// A read that returns zero bytes before the run is satisfied means the
/// device ended mid-run, which is fatal.
fn copy_run<R: Read + Seek, W: Write>(
    volume: &mut R,
    out: &mut W,
    absolute_offset: u64,
    byte_count: u64,
    cluster_size: u64,
) -> EngineResult<()> {
    volume
        .seek(SeekFrom::Start(absolute_offset))
        .map_err(EngineError::ReadFailed)?;

    let mut buffer = vec![0u8; (cluster_size * CHUNK_CLUSTERS) as usize];
    let mut remaining = byte_count;
    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;
        let read = volume.read(&mut buffer[..want]).map_err(EngineError::ReadFailed)?;
        if read == 0 {
            return Err(EngineError::UnexpectedVolumeEnd);
        }
        out.write_all(&buffer[..read]).map_err(EngineError::WriteFailed)?;
        remaining -= read as u64;
    }
    Ok(())
}

/// Reconstruct a non-resident payload by walking its run list.
///
/// Exactly `file_size` bytes are produced: each run contributes
/// `min(length * cluster_size, remaining)` bytes: zeros for sparse or
/// invalid-LCN runs, device reads otherwise. Any shortfall after the
/// last run is zero-padded. Returns the byte count written.
pub fn stream_data_runs<R: Read + Seek, W: Write>(
    volume: &mut R,
    out: &mut W,
    runs: &[RunSegment],
    cluster_size: u64,
    file_size: u64,
) -> EngineResult<u64> {
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

    let mut remaining = file_size;
    for run in runs {
        if remaining == 0 {
            break;
        }
        if run.length <= 0 {
            continue;
        }

        let run_bytes = (run.length as u64).saturating_mul(cluster_size);
        let bytes_this_run = run_bytes.min(remaining);

        if run.sparse || run.lcn <= 0 {
            write_zeros(out, bytes_this_run)?;
        } else {
            let absolute = run.lcn as u64 * cluster_size;
            copy_run(volume, out, absolute, bytes_this_run, cluster_size)?;
        }

        remaining -= bytes_this_run;
    }

    // Runs can cover less than the logical size (initialized-size semantics);
    // the tail is defined to read as zeros.
    if remaining > 0 {
        debug!("[Recover] zero-padding {} tail bytes beyond run coverage", remaining);
        write_zeros(out, remaining)?;
    }

    Ok(file_size)
}

/// Dump a resident attribute value, truncated to the logical size.
pub fn write_resident<W: Write>(
    out: &mut W,
    resident_data: &[u8],
    data_size: u64,
) -> EngineResult<u64> {
    let take = (resident_data.len() as u64).min(data_size) as usize;
    out.write_all(&resident_data[..take]).map_err(EngineError::WriteFailed)?;
    Ok(take as u64)
}

/// Recycle-bin recovery: byte-copy the `$R` file, truncating to the size
/// the `$I` metadata recorded when the source grew past it.
pub fn copy_recycle_data(
    data_path: &Path,
    output_path: &Path,
    recorded_size: Option<u64>,
) -> EngineResult<u64> {
    if !data_path.is_file() {
        return Err(EngineError::SourceMissing(data_path.to_path_buf()));
    }

    let source = fs::File::open(data_path).map_err(EngineError::ReadFailed)?;
    let mut out = fs::File::create(output_path).map_err(EngineError::WriteFailed)?;

    let written = match recorded_size {
        Some(limit) => {
            let mut limited = source.take(limit);
            std::io::copy(&mut limited, &mut out).map_err(EngineError::WriteFailed)?
        }
        None => {
            let mut source = source;
            std::io::copy(&mut source, &mut out).map_err(EngineError::WriteFailed)?
        }
    };

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run(lcn: i64, length: i64, sparse: bool) -> RunSegment {
        RunSegment { vcn: 0, lcn, length, sparse }
    }

    #[test]
    fn resident_dump_truncates_to_data_size() {
        let mut out = Vec::new();
        let written = write_resident(&mut out, b"Hello", 5).unwrap();
        assert_eq!(written, 5);
        assert_eq!(out, b"Hello");

        let mut out = Vec::new();
        write_resident(&mut out, b"HelloWorld", 5).unwrap();
        assert_eq!(out, b"Hello");

        // Declared size beyond the resident bytes writes what exists.
        let mut out = Vec::new();
        let written = write_resident(&mut out, b"Hi", 100).unwrap();
        assert_eq!(written, 2);
    }

    #[test]
    fn non_resident_with_sparse_tail() {
        let _ = env_logger::builder().is_test(true).try_init();
        let cluster_size = 4096u64;
        // Volume image: content lives at absolute offset 100 * 4096.
        let mut image = vec![0u8; 110 * cluster_size as usize];
        for (i, byte) in image[100 * 4096..102 * 4096].iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        let mut volume = Cursor::new(image);

        let runs = vec![run(100, 2, false), run(0, 1, true)];
        let mut out = Vec::new();
        let written =
            stream_data_runs(&mut volume, &mut out, &runs, cluster_size, 10_000).unwrap();

        assert_eq!(written, 10_000);
        assert_eq!(out.len(), 10_000);
        for (i, byte) in out[..8192].iter().enumerate() {
            assert_eq!(*byte, (i % 251) as u8);
        }
        assert!(out[8192..].iter().all(|b| *b == 0));
    }

    #[test]
    fn runs_short_of_logical_size_zero_pad() {
        let cluster_size = 512u64;
        let mut volume = Cursor::new(vec![0xAAu8; 4 * 512]);

        // One real run of 2 clusters, logical size demands 3.
        let runs = vec![run(1, 2, false)];
        let mut out = Vec::new();
        stream_data_runs(&mut volume, &mut out, &runs, cluster_size, 3 * 512).unwrap();

        assert_eq!(out.len(), 3 * 512);
        assert!(out[..1024].iter().all(|b| *b == 0xAA));
        assert!(out[1024..].iter().all(|b| *b == 0));
    }

    #[test]
    fn truncates_to_exact_logical_size() {
        let cluster_size = 512u64;
        let mut volume = Cursor::new(vec![0x55u8; 8 * 512]);

        let runs = vec![run(0, 4, false)]; // lcn 0 is invalid -> zeros
        let mut out = Vec::new();
        stream_data_runs(&mut volume, &mut out, &runs, cluster_size, 700).unwrap();
        assert_eq!(out.len(), 700);
        assert!(out.iter().all(|b| *b == 0));
    }

    #[test]
    fn short_read_mid_run_is_fatal() {
        let cluster_size = 4096u64;
        // Device ends one cluster into a two-cluster run.
        let mut volume = Cursor::new(vec![1u8; 3 * 4096]);

        let runs = vec![run(2, 2, false)];
        let mut out = Vec::new();
        let err = stream_data_runs(&mut volume, &mut out, &runs, cluster_size, 8192)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnexpectedVolumeEnd));
    }

    #[test]
    fn invalid_sizes_rejected() {
        let mut volume = Cursor::new(Vec::new());
        let mut out = Vec::new();
        assert!(matches!(
            stream_data_runs(&mut volume, &mut out, &[], 0, 10),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            stream_data_runs(&mut volume, &mut out, &[], 4096, 0),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn recycle_copy_truncates_to_recorded_size() {
        let dir = std::env::temp_dir();
        let source = dir.join("ntfs_undelete_test_r_source.bin");
        let dest = dir.join("ntfs_undelete_test_r_dest.bin");
        fs::write(&source, vec![7u8; 1000]).unwrap();

        let written = copy_recycle_data(&source, &dest, Some(600)).unwrap();
        assert_eq!(written, 600);
        assert_eq!(fs::read(&dest).unwrap().len(), 600);

        let missing = dir.join("ntfs_undelete_test_missing.bin");
        let err = copy_recycle_data(&missing, &dest, None).unwrap_err();
        assert!(matches!(err, EngineError::SourceMissing(_)));

        let _ = fs::remove_file(&source);
        let _ = fs::remove_file(&dest);
    }
}
