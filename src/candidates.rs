//! Deleted-file candidates and the two-source merger
//! Candidates from the USN journal and the recycle bin are deduplicated by
//! case-insensitive full path, recycle-bin evidence winning (it carries the
//! real size and usually the data itself), then sorted newest-first.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::codec::u64_str;
use crate::volume::DriveLetter;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    #[serde(rename = "USN")]
    Usn,
    RecycleBin,
}

/// How a candidate can be brought back.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RecoveryHandle {
    /// Resolve the MFT record for `file_ref` and stream its data runs.
    #[serde(rename_all = "camelCase")]
    Usn {
        drive: DriveLetter,
        #[serde(with = "u64_str")]
        file_ref: u64,
    },
    /// Copy the paired `$R` file. `data_path` is None when the data file is
    /// already gone and only the `$I` metadata survived.
    #[serde(rename_all = "camelCase")]
    RecycleBin { data_path: Option<PathBuf> },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeletedCandidate {
    pub source: CandidateSource,
    pub name: String,
    pub parent_path: String,
    pub full_path: String,
    #[serde(with = "u64_str")]
    pub size: u64,
    pub deleted_time_ms: Option<i64>,
    pub is_directory: bool,
    /// 0..=100. USN evidence scores 25 (the journal proves deletion but not
    /// data survival); a recycle-bin pair scores 94, a lone `$I` scores 10.
    pub confidence: u8,
    pub recovery: RecoveryHandle,
}

pub const CONFIDENCE_USN: u8 = 25;
pub const CONFIDENCE_RECYCLE_PAIRED: u8 = 94;
pub const CONFIDENCE_RECYCLE_METADATA_ONLY: u8 = 10;

impl DeletedCandidate {
    /// Deletion time as a human-readable UTC string, "Unknown" when the
    /// evidence carried no timestamp.
    pub fn deleted_time_display(&self) -> String {
        self.deleted_time_ms
            .and_then(chrono::DateTime::from_timestamp_millis)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

fn newer(a: Option<i64>, b: Option<i64>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x > y,
        (Some(_), None) => true,
        _ => false,
    }
}

/// True when `candidate` should replace `existing` under the same path key.
fn replaces(candidate: &DeletedCandidate, existing: &DeletedCandidate) -> bool {
    match (candidate.source, existing.source) {
        (CandidateSource::RecycleBin, CandidateSource::Usn) => true,
        (CandidateSource::Usn, CandidateSource::RecycleBin) => false,
        // Same source: a later deletion of the same path supersedes.
        _ => newer(candidate.deleted_time_ms, existing.deleted_time_ms),
    }
}

/// Merge both evidence streams into one deduplicated list, sorted by
/// deletion time descending. Ties keep their emission order: journal order
/// first, recycle-bin order after.
pub fn merge_candidates(
    usn: Vec<DeletedCandidate>,
    recycle: Vec<DeletedCandidate>,
) -> Vec<DeletedCandidate> {
    let mut merged: Vec<DeletedCandidate> = Vec::new();
    let mut index_by_path: HashMap<String, usize> = HashMap::new();

    for candidate in usn.into_iter().chain(recycle) {
        let key = candidate.full_path.to_lowercase();
        match index_by_path.get(&key) {
            Some(&slot) => {
                if replaces(&candidate, &merged[slot]) {
                    merged[slot] = candidate;
                }
            }
            None => {
                index_by_path.insert(key, merged.len());
                merged.push(candidate);
            }
        }
    }

    // Missing timestamps tie with each other and sink to the end; the sort
    // is stable so emission order survives among ties.
    let sort_key = |c: &DeletedCandidate| c.deleted_time_ms.unwrap_or(i64::MIN);
    merged.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));
    merged
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn recycle_bin_wins_collisions() {
        let usn = vec![usn_candidate(r"D:\Docs\a.txt", Some(100))];
        let bin = vec![recycle_candidate(r"d:\docs\A.TXT", Some(50), true)];
        let merged = merge_candidates(usn, bin);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, CandidateSource::RecycleBin);
        assert_eq!(merged[0].confidence, CONFIDENCE_RECYCLE_PAIRED);
    }

    #[test]
    fn usn_never_overwrites_recycle() {
        let bin = vec![recycle_candidate(r"D:\a.txt", Some(10), false)];
        let usn = vec![usn_candidate(r"D:\a.txt", Some(999))];
        // Insertion order is USN then recycle inside merge; feed reversed
        // via the same path key to exercise the no-replace branch.
        let merged = merge_candidates(usn, bin);
        assert_eq!(merged[0].source, CandidateSource::RecycleBin);

        let merged = merge_candidates(Vec::new(), vec![
            recycle_candidate(r"D:\a.txt", Some(10), false),
        ]);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn newer_deletion_of_same_path_supersedes() {
        let bin = vec![
            recycle_candidate(r"D:\a.txt", Some(10), false),
            recycle_candidate(r"D:\a.txt", Some(20), true),
        ];
        let merged = merge_candidates(Vec::new(), bin);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].deleted_time_ms, Some(20));
    }

    #[test]
    fn wire_format_uses_decimal_strings() {
        let candidate = usn_candidate(r"D:\Docs\a.txt", Some(1234));
        let json = serde_json::to_string(&candidate).unwrap();

        // 64-bit integers cross the boundary as decimal strings.
        assert!(json.contains(r#""fileRef":"5""#));
        assert!(json.contains(r#""size":"0""#));
        assert!(json.contains(r#""source":"USN""#));
        assert!(json.contains(r#""fullPath":"D:\\Docs\\a.txt""#));
        assert!(json.contains(r#""deletedTimeMs":1234"#));

        let back: DeletedCandidate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, candidate);
    }

    #[test]
    fn deletion_time_formatting() {
        let mut c = usn_candidate(r"D:\a.txt", Some(1_577_836_800_000));
        assert_eq!(c.deleted_time_display(), "2020-01-01 00:00:00");
        c.deleted_time_ms = None;
        assert_eq!(c.deleted_time_display(), "Unknown");
    }

    #[test]
    fn sorted_newest_first_missing_times_stable() {
        let usn = vec![
            usn_candidate(r"D:\old.txt", Some(100)),
            usn_candidate(r"D:\unknown1.txt", None),
            usn_candidate(r"D:\new.txt", Some(300)),
        ];
        let merged = merge_candidates(usn, Vec::new());
        let times: Vec<Option<i64>> = merged.iter().map(|c| c.deleted_time_ms).collect();
        assert_eq!(times, vec![Some(300), Some(100), None]);
    }
}
