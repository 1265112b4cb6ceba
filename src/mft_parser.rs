//! MFT file-record parser
//! Decodes one NTFS file record as returned by FSCTL_GET_NTFS_FILE_RECORD:
//! header validation, attribute walk, resident value extraction and
//! non-resident run-list decoding. Update-sequence fix-ups are not applied;
//! records handed out by the kernel are already fixed up.

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Seek, SeekFrom};

use crate::codec::{self, base64_bytes, u64_str, utf16le_to_string};
use crate::errors::{EngineError, EngineResult};
use crate::run_list::{decode_run_list, RunSegment};

// Record signature 'FILE', little-endian.
const FILE_RECORD_MAGIC: u32 = 0x454C_4946;
const ATTRIBUTE_END: u32 = 0xFFFF_FFFF;

// Record header flags.
const FLAG_IN_USE: u16 = 0x0001;
const FLAG_DIRECTORY: u16 = 0x0002;

// Attribute types surfaced by name.
pub const ATTRIBUTE_DATA: u32 = 0x80;

/// One attribute from the record's attribute stream. Only the unnamed
/// `$DATA` attribute drives recovery; everything else is surfaced for
/// inspection.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AttributeInfo {
    #[serde(rename = "type")]
    pub type_code: u32,
    pub type_name: String,
    pub non_resident: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(with = "u64_str")]
    pub data_size: u64,
    #[serde(with = "u64_str")]
    pub allocated_size: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runs: Vec<RunSegment>,
    #[serde(
        rename = "residentDataBase64",
        default,
        with = "base64_bytes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub resident_data: Vec<u8>,
}

/// Decoded file record plus the volume geometry it was read under.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileRecordDetails {
    pub in_use: bool,
    pub is_directory: bool,
    #[serde(with = "u64_str")]
    pub base_reference: u64,
    pub hard_link_count: u16,
    pub flags: u16,
    pub attributes: Vec<AttributeInfo>,
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    #[serde(with = "u64_str")]
    pub cluster_size: u64,
}

impl FileRecordDetails {
    /// The attribute recovery reads from: the unnamed `$DATA` stream, or the
    /// first named one when no unnamed stream exists.
    pub fn recovery_data_attribute(&self) -> Option<&AttributeInfo> {
        self.attributes
            .iter()
            .find(|a| a.type_code == ATTRIBUTE_DATA && a.name.is_empty())
            .or_else(|| self.attributes.iter().find(|a| a.type_code == ATTRIBUTE_DATA))
    }
}

fn attribute_type_name(type_code: u32) -> &'static str {
    match type_code {
        0x10 => "StandardInformation",
        0x20 => "AttributeList",
        0x30 => "FileName",
        0x40 => "ObjectId",
        0x50 => "SecurityDescriptor",
        0x60 => "VolumeName",
        0x70 => "VolumeInformation",
        0x80 => "Data",
        0x90 => "IndexRoot",
        0xA0 => "IndexAllocation",
        0xB0 => "Bitmap",
        0xC0 => "ReparsePoint",
        0xD0 => "EAInformation",
        0xE0 => "EA",
        0xF0 => "PropertySet",
        0x100 => "LoggedUtilityStream",
        _ => "Unknown",
    }
}

/// Parse one attribute starting at `offset`. Returns the attribute and its
/// total length, or None when the stream ends or the record is malformed.
fn parse_attribute(record: &[u8], offset: usize) -> Option<(AttributeInfo, usize)> {
    if offset + 16 > record.len() {
        return None;
    }

    let type_code = u32::from_le_bytes([
        record[offset],
        record[offset + 1],
        record[offset + 2],
        record[offset + 3],
    ]);
    if type_code == ATTRIBUTE_END || type_code == 0 {
        return None;
    }

    let length = u32::from_le_bytes([
        record[offset + 4],
        record[offset + 5],
        record[offset + 6],
        record[offset + 7],
    ]) as usize;
    if length == 0 || offset + length > record.len() {
        return None;
    }

    let attr = &record[offset..offset + length];
    let non_resident = attr[8] != 0;
    let name_length = attr[9] as usize;
    let name_offset = u16::from_le_bytes([attr[10], attr[11]]) as usize;

    let name = if name_length > 0 && name_offset + name_length * 2 <= attr.len() {
        utf16le_to_string(&attr[name_offset..name_offset + name_length * 2])
    } else {
        String::new()
    };

    let mut info = AttributeInfo {
        type_code,
        type_name: attribute_type_name(type_code).to_string(),
        non_resident,
        name,
        data_size: 0,
        allocated_size: 0,
        runs: Vec::new(),
        resident_data: Vec::new(),
    };

    if non_resident {
        if attr.len() < 64 {
            return Some((info, length));
        }
        let mut cursor = Cursor::new(attr);
        cursor.seek(SeekFrom::Start(16)).ok()?;
        let lowest_vcn = cursor.read_u64::<LittleEndian>().ok()?;
        cursor.seek(SeekFrom::Start(32)).ok()?;
        let run_offset = cursor.read_u16::<LittleEndian>().ok()? as usize;
        cursor.seek(SeekFrom::Start(40)).ok()?;
        info.allocated_size = cursor.read_u64::<LittleEndian>().ok()?;
        info.data_size = cursor.read_u64::<LittleEndian>().ok()?;

        if run_offset < attr.len() {
            info.runs = decode_run_list(&attr[run_offset..], lowest_vcn as i64);
        }
    } else {
        if attr.len() < 24 {
            return Some((info, length));
        }
        let value_length = u32::from_le_bytes([attr[16], attr[17], attr[18], attr[19]]) as usize;
        let value_offset = u16::from_le_bytes([attr[20], attr[21]]) as usize;
        info.data_size = value_length as u64;
        info.allocated_size = value_length as u64;
        // Silently empty when the declared slice overruns the attribute.
        if value_length > 0 && value_offset + value_length <= attr.len() {
            info.resident_data = attr[value_offset..value_offset + value_length].to_vec();
        }
    }

    Some((info, length))
}

/// Parse a buffer holding one MFT file record (typically 1024 bytes).
pub fn parse_file_record(record: &[u8]) -> EngineResult<FileRecordDetails> {
    if record.len() < 48 {
        return Err(EngineError::NotAFileRecord);
    }

    let mut cursor = Cursor::new(record);
    let magic = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| EngineError::NotAFileRecord)?;
    if magic != FILE_RECORD_MAGIC {
        return Err(EngineError::NotAFileRecord);
    }

    cursor
        .seek(SeekFrom::Start(0x12))
        .map_err(|_| EngineError::NotAFileRecord)?;
    let hard_link_count = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| EngineError::NotAFileRecord)?;
    let first_attribute_offset = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| EngineError::NotAFileRecord)?;
    let flags = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| EngineError::NotAFileRecord)?;

    cursor
        .seek(SeekFrom::Start(0x20))
        .map_err(|_| EngineError::NotAFileRecord)?;
    let base_reference = cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| EngineError::NotAFileRecord)?;

    let mut details = FileRecordDetails {
        in_use: flags & FLAG_IN_USE != 0,
        is_directory: flags & FLAG_DIRECTORY != 0,
        base_reference,
        hard_link_count,
        flags,
        attributes: Vec::new(),
        bytes_per_sector: 0,
        sectors_per_cluster: 0,
        cluster_size: 0,
    };

    let mut offset = first_attribute_offset as usize;
    while let Some((info, length)) = parse_attribute(record, offset) {
        details.attributes.push(info);
        offset += length;
    }

    Ok(details)
}

/// Run-coverage check for a non-resident attribute: total clusters mapped by
/// the run list, in bytes. A well-formed `$DATA` satisfies
/// `coverage >= data_size` and `coverage == allocated_size`.
pub fn run_coverage_bytes(attribute: &AttributeInfo, cluster_size: u64) -> u64 {
    attribute
        .runs
        .iter()
        .map(|r| r.length.max(0) as u64)
        .sum::<u64>()
        .saturating_mul(cluster_size)
}

/// Convenience for boundary consumers inspecting a resident payload.
pub fn resident_data_base64(attribute: &AttributeInfo) -> String {
    codec::base64_encode(&attribute.resident_data)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::run_list::encode_run_list;

    #[test]
    fn rejects_wrong_magic() {
        let mut record = vec![0u8; 1024];
        record[0..4].copy_from_slice(b"BAAD");
        assert!(matches!(
            parse_file_record(&record),
            Err(EngineError::NotAFileRecord)
        ));
    }

    #[test]
    fn parses_resident_data_attribute() {
        let attr = resident_attribute(ATTRIBUTE_DATA, "", b"Hello");
        let record = build_record(0x0001, &attr);
        let details = parse_file_record(&record).unwrap();

        assert!(details.in_use);
        assert!(!details.is_directory);
        assert_eq!(details.attributes.len(), 1);
        let data = &details.attributes[0];
        assert_eq!(data.type_name, "Data");
        assert!(!data.non_resident);
        assert_eq!(data.data_size, 5);
        assert_eq!(data.resident_data, b"Hello");
    }

    #[test]
    fn parses_non_resident_runs_and_sizes() {
        let runs = vec![
            RunSegment { vcn: 0, lcn: 100, length: 2, sparse: false },
            RunSegment { vcn: 2, lcn: 0, length: 1, sparse: true },
        ];
        let attr = non_resident_attribute(ATTRIBUTE_DATA, 3 * 4096, 10_000, &encode_run_list(&runs));
        let record = build_record(0x0000, &attr);
        let details = parse_file_record(&record).unwrap();

        assert!(!details.in_use);
        let data = &details.attributes[0];
        assert!(data.non_resident);
        assert_eq!(data.data_size, 10_000);
        assert_eq!(data.allocated_size, 3 * 4096);
        assert_eq!(data.runs, runs);

        // Coverage invariant for a well-formed $DATA.
        let coverage = run_coverage_bytes(data, 4096);
        assert!(coverage >= data.data_size);
        assert_eq!(coverage, data.allocated_size);
    }

    #[test]
    fn unnamed_stream_preferred_for_recovery() {
        let mut attrs = resident_attribute(ATTRIBUTE_DATA, "Zone.Identifier", b"[ZoneTransfer]");
        attrs.extend(resident_attribute(ATTRIBUTE_DATA, "", b"payload"));
        let record = build_record(0x0001, &attrs);
        let details = parse_file_record(&record).unwrap();

        let pick = details.recovery_data_attribute().unwrap();
        assert!(pick.name.is_empty());
        assert_eq!(pick.resident_data, b"payload");
    }

    #[test]
    fn named_stream_is_fallback() {
        let attrs = resident_attribute(ATTRIBUTE_DATA, "only", b"x");
        let record = build_record(0x0001, &attrs);
        let details = parse_file_record(&record).unwrap();
        assert_eq!(details.recovery_data_attribute().unwrap().name, "only");
    }

    #[test]
    fn overrunning_resident_value_is_silently_empty() {
        let mut attr = resident_attribute(ATTRIBUTE_DATA, "", b"abc");
        // Claim a value length far past the attribute end.
        attr[16..20].copy_from_slice(&4096u32.to_le_bytes());
        let record = build_record(0x0001, &attr);
        let details = parse_file_record(&record).unwrap();
        assert!(details.attributes[0].resident_data.is_empty());
        assert_eq!(details.attributes[0].data_size, 4096);
    }

    #[test]
    fn wire_format_base64_and_string_sizes() {
        let attr = resident_attribute(ATTRIBUTE_DATA, "", b"Hello");
        let record = build_record(0x0001, &attr);
        let details = parse_file_record(&record).unwrap();

        let json = serde_json::to_string(&details.attributes[0]).unwrap();
        assert!(json.contains(r#""residentDataBase64":"SGVsbG8=""#));
        assert!(json.contains(r#""dataSize":"5""#));
        assert!(json.contains(r#""typeName":"Data""#));

        let back: AttributeInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.resident_data, b"Hello");
        assert_eq!(back.data_size, 5);
    }

    #[test]
    fn attribute_walk_stops_on_overrun_length() {
        let mut attr = resident_attribute(ATTRIBUTE_DATA, "", b"abc");
        attr[4..8].copy_from_slice(&5000u32.to_le_bytes());
        let record = build_record(0x0001, &attr);
        let details = parse_file_record(&record).unwrap();
        assert!(details.attributes.is_empty());
    }
}
