//! Raw volume access
//! Opens `\\.\X:` as a read-only block device with full sharing so the live
//! filesystem is undisturbed, and exposes positioned reads, device controls
//! and the per-drive geometry query. The handle is released when the value
//! drops, on every exit path.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};

/// `ERROR_HANDLE_EOF`: the enumeration-finished signal, not a failure.
pub const ERROR_HANDLE_EOF: u32 = 38;

/// A single validated drive letter, upper-case `A..=Z`. Canonicalized at
/// every boundary; every other input is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DriveLetter(char);

impl DriveLetter {
    pub fn as_char(self) -> char {
        self.0
    }

    /// Device path for CreateFile, e.g. `\\.\C:`.
    pub fn volume_path(self) -> String {
        format!(r"\\.\{}:", self.0)
    }

    /// Filesystem root, e.g. `C:\`.
    pub fn root_path(self) -> String {
        format!(r"{}:\", self.0)
    }

    /// Path prefix every candidate emitted for this drive must carry.
    pub fn path_prefix(self) -> String {
        self.root_path()
    }
}

impl TryFrom<char> for DriveLetter {
    type Error = EngineError;

    fn try_from(value: char) -> EngineResult<Self> {
        let upper = value.to_ascii_uppercase();
        if upper.is_ascii_uppercase() {
            Ok(DriveLetter(upper))
        } else {
            Err(EngineError::InvalidArgument(format!(
                "not a drive letter: {:?}",
                value
            )))
        }
    }
}

impl TryFrom<&str> for DriveLetter {
    type Error = EngineError;

    fn try_from(value: &str) -> EngineResult<Self> {
        let trimmed = value.trim().trim_end_matches('\\').trim_end_matches(':');
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(letter), None) => DriveLetter::try_from(letter),
            _ => Err(EngineError::InvalidArgument(format!(
                "not a drive letter: {:?}",
                value
            ))),
        }
    }
}

impl TryFrom<String> for DriveLetter {
    type Error = EngineError;

    fn try_from(value: String) -> EngineResult<Self> {
        DriveLetter::try_from(value.as_str())
    }
}

impl From<DriveLetter> for String {
    fn from(value: DriveLetter) -> Self {
        value.0.to_string()
    }
}

impl std::fmt::Display for DriveLetter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cluster geometry from the per-drive free-space query.
#[derive(Debug, Clone, Copy)]
pub struct VolumeGeometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
}

impl VolumeGeometry {
    pub fn cluster_size(self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }
}

/// Read-only handle to a volume device (or, off Windows, to a disk image
/// opened by path for testing).
pub struct Volume {
    handle: File,
    drive: char,
}

impl Volume {
    /// Open the volume device for a drive letter.
    #[cfg(windows)]
    pub fn open_drive(drive: DriveLetter) -> EngineResult<Self> {
        use std::os::windows::io::FromRawHandle;
        use std::ptr::null_mut;
        use winapi::um::fileapi::{CreateFileW, OPEN_EXISTING};
        use winapi::um::handleapi::INVALID_HANDLE_VALUE;
        use winapi::um::winbase::FILE_FLAG_BACKUP_SEMANTICS;
        use winapi::um::winnt::{
            FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, GENERIC_READ,
        };

        let wide: Vec<u16> = drive
            .volume_path()
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect();

        let raw = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_READ,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                null_mut(),
                OPEN_EXISTING,
                FILE_FLAG_BACKUP_SEMANTICS,
                null_mut(),
            )
        };

        if raw == INVALID_HANDLE_VALUE {
            let os_error = unsafe { winapi::um::errhandlingapi::GetLastError() };
            return Err(EngineError::VolumeUnavailable {
                drive: drive.as_char(),
                reason: format!("CreateFile failed with error {}", os_error),
            });
        }

        let handle = unsafe { File::from_raw_handle(raw as *mut std::ffi::c_void) };
        Ok(Volume { handle, drive: drive.as_char() })
    }

    #[cfg(not(windows))]
    pub fn open_drive(drive: DriveLetter) -> EngineResult<Self> {
        Err(EngineError::VolumeUnavailable {
            drive: drive.as_char(),
            reason: "raw volume access is only supported on Windows".to_string(),
        })
    }

    /// Open an arbitrary path as the read source. Used for disk images.
    pub fn open_path(path: &std::path::Path) -> EngineResult<Self> {
        let handle = File::open(path).map_err(EngineError::ReadFailed)?;
        Ok(Volume { handle, drive: '?' })
    }

    pub fn drive(&self) -> char {
        self.drive
    }

    /// Absolute seek + read. Returns the number of bytes actually read;
    /// zero means the device ended before the requested offset.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> EngineResult<usize> {
        self.handle
            .seek(SeekFrom::Start(offset))
            .map_err(EngineError::ReadFailed)?;
        self.handle.read(buf).map_err(EngineError::ReadFailed)
    }

    /// Issue a device control with separate input and output buffers.
    /// Returns the number of output bytes the kernel produced.
    #[cfg(windows)]
    pub fn ioctl(&self, code: u32, input: &[u8], output: &mut [u8]) -> EngineResult<u32> {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::ioapiset::DeviceIoControl;

        let mut bytes_returned: u32 = 0;
        let ok = unsafe {
            DeviceIoControl(
                self.handle.as_raw_handle() as *mut _,
                code,
                input.as_ptr() as *mut std::ffi::c_void,
                input.len() as u32,
                output.as_mut_ptr() as *mut std::ffi::c_void,
                output.len() as u32,
                &mut bytes_returned,
                std::ptr::null_mut(),
            )
        };

        if ok == 0 {
            let os_error = unsafe { winapi::um::errhandlingapi::GetLastError() };
            return Err(EngineError::IoctlFailed { code, os_error });
        }
        Ok(bytes_returned)
    }

    #[cfg(not(windows))]
    pub fn ioctl(&self, code: u32, _input: &[u8], _output: &mut [u8]) -> EngineResult<u32> {
        let _ = code;
        Err(EngineError::VolumeUnavailable {
            drive: self.drive,
            reason: "device controls are only supported on Windows".to_string(),
        })
    }
}

/// Query cluster geometry for a drive via the free-space call.
#[cfg(windows)]
pub fn query_geometry(drive: DriveLetter) -> EngineResult<VolumeGeometry> {
    use winapi::um::fileapi::GetDiskFreeSpaceW;

    let wide: Vec<u16> = drive
        .root_path()
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();

    let mut sectors_per_cluster: u32 = 0;
    let mut bytes_per_sector: u32 = 0;
    let mut free_clusters: u32 = 0;
    let mut total_clusters: u32 = 0;

    let ok = unsafe {
        GetDiskFreeSpaceW(
            wide.as_ptr(),
            &mut sectors_per_cluster,
            &mut bytes_per_sector,
            &mut free_clusters,
            &mut total_clusters,
        )
    };

    if ok == 0 {
        let os_error = unsafe { winapi::um::errhandlingapi::GetLastError() };
        return Err(EngineError::VolumeUnavailable {
            drive: drive.as_char(),
            reason: format!("GetDiskFreeSpace failed with error {}", os_error),
        });
    }

    Ok(VolumeGeometry { bytes_per_sector, sectors_per_cluster })
}

#[cfg(not(windows))]
pub fn query_geometry(drive: DriveLetter) -> EngineResult<VolumeGeometry> {
    Err(EngineError::VolumeUnavailable {
        drive: drive.as_char(),
        reason: "volume geometry is only available on Windows".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_letter_canonicalization() {
        assert_eq!(DriveLetter::try_from("c").unwrap().as_char(), 'C');
        assert_eq!(DriveLetter::try_from("D:").unwrap().as_char(), 'D');
        assert_eq!(DriveLetter::try_from("E:\\").unwrap().as_char(), 'E');
        assert!(DriveLetter::try_from("").is_err());
        assert!(DriveLetter::try_from("1").is_err());
        assert!(DriveLetter::try_from("CD").is_err());
    }

    #[test]
    fn drive_paths() {
        let d = DriveLetter::try_from('c').unwrap();
        assert_eq!(d.volume_path(), r"\\.\C:");
        assert_eq!(d.root_path(), r"C:\");
    }

    #[test]
    fn geometry_cluster_size() {
        let g = VolumeGeometry { bytes_per_sector: 512, sectors_per_cluster: 8 };
        assert_eq!(g.cluster_size(), 4096);
    }
}
