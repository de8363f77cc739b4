// SPDX-License-Identifier: Apache-2.0

//! OS-level identity of a file: device + inode on Unix, volume serial + file
//! index on Windows. Rotation tools reuse paths, so paths can't be compared.

use std::fmt;
use std::fs::File;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    #[cfg(unix)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let metadata = file.metadata()?;
        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    #[cfg(windows)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            BY_HANDLE_FILE_INFORMATION, GetFileInformationByHandle,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };

        if unsafe { GetFileInformationByHandle(handle, &mut info) } == 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            dev: info.dwVolumeSerialNumber as u64,
            ino: ((info.nFileIndexHigh as u64) << 32) | (info.nFileIndexLow as u64),
        })
    }
}

/// `dev:ino`, as logged when rotation is detected.
impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_same_file_same_id() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello\n").unwrap();

        let reopened = FileId::from_file(&File::open(file.path()).unwrap()).unwrap();
        assert_eq!(FileId::from_file(file.as_file()).unwrap(), reopened);
    }

    #[test]
    fn test_recreated_path_changes_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "first\n").unwrap();
        let kept_open = File::open(&path).unwrap();
        let before = FileId::from_file(&kept_open).unwrap();

        std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        std::fs::write(&path, "second\n").unwrap();

        let recreated = FileId::from_file(&File::open(&path).unwrap()).unwrap();
        assert_ne!(before, recreated);
        assert_eq!(before, FileId::from_file(&kept_open).unwrap());
    }

    #[test]
    fn test_display() {
        let id = FileId { dev: 8, ino: 1234 };
        assert_eq!(id.to_string(), "8:1234");
    }
}
