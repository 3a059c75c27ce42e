//! Raw directory access on Linux
//!
//! `std::fs::read_dir` allocates a `DirEntry` (and a full path) per entry and
//! goes through `readdir(3)`. For a disk usage scan every entry is only looked
//! at once, so this module reads `linux_dirent64` records straight out of a
//! large `getdents64` buffer and stats each name relative to the open
//! directory fd with `fstatat`.

use std::ffi::{CStr, CString};
use std::fs::Metadata;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Size of the `getdents64` buffer in bytes
pub const DIRENT_BUFFER_SIZE: usize = 32 * 1024;

/// `st_blocks` is always counted in 512-byte units on Linux
pub const ST_NBLOCKSIZE: u64 = 512;

/// Offsets into `struct linux_dirent64`
const D_INO: usize = 0;
const D_RECLEN: usize = 16;
const D_TYPE: usize = 18;
const D_NAME: usize = 19;

/// Entry type as reported by the directory itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirentKind {
    /// Directory
    Dir,
    /// Symbolic link
    Symlink,
    /// Any other known type (file, fifo, device, socket)
    Other,
    /// Filesystem does not fill in `d_type`
    Unknown,
}

impl DirentKind {
    fn from_d_type(d_type: u8) -> Self {
        match d_type {
            libc::DT_DIR => DirentKind::Dir,
            libc::DT_LNK => DirentKind::Symlink,
            libc::DT_UNKNOWN => DirentKind::Unknown,
            _ => DirentKind::Other,
        }
    }
}

/// One decoded `linux_dirent64` record, borrowing the name from the buffer
#[derive(Debug, Clone, Copy)]
pub struct RawDirent<'a> {
    /// Inode number
    pub ino: u64,
    /// Type from `d_type`
    pub kind: DirentKind,
    /// NUL-terminated name
    pub name: &'a CStr,
}

impl RawDirent<'_> {
    /// Is this "." or ".."?
    pub fn is_dot_dir(&self) -> bool {
        is_dot_dir(self.name.to_bytes())
    }
}

/// Is this name "." or ".."?
pub fn is_dot_dir(name: &[u8]) -> bool {
    matches!(name, b"." | b"..")
}

/// The subset of `struct stat` the scanner needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryStat {
    /// Allocated 512-byte blocks
    pub blocks: u64,
    /// Inode number
    pub ino: u64,
    /// Device number
    pub dev: u64,
    /// Type and permission bits
    pub mode: u32,
    /// Modification time (seconds since the epoch)
    pub mtime: i64,
}

impl EntryStat {
    /// Storage actually allocated to the entry
    pub fn disk_usage(&self) -> u64 {
        self.blocks * ST_NBLOCKSIZE
    }

    /// Whether the mode says directory
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }

    fn from_raw(st: &libc::stat) -> Self {
        Self {
            blocks: st.st_blocks as u64,
            ino: st.st_ino as u64,
            dev: st.st_dev as u64,
            mode: st.st_mode as u32,
            mtime: st.st_mtime as i64,
        }
    }
}

impl From<&Metadata> for EntryStat {
    fn from(meta: &Metadata) -> Self {
        Self {
            blocks: meta.blocks(),
            ino: meta.ino(),
            dev: meta.dev(),
            mode: meta.mode(),
            mtime: meta.mtime(),
        }
    }
}

/// Stat a path given on the command line
pub fn stat_path(path: &Path, follow: bool) -> io::Result<EntryStat> {
    let meta = if follow {
        std::fs::metadata(path)?
    } else {
        std::fs::symlink_metadata(path)?
    };
    Ok(EntryStat::from(&meta))
}

/// Convert a path into a C string for the libc calls
pub fn path_to_cstring(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))
}

/// Reusable, 8-byte aligned buffer for `getdents64`
pub struct DirentBuffer {
    words: Vec<u64>,
}

impl DirentBuffer {
    /// Allocate a buffer of `DIRENT_BUFFER_SIZE` bytes
    pub fn new() -> Self {
        Self {
            words: vec![0u64; DIRENT_BUFFER_SIZE / 8],
        }
    }

    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }
}

impl Default for DirentBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// An open directory file descriptor, closed on drop
#[derive(Debug)]
pub struct DirHandle {
    fd: OwnedFd,
}

impl DirHandle {
    /// Open a directory by path
    pub fn open(path: &Path) -> io::Result<Self> {
        let cpath = path_to_cstring(path)?;
        Self::open_at_fd(libc::AT_FDCWD, &cpath)
    }

    /// Open a subdirectory of this directory
    pub fn open_child(&self, name: &CStr) -> io::Result<Self> {
        Self::open_at_fd(self.fd.as_raw_fd(), name)
    }

    fn open_at_fd(dirfd: libc::c_int, name: &CStr) -> io::Result<Self> {
        let fd = unsafe {
            libc::openat(
                dirfd,
                name.as_ptr(),
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: fd was just returned by openat and is owned by nobody else
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Stat an entry of this directory
    pub fn stat_at(&self, name: &CStr, follow: bool) -> io::Result<EntryStat> {
        let flags = if follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
        let mut st = std::mem::MaybeUninit::<libc::stat>::uninit();
        let ret = unsafe { libc::fstatat(self.fd.as_raw_fd(), name.as_ptr(), st.as_mut_ptr(), flags) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: fstatat returned 0, so the struct is initialized
        let st = unsafe { st.assume_init() };
        Ok(EntryStat::from_raw(&st))
    }

    /// Fill `buf` with the next batch of entries.
    ///
    /// Returns an empty iterator once the directory is exhausted.
    pub fn read_batch<'b>(&self, buf: &'b mut DirentBuffer) -> io::Result<Dirents<'b>> {
        let nread = {
            let bytes = buf.bytes_mut();
            unsafe {
                libc::syscall(
                    libc::SYS_getdents64,
                    self.fd.as_raw_fd(),
                    bytes.as_mut_ptr(),
                    bytes.len(),
                )
            }
        };
        if nread < 0 {
            return Err(io::Error::last_os_error());
        }
        let buf: &'b DirentBuffer = buf;
        Ok(Dirents {
            buf: &buf.bytes()[..nread as usize],
            pos: 0,
        })
    }
}

/// Iterator over the records of one `getdents64` batch
pub struct Dirents<'b> {
    buf: &'b [u8],
    pos: usize,
}

impl Dirents<'_> {
    /// Whether the batch holds no records (end of directory)
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl<'b> Iterator for Dirents<'b> {
    type Item = RawDirent<'b>;

    fn next(&mut self) -> Option<RawDirent<'b>> {
        let rest = &self.buf[self.pos..];
        if rest.len() < D_NAME {
            return None;
        }

        let reclen = u16::from_ne_bytes([rest[D_RECLEN], rest[D_RECLEN + 1]]) as usize;
        if reclen < D_NAME || reclen > rest.len() {
            return None;
        }

        let mut ino = [0u8; 8];
        ino.copy_from_slice(&rest[D_INO..D_INO + 8]);
        let name = CStr::from_bytes_until_nul(&rest[D_NAME..reclen]).ok()?;

        self.pos += reclen;
        Some(RawDirent {
            ino: u64::from_ne_bytes(ino),
            kind: DirentKind::from_d_type(rest[D_TYPE]),
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;

    fn list(path: &Path) -> BTreeMap<String, DirentKind> {
        let dir = DirHandle::open(path).unwrap();
        let mut buf = DirentBuffer::new();
        let mut names = BTreeMap::new();
        loop {
            let batch = dir.read_batch(&mut buf).unwrap();
            if batch.is_empty() {
                break;
            }
            for entry in batch {
                names.insert(entry.name.to_string_lossy().into_owned(), entry.kind);
            }
        }
        names
    }

    #[test]
    fn test_is_dot_dir() {
        assert!(is_dot_dir(b"."));
        assert!(is_dot_dir(b".."));
        assert!(!is_dot_dir(b"..."));
        assert!(!is_dot_dir(b".hidden"));
        assert!(!is_dot_dir(b""));
    }

    #[test]
    fn test_read_directory() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("file.txt"), b"hello").unwrap();
        std::os::unix::fs::symlink("file.txt", tmp.path().join("link")).unwrap();

        let names = list(tmp.path());
        assert!(names.contains_key("."));
        assert!(names.contains_key(".."));
        assert!(names.contains_key("file.txt"));
        assert!(names.contains_key("sub"));
        assert!(names.contains_key("link"));
        assert_eq!(names.len(), 5);

        // Filesystems may leave d_type unknown
        assert!(matches!(names["sub"], DirentKind::Dir | DirentKind::Unknown));
        assert!(matches!(names["link"], DirentKind::Symlink | DirentKind::Unknown));
    }

    #[test]
    fn test_many_entries_span_batches() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..2000 {
            fs::write(tmp.path().join(format!("a-rather-long-file-name-{i:05}")), b"").unwrap();
        }
        assert_eq!(list(tmp.path()).len(), 2002);
    }

    #[test]
    fn test_stat_at() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("data"), vec![7u8; 10_000]).unwrap();
        std::os::unix::fs::symlink("data", tmp.path().join("link")).unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();

        let dir = DirHandle::open(tmp.path()).unwrap();
        let data = dir.stat_at(c"data", false).unwrap();
        let meta = fs::symlink_metadata(tmp.path().join("data")).unwrap();
        assert_eq!(data, EntryStat::from(&meta));
        assert_eq!(data.disk_usage(), meta.blocks() * 512);
        assert!(!data.is_dir());

        let link = dir.stat_at(c"link", false).unwrap();
        let followed = dir.stat_at(c"link", true).unwrap();
        assert_ne!(link.ino, followed.ino);
        assert_eq!(followed.ino, data.ino);

        assert!(dir.stat_at(c"sub", false).unwrap().is_dir());
        assert!(dir.stat_at(c"missing", false).is_err());
    }

    #[test]
    fn test_open_errors() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("file"), b"x").unwrap();

        assert!(DirHandle::open(&tmp.path().join("missing")).is_err());
        let not_dir = DirHandle::open(&tmp.path().join("file")).unwrap_err();
        assert_eq!(not_dir.raw_os_error(), Some(libc::ENOTDIR));

        let dir = DirHandle::open(tmp.path()).unwrap();
        assert!(dir.open_child(c"file").is_err());
    }
}
