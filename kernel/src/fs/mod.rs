//! Minimal file layer backing file-backed memory regions.
//!
//! The real file system and the block I/O beneath it live outside the
//! memory core; regions only need an open file they can read pages from,
//! with reference-counted duplication across fork and readable/writable
//! capability flags that are checked against the requested mapping
//! protection.

use crate::mem::error::{Error, Result};
use crate::sync::Mutex;
use crate::threading::process::Pid;
use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};

pub type FileDescriptor = i16;

/// Maximum number of simultaneously open files for a process.
///
/// 1024 is the default on Linux.
pub const MAX_OPEN_FILES: i16 = 1024;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProcessFileDescriptor {
    pub pid: Pid,
    pub fd: FileDescriptor,
}

/// An inode-like object: immutable content plus capability flags.
pub struct FileNode {
    data: Vec<u8>,
    readable: bool,
    writable: bool,
}

impl FileNode {
    pub fn new(data: Vec<u8>, readable: bool, writable: bool) -> Self {
        Self {
            data,
            readable,
            writable,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// An open file: a shared node plus a cursor.
///
/// The cursor is shared between every duplicate of this open file, so a
/// fork parent and child advance the same offset.
pub struct OpenFile {
    node: Arc<FileNode>,
    pos: Mutex<usize>,
}

impl OpenFile {
    pub fn new(node: Arc<FileNode>) -> Self {
        Self {
            node,
            pos: Mutex::new(0),
        }
    }

    pub fn readable(&self) -> bool {
        self.node.readable
    }

    pub fn writable(&self) -> bool {
        self.node.writable
    }

    pub fn size(&self) -> usize {
        self.node.len()
    }

    /// Reads from the cursor, advancing it. Returns the number of bytes
    /// read, which is short at end of file.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut pos = self.pos.lock();
        let n = self.read_from(*pos, buf);
        *pos += n;
        n
    }

    /// Reads at an explicit offset without disturbing the cursor; page
    /// population uses this so faults never move a process's file offset.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.read_from(offset, buf)
    }

    fn read_from(&self, offset: usize, buf: &mut [u8]) -> usize {
        let data = &self.node.data;
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }
}

/// Per-process open-file table, keyed by (pid, fd).
#[derive(Default)]
pub struct FileTable {
    content: Mutex<BTreeMap<ProcessFileDescriptor, Arc<OpenFile>>>,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `node` for `pid`, returning the lowest unused descriptor.
    pub fn open(&self, pid: Pid, node: Arc<FileNode>) -> Result<FileDescriptor> {
        let mut content = self.content.lock();
        let mut fd: FileDescriptor = 0;
        while content.contains_key(&ProcessFileDescriptor { pid, fd }) {
            fd += 1;
            if fd >= MAX_OPEN_FILES {
                return Err(Error::ResourceExhausted);
            }
        }
        content.insert(
            ProcessFileDescriptor { pid, fd },
            Arc::new(OpenFile::new(node)),
        );
        Ok(fd)
    }

    /// Looks up an open file, bumping no reference count; callers clone the
    /// `Arc` themselves if they intend to hold on to it.
    pub fn get(&self, fd: ProcessFileDescriptor) -> Result<Arc<OpenFile>> {
        self.content
            .lock()
            .get(&fd)
            .cloned()
            .ok_or(Error::InvalidArgument)
    }

    pub fn close(&self, fd: ProcessFileDescriptor) -> Result<()> {
        self.content
            .lock()
            .remove(&fd)
            .map(|_| ())
            .ok_or(Error::InvalidArgument)
    }

    /// Duplicates every descriptor of `parent` into `child`, sharing the
    /// open files (and their cursors) between the two.
    pub fn fork_dup(&self, parent: Pid, child: Pid) {
        let mut content = self.content.lock();
        let inherited: Vec<(FileDescriptor, Arc<OpenFile>)> = content
            .range(
                ProcessFileDescriptor {
                    pid: parent,
                    fd: 0,
                }..=ProcessFileDescriptor {
                    pid: parent,
                    fd: FileDescriptor::MAX,
                },
            )
            .map(|(key, file)| (key.fd, Arc::clone(file)))
            .collect();
        for (fd, file) in inherited {
            content.insert(ProcessFileDescriptor { pid: child, fd }, file);
        }
    }

    /// Closes every descriptor belonging to `pid` (process exit).
    pub fn close_all(&self, pid: Pid) {
        let mut content = self.content.lock();
        content.retain(|key, _| key.pid != pid);
    }
}

#[cfg(test)]
mod tests {
    use super::{FileNode, FileTable, OpenFile, ProcessFileDescriptor};
    use alloc::sync::Arc;
    use alloc::vec;

    fn node(data: &[u8]) -> Arc<FileNode> {
        Arc::new(FileNode::new(data.to_vec(), true, false))
    }

    #[test]
    fn cursor_reads_advance() {
        let file = OpenFile::new(node(b"hello world"));
        assert_eq!(file.size(), 11);
        let mut buf = [0u8; 5];
        assert_eq!(file.read(&mut buf), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(file.read(&mut buf), 5);
        assert_eq!(&buf, b" worl");
        assert_eq!(file.read(&mut buf), 1);
        assert_eq!(buf[0], b'd');
        assert_eq!(file.read(&mut buf), 0);
    }

    #[test]
    fn read_at_leaves_cursor_alone() {
        let file = OpenFile::new(node(b"abcdef"));
        let mut buf = [0u8; 2];
        assert_eq!(file.read_at(4, &mut buf), 2);
        assert_eq!(&buf, b"ef");
        assert_eq!(file.read(&mut buf), 2);
        assert_eq!(&buf, b"ab");
    }

    #[test]
    fn descriptors_are_per_process() {
        let table = FileTable::new();
        let fd1 = table.open(1, node(b"one")).unwrap();
        let fd2 = table.open(2, node(b"two")).unwrap();
        assert_eq!(fd1, 0);
        assert_eq!(fd2, 0);

        table.fork_dup(1, 3);
        let inherited = table.get(ProcessFileDescriptor { pid: 3, fd: fd1 }).unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(inherited.read(&mut buf), 3);
        assert_eq!(&buf, b"one");

        table.close_all(3);
        assert!(table.get(ProcessFileDescriptor { pid: 3, fd: fd1 }).is_err());
        // Parent still has its descriptor.
        assert!(table.get(ProcessFileDescriptor { pid: 1, fd: fd1 }).is_ok());
    }

    #[test]
    fn dup_shares_the_cursor() {
        let table = FileTable::new();
        let fd = table.open(7, node(b"abcd")).unwrap();
        table.fork_dup(7, 8);
        let parent = table.get(ProcessFileDescriptor { pid: 7, fd }).unwrap();
        let child = table.get(ProcessFileDescriptor { pid: 8, fd }).unwrap();
        let mut buf = vec![0u8; 2];
        parent.read(&mut buf);
        assert_eq!(child.read(&mut buf), 2);
        assert_eq!(&buf[..], b"cd");
    }
}
