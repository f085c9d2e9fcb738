//! Open-file bookkeeping.
//!
//! Each path ever opened gets one entry holding the ordered list of blocks
//! that make up the file, its size, and the current position. Entries live
//! until the driver shuts down: closing a file only clears its open flag,
//! and reopening the path hands back the same handle with the position reset
//! and the contents intact.

use crate::error::{HandleError, Result};
use crate::packet::{BlockId, NodeId, BLOCK_SIZE};
use std::collections::HashMap;
use std::fmt;

/// Opaque handle for an opened path, stable across reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle(usize);

impl FileHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fh{}", self.0)
    }
}

/// Where one block of a file lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLocation {
    pub block_id: BlockId,
    pub node: NodeId,
}

/// Per-path state.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: String,

    /// Block `i` holds bytes `[i * BLOCK_SIZE, (i + 1) * BLOCK_SIZE)`
    pub blocks: Vec<BlockLocation>,

    /// Always `blocks.len() * BLOCK_SIZE`
    pub size: usize,

    pub position: usize,

    pub open: bool,
}

impl FileEntry {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            blocks: Vec::new(),
            size: 0,
            position: 0,
            open: false,
        }
    }

    /// Block holding byte `offset`, if the file has one.
    pub fn block_at(&self, offset: usize) -> Option<BlockLocation> {
        self.blocks.get(offset / BLOCK_SIZE).copied()
    }

    /// Append a freshly created block, growing the file by one block.
    pub fn push_block(&mut self, location: BlockLocation) {
        self.blocks.push(location);
        self.size += BLOCK_SIZE;
    }

    pub fn stat(&self) -> FileStat {
        FileStat {
            size: self.size,
            position: self.position,
            blocks: self.blocks.len(),
            open: self.open,
        }
    }
}

/// Snapshot of a file's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: usize,
    pub position: usize,
    pub blocks: usize,
    pub open: bool,
}

/// Path → handle table.
#[derive(Debug, Default)]
pub struct FileTable {
    entries: Vec<FileEntry>,
    by_path: HashMap<String, FileHandle>,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path`, creating its entry on first use.
    ///
    /// Position is reset to 0 either way; blocks and size are kept.
    pub fn open(&mut self, path: &str) -> FileHandle {
        let handle = match self.by_path.get(path) {
            Some(&handle) => handle,
            None => {
                let handle = FileHandle(self.entries.len());
                self.entries.push(FileEntry::new(path));
                self.by_path.insert(path.to_string(), handle);
                handle
            }
        };

        let entry = &mut self.entries[handle.0];
        entry.position = 0;
        entry.open = true;
        handle
    }

    /// Entry for an open handle.
    pub fn get(&self, handle: FileHandle) -> Result<&FileEntry> {
        let entry = self
            .entries
            .get(handle.0)
            .ok_or(HandleError::Invalid(handle.0))?;
        if !entry.open {
            return Err(HandleError::Closed(handle.0).into());
        }
        Ok(entry)
    }

    /// Mutable entry for an open handle.
    pub fn get_mut(&mut self, handle: FileHandle) -> Result<&mut FileEntry> {
        let entry = self
            .entries
            .get_mut(handle.0)
            .ok_or(HandleError::Invalid(handle.0))?;
        if !entry.open {
            return Err(HandleError::Closed(handle.0).into());
        }
        Ok(entry)
    }

    /// Entry for any known handle, open or closed.
    pub fn lookup(&self, handle: FileHandle) -> Result<&FileEntry> {
        Ok(self
            .entries
            .get(handle.0)
            .ok_or(HandleError::Invalid(handle.0))?)
    }

    pub fn close(&mut self, handle: FileHandle) -> Result<()> {
        self.get_mut(handle)?.open = false;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of blocks across all files.
    pub fn total_blocks(&self) -> usize {
        self.entries.iter().map(|entry| entry.blocks.len()).sum()
    }
}
