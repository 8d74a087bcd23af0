use std::fmt::Debug;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::storage::page::PageId;

pub mod file;
pub mod memory;
pub mod page;

/// A page-granular storage backend consumed by the buffer pool. Pages are
/// fixed-size blocks of PAGE_SIZE bytes addressed by PageId; the backend
/// also owns the page id lifecycle, ids grow monotonically and are never
/// reused within the lifetime of the disk manager.
/// The DiskManager trait is designed as `trait object` compatible, i.e.,
/// follow the [object safety rules](https://doc.rust-lang.org/reference/items/traits.html#object-safety)
/// so the buffer pool can hold it as `Box<dyn DiskManager>`.
pub trait DiskManager: Debug + Send + Sync {
    /// Read the page into the given buffer. Reads are total: a page that
    /// has never been written fills the buffer with zeroes.
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()>;

    /// Write the page out of the given buffer.
    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Allocate a fresh page id.
    fn allocate_page(&mut self) -> Result<PageId>;

    /// Release the page on storage. The id itself is retired, the
    /// allocator never hands it out again.
    fn deallocate_page(&mut self, page_id: PageId) -> Result<()>;
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StorageType {
    Memory,
    File,
}

pub fn new_disk_manager(typ: StorageType, path: &Path) -> Result<Box<dyn DiskManager>> {
    match typ {
        StorageType::Memory => Ok(Box::new(memory::Memory::new())),
        StorageType::File => Ok(Box::new(file::FileDisk::open(path)?)),
    }
}
