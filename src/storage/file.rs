use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::Result;
use crate::storage::page::{PageId, PAGE_SIZE};
use crate::storage::DiskManager;

/// A file backed disk manager. Pages live in a single database file at
/// offset `page_id * PAGE_SIZE` and are accessed with positional i/o, so
/// reads go through a shared reference.
#[derive(Debug)]
pub struct FileDisk {
    file: File,
    next_page_id: PageId,
}

impl FileDisk {
    /// Open or create the database file at the given path. The id
    /// allocator resumes after the highest page the file contains.
    pub fn open(path: &Path) -> Result<FileDisk> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        let next_page_id = len.div_ceil(PAGE_SIZE) as PageId;
        Ok(FileDisk { file, next_page_id })
    }
}

impl DiskManager for FileDisk {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        let n = buf.len().min(PAGE_SIZE);
        let offset = page_id as u64 * PAGE_SIZE as u64;
        // read_at stops at end of file; pages allocated but never written
        // read as zeroes.
        let mut read = 0;
        while read < n {
            let m = self.file.read_at(&mut buf[read..n], offset + read as u64)?;
            if m == 0 {
                break;
            }
            read += m;
        }
        buf[read..n].fill(0);
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        let n = data.len().min(PAGE_SIZE);
        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.write_all_at(&data[..n], offset)?;
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        Ok(page_id)
    }

    fn deallocate_page(&mut self, _page_id: PageId) -> Result<()> {
        // space reclamation is not implemented, the page's offset stays
        // dead in the file. the id is retired either way.
        Ok(())
    }
}
