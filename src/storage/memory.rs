use std::collections::BTreeMap;

use crate::error::Result;
use crate::storage::page::{PageId, PAGE_SIZE};
use crate::storage::DiskManager;

/// An in-memory disk manager, mostly for tests and ephemeral pools.
#[derive(Debug)]
pub struct Memory {
    pages: BTreeMap<PageId, Vec<u8>>,
    next_page_id: PageId,
}

impl Memory {
    pub fn new() -> Memory {
        Memory { pages: BTreeMap::new(), next_page_id: 0 }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Memory::new()
    }
}

impl DiskManager for Memory {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        let n = buf.len().min(PAGE_SIZE);
        match self.pages.get(&page_id) {
            Some(data) => buf[..n].copy_from_slice(&data[..n]),
            None => buf[..n].fill(0),
        }
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        let mut page = vec![0; PAGE_SIZE];
        let n = data.len().min(PAGE_SIZE);
        page[..n].copy_from_slice(&data[..n]);
        self.pages.insert(page_id, page);
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        Ok(page_id)
    }

    fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
        // the id is retired for good, next_page_id never moves back.
        self.pages.remove(&page_id);
        Ok(())
    }
}
