use std::path::Path;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::buffer::replacer::{Replacer, SyncLRUKReplacer};
use crate::config::Config;
use crate::container::extendible_hash::SyncExtendibleHashTable;
use crate::error::{Error, Result};
use crate::storage::page::{FrameId, Page, PageId, INVALID_PAGE_ID};
use crate::storage::{new_disk_manager, DiskManager};
use crate::wal::LogManager;

/// The buffer pool is responsible for moving physical pages back and forth
/// from main memory to disk. It allows a DBMS to support databases that are
/// larger than the amount of memory available to the system.
///
/// The buffer pool's operations are transparent to other parts in the system.
/// For example, the system asks the buffer pool for a page using its unique
/// identifier (page_id) and it does not know whether that page is already in
/// memory or whether the system has to retrieve it from disk.
struct BufferPool {
    pool_size: usize,
    /// page-granular disk backend, also owns the page id lifecycle.
    disk: Box<dyn DiskManager>,
    /// array of buffer pool pages. use the array index as
    /// FrameId, i.e., the FrameId is in range: [0, pool_size).
    pages: Vec<Arc<Page>>,
    /// page table for keeping track of buffer pool pages.
    page_table: SyncExtendibleHashTable<PageId, FrameId>,
    /// list of free frames that don't have any pages on them.
    free_list: Vec<FrameId>,
    /// Replacer to find unpinned pages for replacement.
    replacer: Arc<dyn Replacer>,
    /// write-ahead log manager, held for callers that wire one through.
    /// recovery is outside this layer, the pool never consults it.
    #[allow(dead_code)]
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPool {
    fn new(
        disk: Box<dyn DiskManager>,
        pool_size: usize,
        replacer_k: usize,
        bucket_size: usize,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let mut pages = Vec::with_capacity(pool_size);
        let mut free_list = Vec::with_capacity(pool_size);
        let page_table = SyncExtendibleHashTable::new(bucket_size);
        let replacer: Arc<dyn Replacer> = Arc::new(SyncLRUKReplacer::new(replacer_k, pool_size));
        for i in 0..pool_size {
            pages.push(Arc::new(Page::new()));
            // initially, every page is in the free list
            free_list.push(i);
        }
        BufferPool { pool_size, disk, pages, page_table, free_list, replacer, log_manager }
    }

    /// Create a new page in the buffer pool, return the newly created page or
    /// Error::BufferPoolNoAvailableFrame if all frames are currently in use
    /// and not evictable(in another word, pinned).
    ///
    /// Pick the replacement frame from either the free list or the replacer
    /// (always find from the free list first), and then ask the disk manager
    /// for a new page id. The new frame comes out of acquire_frame already
    /// pinned with initial value 1.
    fn new_page(&mut self) -> Result<Arc<Page>> {
        let frame_id = self.acquire_frame()?;
        let page_id = self.disk.allocate_page()?;

        let page = Arc::clone(&self.pages[frame_id]);
        let mut guard = page.write()?;
        guard.id = page_id;
        drop(guard);

        // link the new page with the frame into page table
        self.page_table.insert(page_id, frame_id);
        Ok(page)
    }

    /// Fetch the requested page with the given page id from the buffer pool.
    /// return no available frame error if the page need to be fetched from
    /// disk but all frames are currently in use and not evictable(in other
    /// words, pinned).
    ///
    /// First search for page_id in the buffer pool. if not found, pick a
    /// replacement frame from either the free list or the replacer(always
    /// find from the free list first), and read the page from the disk
    /// manager into the frame.
    fn fetch_page(&mut self, page_id: PageId) -> Result<Arc<Page>> {
        // check if page table has the page id
        if let Some(frame_id) = self.page_table.find(&page_id) {
            // we have the page frame in buffer pool already,
            // increase pin count, record frame access then
            // return it.
            let page = Arc::clone(&self.pages[frame_id]);
            let mut guard = page.write()?;
            guard.pin_count += 1;
            drop(guard);
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(page);
        }

        let frame_id = self.acquire_frame()?;

        let page = Arc::clone(&self.pages[frame_id]);
        let mut guard = page.write()?;
        self.disk.read_page(page_id, &mut guard.data)?;
        guard.id = page_id;
        drop(guard);

        // link the new page with the frame into page table
        self.page_table.insert(page_id, frame_id);
        Ok(page)
    }

    /// Unpin the target page from the buffer pool. If page_id is not in the
    /// buffer pool or its pin count is already 0, return false.
    ///
    /// Decrement the pin count of a page. If the pin count reaches 0, the
    /// frame becomes evictable by the replacer. The dirty flag is monotone:
    /// it is OR-ed with the caller's is_dirty, an unpin with false never
    /// clears an earlier true. The flag drops back to clean only through
    /// a flush.
    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<bool> {
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };
        let page = &self.pages[frame_id];
        let mut guard = page.write()?;
        if guard.pin_count == 0 {
            return Ok(false);
        }
        guard.pin_count -= 1;
        if is_dirty {
            guard.is_dirty = true;
        }
        if guard.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        Ok(true)
    }

    /// Flush the target page to disk if it is dirty and unset the dirty
    /// flag. Return false if the page cannot be found in the page table,
    /// true otherwise, clean pages included.
    fn flush_page(&mut self, page_id: PageId) -> Result<bool> {
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };
        let page = Arc::clone(&self.pages[frame_id]);
        let mut guard = page.write()?;
        if guard.is_dirty {
            self.disk.write_page(guard.id, &guard.data)?;
            guard.is_dirty = false;
        }
        Ok(true)
    }

    /// Flush every dirty page frame in the buffer pool to disk.
    fn flush_all_pages(&mut self) -> Result<()> {
        for frame_id in 0..self.pool_size {
            let page = Arc::clone(&self.pages[frame_id]);
            let mut guard = page.write()?;
            if guard.id == INVALID_PAGE_ID || !guard.is_dirty {
                continue;
            }
            self.disk.write_page(guard.id, &guard.data)?;
            guard.is_dirty = false;
        }
        Ok(())
    }

    /// Delete a page from the buffer pool. if the page is not in the buffer
    /// pool, it is already gone, return true. if the page is pinned and
    /// cannot be deleted, return false immediately.
    ///
    /// After unlinking the page from the page table, stop tracking the frame
    /// in the replacer, reset the frame's memory and metadata and add it back
    /// to the free list. Deleting a page also releases the page id on the
    /// disk manager.
    fn delete_page(&mut self, page_id: PageId) -> Result<bool> {
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(true);
        };
        let page = Arc::clone(&self.pages[frame_id]);
        let mut guard = page.write()?;
        if guard.pin_count > 0 {
            debug_assert!(!self.replacer.is_evictable(frame_id));
            return Ok(false);
        }

        debug!("delete page {} from frame {}", page_id, frame_id);
        // unlink the page from page table
        self.page_table.remove(&page_id);
        // remove frame access from replacer
        self.replacer.remove(frame_id);
        // clean page frame and add back to free list
        guard.reset();
        self.free_list.push(frame_id);
        // release the page id on storage as well
        self.disk.deallocate_page(page_id)?;

        Ok(true)
    }

    /// Pick a replacement frame from either the free list or the replacer,
    /// always from the free list first. A frame picked from the replacer has
    /// its old page unlinked from the page table and written back to disk if
    /// dirty. The frame comes back pinned with initial value 1 and recorded
    /// as accessed, so the replacer wouldn't hand it out again before the
    /// caller unpins it.
    fn acquire_frame(&mut self) -> Result<FrameId> {
        let frame_id = match self.free_list.pop() {
            Some(frame_id) => frame_id,
            None => {
                let frame_id =
                    self.replacer.evict().ok_or(Error::BufferPoolNoAvailableFrame)?;
                let page = Arc::clone(&self.pages[frame_id]);
                let mut guard = page.write()?;
                debug!("evict page {} from frame {}", guard.id, frame_id);
                // unlink the old page from page table
                self.page_table.remove(&guard.id);
                // flush the in-memory page as the storage page if it is dirty.
                if guard.is_dirty {
                    self.disk.write_page(guard.id, &guard.data)?;
                }
                guard.reset();
                frame_id
            }
        };

        let page = &self.pages[frame_id];
        let mut guard = page.write()?;
        debug_assert!(guard.pin_count == 0 && !guard.is_dirty);
        // pin the frame with initial value 1
        guard.pin_count = 1;
        drop(guard);
        // a fresh replacer record starts non-evictable, which keeps the
        // frame out of the candidate set until the first unpin.
        self.replacer.record_access(frame_id);
        Ok(frame_id)
    }
}

/// Buffer pool manager wrap buffer pool with a mutex for concurrent access,
/// basically all the heavy lifting are happens in the buffer pool.
///
/// The mutex is the pool latch and the outermost lock: disk i/o during
/// fetch, flush and eviction happens while it is held, which keeps the
/// residency bookkeeping atomic with respect to i/o at the cost of
/// serialising the pool under i/o pressure.
pub struct BufferPoolManager {
    inner: Arc<Mutex<BufferPool>>,
}

impl BufferPoolManager {
    pub fn new(
        disk: Box<dyn DiskManager>,
        pool_size: usize,
        replacer_k: usize,
        bucket_size: usize,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let inner = BufferPool::new(disk, pool_size, replacer_k, bucket_size, log_manager);
        BufferPoolManager { inner: Arc::new(Mutex::new(inner)) }
    }

    /// Build a buffer pool manager from a configuration, wiring up the
    /// configured disk backend.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let disk = new_disk_manager(cfg.storage_type, Path::new(&cfg.data_dir))?;
        Ok(BufferPoolManager::new(disk, cfg.pool_size, cfg.replacer_k, cfg.bucket_size, None))
    }

    /// Create a new page in buffer pool. The page comes back pinned with
    /// pin count 1.
    pub fn new_page(&self) -> Result<Arc<Page>> {
        let mut inner = self.inner.lock()?;
        inner.new_page()
    }

    /// Fetch the requested page with the given page id from the buffer pool,
    /// reading it from disk if it is not resident. The page comes back with
    /// its pin count incremented.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Page>> {
        let mut inner = self.inner.lock()?;
        inner.fetch_page(page_id)
    }

    /// Unpin the target page from the buffer pool. If page_id is not in the
    /// buffer pool or its pin count is already 0, return false.
    ///
    /// The dirty flag is monotone: unpinning with is_dirty false never
    /// clears an earlier true.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<bool> {
        let inner = self.inner.lock()?;
        inner.unpin_page(page_id, is_dirty)
    }

    /// Flush the target page to disk if dirty and unset the dirty flag.
    /// Return false if the page is not resident, true otherwise.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        inner.flush_page(page_id)
    }

    /// Flush all the dirty pages in the buffer pool to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.flush_all_pages()
    }

    /// Delete a page from the buffer pool. if the page is not resident,
    /// return true. if the page is pinned and cannot be deleted, return
    /// false immediately.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        inner.delete_page(page_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::Memory;
    use crate::storage::page::{INVALID_PAGE_ID, PAGE_SIZE};

    fn new_bpm(pool_size: usize, replacer_k: usize) -> BufferPoolManager {
        let disk = Box::new(Memory::new());
        BufferPoolManager::new(disk, pool_size, replacer_k, 4, None)
    }

    /// Count the frames across the free list and the resident set; the
    /// total must always equal the pool size.
    fn frame_accounting(bpm: &BufferPoolManager) -> (usize, usize, usize) {
        let inner = bpm.inner.lock().unwrap();
        let free = inner.free_list.len();
        let mut resident = 0;
        for page in &inner.pages {
            let guard = page.read().unwrap();
            if guard.id != INVALID_PAGE_ID {
                resident += 1;
            }
        }
        (free, resident, inner.pool_size)
    }

    #[test]
    fn test_resident_page_is_shared() -> Result<()> {
        // Fetching a resident page hands out the same frame and stacks
        // pin counts; the page stays pinned until the last unpin.
        let bpm = new_bpm(3, 2);

        let page0 = bpm.new_page()?;
        let page0_id = page0.read()?.id;
        let mut guard = page0.write()?;
        guard.data[..5].copy_from_slice(b"hello");
        drop(guard);

        let same = bpm.fetch_page(page0_id)?;
        assert!(Arc::ptr_eq(&page0, &same));
        assert_eq!(2, same.read()?.pin_count);
        assert_eq!(b"hello", &same.read()?.data[..5]);

        assert!(bpm.unpin_page(page0_id, true)?);
        // still pinned once, a delete must be refused
        assert!(!bpm.delete_page(page0_id)?);
        assert!(bpm.unpin_page(page0_id, false)?);
        assert_eq!(0, page0.read()?.pin_count);

        Ok(())
    }

    #[test]
    fn test_capacity_exhaustion_recovers_after_unpin() -> Result<()> {
        let bpm = new_bpm(2, 2);

        let p0 = bpm.new_page()?.read()?.id;
        let p1 = bpm.new_page()?.read()?.id;

        // with every frame pinned, creating and fetching both report
        // capacity exhaustion
        assert_eq!(Err(Error::BufferPoolNoAvailableFrame), bpm.new_page().map(|_| ()));
        assert_eq!(Err(Error::BufferPoolNoAvailableFrame), bpm.fetch_page(99).map(|_| ()));

        // a single unpin is enough to recover
        assert!(bpm.unpin_page(p0, false)?);
        let p2 = bpm.new_page()?.read()?.id;
        assert!(p2 > p1);

        let (free, resident, pool_size) = frame_accounting(&bpm);
        assert_eq!(pool_size, free + resident);

        Ok(())
    }

    #[test]
    fn test_eviction_under_pressure() -> Result<()> {
        let bpm = new_bpm(3, 2);

        // fill the pool and release every frame
        let mut page_ids = vec![];
        for _ in 0..3 {
            let page = bpm.new_page()?;
            page_ids.push(page.read()?.id);
        }
        for &page_id in &page_ids {
            assert!(bpm.unpin_page(page_id, false)?);
        }

        // three more pages evict the unpinned ones
        let p3 = bpm.new_page()?.read()?.id;
        assert!(bpm.new_page().is_ok());
        assert!(bpm.new_page().is_ok());

        // every frame is pinned now
        assert_eq!(Err(Error::BufferPoolNoAvailableFrame), bpm.new_page().map(|_| ()));

        // releasing one frame is enough for the next new page
        assert!(bpm.unpin_page(p3, false)?);
        assert!(bpm.new_page().is_ok());

        let (free, resident, pool_size) = frame_accounting(&bpm);
        assert_eq!(pool_size, free + resident);

        Ok(())
    }

    #[test]
    fn test_dirty_page_survives_eviction() -> Result<()> {
        let bpm = new_bpm(3, 2);

        let page0 = bpm.new_page()?;
        let page0_id = page0.read()?.id;
        let mut guard = page0.write()?;
        guard.data.fill(0xab);
        drop(guard);
        assert!(bpm.unpin_page(page0_id, true)?);

        // fill the pool with fresh pages to force page0 out
        for _ in 0..3 {
            let page = bpm.new_page()?;
            let page_id = page.read()?.id;
            assert!(bpm.unpin_page(page_id, false)?);
        }

        // the dirty content comes back from disk
        let page0 = bpm.fetch_page(page0_id)?;
        let guard = page0.read()?;
        assert_eq!(vec![0xab; PAGE_SIZE], guard.data);

        Ok(())
    }

    #[test]
    fn test_unpin_dirty_flag_is_monotone() -> Result<()> {
        let bpm = new_bpm(3, 2);

        let page0 = bpm.new_page()?;
        let page0_id = page0.read()?.id;
        let mut guard = page0.write()?;
        guard.data.fill(0x5c);
        drop(guard);
        assert!(bpm.unpin_page(page0_id, true)?);

        // a second pin/unpin round with is_dirty=false must not clear the
        // dirty bit set by the first unpin
        let _ = bpm.fetch_page(page0_id)?;
        assert!(bpm.unpin_page(page0_id, false)?);

        for _ in 0..3 {
            let page = bpm.new_page()?;
            let page_id = page.read()?.id;
            assert!(bpm.unpin_page(page_id, false)?);
        }

        let page0 = bpm.fetch_page(page0_id)?;
        let guard = page0.read()?;
        assert_eq!(vec![0x5c; PAGE_SIZE], guard.data);

        Ok(())
    }

    #[test]
    fn test_unpin_edge_cases() -> Result<()> {
        let bpm = new_bpm(3, 2);

        // unknown page
        assert!(!bpm.unpin_page(42, false)?);

        let page0 = bpm.new_page()?;
        let page0_id = page0.read()?.id;
        assert!(bpm.unpin_page(page0_id, false)?);
        // pin count is already zero
        assert!(!bpm.unpin_page(page0_id, false)?);

        Ok(())
    }

    #[test]
    fn test_flush_page() -> Result<()> {
        let bpm = new_bpm(3, 2);

        // not resident
        assert!(!bpm.flush_page(42)?);

        let page0 = bpm.new_page()?;
        let page0_id = page0.read()?.id;
        let mut guard = page0.write()?;
        guard.data.fill(0x77);
        guard.is_dirty = true;
        drop(guard);

        assert!(bpm.flush_page(page0_id)?);
        assert!(!page0.read()?.is_dirty);
        // flushing a clean page still reports true
        assert!(bpm.flush_page(page0_id)?);

        Ok(())
    }

    #[test]
    fn test_flush_all_pages() -> Result<()> {
        let bpm = new_bpm(3, 2);

        for i in 0..3u8 {
            let page = bpm.new_page()?;
            let mut guard = page.write()?;
            guard.data.fill(i);
            guard.is_dirty = true;
        }

        bpm.flush_all_pages()?;

        let inner = bpm.inner.lock().unwrap();
        for page in &inner.pages {
            assert!(!page.read().unwrap().is_dirty);
        }

        Ok(())
    }

    #[test]
    fn test_delete_page() -> Result<()> {
        let bpm = new_bpm(3, 2);

        let page0 = bpm.new_page()?;
        let page0_id = page0.read()?.id;

        // pinned pages cannot be deleted
        assert!(!bpm.delete_page(page0_id)?);

        assert!(bpm.unpin_page(page0_id, false)?);
        assert!(bpm.delete_page(page0_id)?);

        // a page that is not resident is already gone
        assert!(bpm.delete_page(page0_id)?);

        let (free, resident, pool_size) = frame_accounting(&bpm);
        assert_eq!(pool_size, free + resident);
        assert_eq!(3, free);

        Ok(())
    }

    #[test]
    fn test_page_ids_are_never_reused() -> Result<()> {
        let bpm = new_bpm(3, 2);

        let page0 = bpm.new_page()?;
        let page0_id = page0.read()?.id;
        assert!(bpm.unpin_page(page0_id, false)?);
        assert!(bpm.delete_page(page0_id)?);

        let page1 = bpm.new_page()?;
        assert!(page1.read()?.id > page0_id);

        Ok(())
    }
}
