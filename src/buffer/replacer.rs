use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::storage::page::FrameId;

/// Logical access time. Timestamps come from a single strictly monotonic
/// counter, no two accesses share one.
type Timestamp = i64;

///  Replacer tracks page usage for replacement in case of buffer pool is full.
pub trait Replacer: Send + Sync {
    /// Record the event that the given frame id is accessed at current timestamp.
    /// Create a new entry for access history if frame id has not been seen before.
    ///
    /// A frame id outside of the replacer capacity is a programming error
    /// and panics.
    fn record_access(&self, frame_id: FrameId);

    /// Find the frame to evict with replace policy(e.g. backward k-distance). Only frames that
    /// are marked as evictable are candidates for eviction.
    ///
    /// Successful eviction of a frame should decrement the size of replacer and remove the frame's
    /// access history.
    ///
    /// Return the frame id if a frame is evicted successfully, None if no frames can be evicted.
    fn evict(&self) -> Option<FrameId>;

    /// Toggle whether a frame is evictable or non-evictable. this function also control replacer
    /// size. Note that size is equal to number of evictable entries.
    ///
    /// If a frame was previously evictable and is to be set to non-evictable, then size should
    /// decrement. If a frame was previously non-evictable and is to be set evictable, then size
    /// should increment. Toggling an untracked frame is a programming
    /// error and panics.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Check if a frame is evictable. if the frame is not found, return true.
    fn is_evictable(&self, frame_id: FrameId) -> bool;

    /// Remove an evictable frame from replacer, along with its access history. This function
    /// should also decrement the replacer size if removal is successful.
    ///
    /// Note that this is different from evicting a frame without check replacer policy.
    ///
    /// If remove is called on a non-evictable frame, that is a programming
    /// error and panics. If the specified frame is not found, do nothing.
    fn remove(&self, frame_id: FrameId);

    /// replacer size, the number of currently evictable frames.
    fn size(&self) -> usize;
}

struct LRUKNode {
    /// history of last seen K timestamps of the given frame.
    /// Least recent timestamp stored in front.
    history: VecDeque<Timestamp>,
    is_evictable: bool,
}

impl LRUKNode {
    /// The frame's current ordering key: the timestamp of its k-th most
    /// recent access, or the seeded pseudo timestamp while the frame has
    /// fewer than k real accesses.
    fn k_distance(&self) -> Timestamp {
        // the history holds at least one entry from the moment the node
        // is created, unwrap here is guaranteed to not panic.
        *self.history.front().unwrap()
    }
}

/// LRUKReplacer implements the LRU-k replacement policy.
///
/// The LRU-k algorithm evicts the frame whose k-th most recent access
/// lies furthest in the past. A frame with fewer than k recorded accesses
/// carries a pseudo access far before any real timestamp, so such frames
/// are preferred victims over any fully-referenced frame, ordered among
/// themselves by their first real access.
pub struct LRUKReplacer {
    k: usize,
    replacer_size: usize,
    current_timestamp: Timestamp,
    current_size: usize,
    nodes: HashMap<FrameId, LRUKNode>,
    /// exactly the evictable frames, keyed by their k-distance timestamp.
    /// eviction pops the minimum.
    lru_index: BTreeMap<Timestamp, FrameId>,
}

impl LRUKReplacer {
    pub fn new(k: usize, size: usize) -> Self {
        assert!(k > 0, "replacer k should be larger than zero");
        LRUKReplacer {
            k,
            replacer_size: size,
            current_timestamp: 0,
            current_size: 0,
            nodes: HashMap::new(),
            lru_index: BTreeMap::new(),
        }
    }

    fn record_access(&mut self, frame_id: FrameId) {
        assert!(frame_id < self.replacer_size, "frame id {} out of range", frame_id);
        let ts = self.current_timestamp;
        self.current_timestamp += 1;

        let k = self.k;
        let node = self.nodes.entry(frame_id).or_insert_with(|| {
            // seed a pseudo access far in the past so frames with fewer
            // than k accesses order before any frame with a full history,
            // oldest first access winning among themselves.
            let mut history = VecDeque::with_capacity(k + 1);
            history.push_back(Timestamp::MIN + ts);
            LRUKNode { history, is_evictable: false }
        });
        node.history.push_back(ts);
        if node.history.len() > k {
            let old = node.history.pop_front().unwrap();
            if node.is_evictable {
                let key = node.k_distance();
                self.lru_index.remove(&old);
                self.lru_index.insert(key, frame_id);
            }
        }
    }

    fn evict(&mut self) -> Option<FrameId> {
        let (_, &frame_id) = self.lru_index.first_key_value()?;
        self.remove_internal(frame_id);
        Some(frame_id)
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let node = self
            .nodes
            .get_mut(&frame_id)
            .unwrap_or_else(|| panic!("set_evictable on untracked frame {}", frame_id));
        if node.is_evictable == evictable {
            return;
        }
        node.is_evictable = evictable;
        let key = node.k_distance();
        if evictable {
            self.lru_index.insert(key, frame_id);
            self.current_size += 1;
        } else {
            self.lru_index.remove(&key);
            self.current_size -= 1;
        }
    }

    fn is_evictable(&self, frame_id: FrameId) -> bool {
        match self.nodes.get(&frame_id) {
            Some(node) => node.is_evictable,
            None => true,
        }
    }

    fn remove(&mut self, frame_id: FrameId) {
        self.remove_internal(frame_id)
    }

    fn remove_internal(&mut self, frame_id: FrameId) {
        let Some(node) = self.nodes.get(&frame_id) else { return };
        assert!(node.is_evictable, "remove on non-evictable frame {}", frame_id);
        let key = node.k_distance();
        self.lru_index.remove(&key);
        self.nodes.remove(&frame_id);
        self.current_size -= 1;
    }

    fn size(&self) -> usize {
        self.current_size
    }
}

/// SyncLRUKReplacer implements the thread-safe version of LRU-k replacement policy,
/// basically all the heavy lifting are happens in the LRUKReplacer.
pub struct SyncLRUKReplacer {
    inner: Mutex<LRUKReplacer>,
}

impl SyncLRUKReplacer {
    pub fn new(k: usize, size: usize) -> Self {
        let inner = Mutex::new(LRUKReplacer::new(k, size));
        SyncLRUKReplacer { inner }
    }
}

impl Replacer for SyncLRUKReplacer {
    fn record_access(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock().unwrap();
        guard.record_access(frame_id)
    }

    fn evict(&self) -> Option<FrameId> {
        let mut guard = self.inner.lock().unwrap();
        guard.evict()
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut guard = self.inner.lock().unwrap();
        guard.set_evictable(frame_id, evictable)
    }

    fn is_evictable(&self, frame_id: FrameId) -> bool {
        let guard = self.inner.lock().unwrap();
        guard.is_evictable(frame_id)
    }

    fn remove(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock().unwrap();
        guard.remove(frame_id)
    }

    fn size(&self) -> usize {
        let guard = self.inner.lock().unwrap();
        guard.size()
    }
}
