use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

fn hash_of<K: Hash>(key: &K) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() as usize
}

/// A bucket holds an unordered collection of key/value pairs whose hashes
/// agree on their low `depth` bits.
struct Bucket<K, V> {
    /// how many low hash bits are significant for routing to this bucket.
    depth: usize,
    items: Vec<(K, V)>,
}

impl<K: Hash + Eq, V> Bucket<K, V> {
    fn new(depth: usize) -> Self {
        Bucket { depth, items: Vec::new() }
    }

    fn find(&self, key: &K) -> Option<&V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn remove(&mut self, key: &K) -> bool {
        match self.items.iter().position(|(k, _)| k == key) {
            Some(i) => {
                self.items.swap_remove(i);
                true
            }
            None => false,
        }
    }
}

/// ExtendibleHashTable maps keys to values with an incrementally growing
/// directory. The directory is indexed by the low `global_depth` bits of
/// the key hash; each slot routes to a bucket bounded by `bucket_size`
/// entries. Overfull buckets split across a new high bit boundary,
/// doubling the directory when the bucket's depth has caught up with the
/// global depth.
///
/// The directory holds indices into a bucket arena rather than shared
/// handles: multiple slots reference the same arena slot whenever the
/// bucket's local depth is below the global depth, and a directory
/// doubling copies indices, not buckets. Buckets are never coalesced, the
/// arena only grows.
pub struct ExtendibleHashTable<K, V> {
    global_depth: usize,
    bucket_size: usize,
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

impl<K: Hash + Eq, V: Clone> ExtendibleHashTable<K, V> {
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size should be larger than zero");
        ExtendibleHashTable {
            global_depth: 0,
            bucket_size,
            dir: vec![0],
            buckets: vec![Bucket::new(0)],
        }
    }

    /// Directory slot for the key: the low global_depth bits of its hash.
    fn index_of(&self, key: &K) -> usize {
        hash_of(key) & ((1 << self.global_depth) - 1)
    }

    /// Look up the value bound to the key, if any.
    pub fn find(&self, key: &K) -> Option<V> {
        let bucket = &self.buckets[self.dir[self.index_of(key)]];
        bucket.find(key).cloned()
    }

    /// Remove any binding for the key, reporting whether one existed.
    pub fn remove(&mut self, key: &K) -> bool {
        let b = self.dir[self.index_of(key)];
        self.buckets[b].remove(key)
    }

    /// Install the binding, overwriting any prior value for the key. The
    /// destination bucket is split until it has room.
    ///
    /// Splitting cannot separate keys that collide on their full low hash
    /// bits: more than bucket_size such keys keep the loop splitting
    /// forever. A known structural limit of extendible hashing, not
    /// defended against here.
    pub fn insert(&mut self, key: K, value: V) {
        loop {
            let b = self.dir[self.index_of(&key)];
            let bucket = &mut self.buckets[b];
            if let Some(item) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                item.1 = value;
                return;
            }
            if bucket.items.len() < self.bucket_size {
                bucket.items.push((key, value));
                return;
            }
            self.split(b);
        }
    }

    /// Split the bucket across a new high bit boundary. After the split
    /// both the bucket and its sibling carry depth + 1, and every
    /// directory slot whose index has the high bit set routes to the
    /// sibling.
    fn split(&mut self, b: usize) {
        let depth = self.buckets[b].depth;
        if depth == self.global_depth {
            // double the directory, new slots mirror the old ones.
            self.dir.extend_from_within(..);
            self.global_depth += 1;
        }

        let high_bit = 1 << depth;
        let items = std::mem::take(&mut self.buckets[b].items);
        // only full buckets split
        assert!(!items.is_empty());
        // all keys of the bucket share the low `depth` hash bits.
        let base = hash_of(&items[0].0) & (high_bit - 1);
        let (high, low): (Vec<_>, Vec<_>) =
            items.into_iter().partition(|(k, _)| hash_of(k) & high_bit != 0);

        self.buckets[b].depth = depth + 1;
        self.buckets[b].items = low;
        let sibling = self.buckets.len();
        self.buckets.push(Bucket { depth: depth + 1, items: high });

        // slots base, base+high_bit, base+2*high_bit, ... referenced the
        // old bucket; every second one of them now routes to the sibling.
        let mut i = base + high_bit;
        while i < self.dir.len() {
            self.dir[i] = sibling;
            i += high_bit << 1;
        }
    }

    pub fn global_depth(&self) -> usize {
        self.global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        self.buckets[self.dir[dir_index]].depth
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }
}

/// SyncExtendibleHashTable is the thread-safe version of the extendible
/// hash table guarded by a single table-wide mutex, basically all the
/// heavy lifting happens in the ExtendibleHashTable.
pub struct SyncExtendibleHashTable<K, V> {
    inner: Mutex<ExtendibleHashTable<K, V>>,
}

impl<K: Hash + Eq, V: Clone> SyncExtendibleHashTable<K, V> {
    pub fn new(bucket_size: usize) -> Self {
        let inner = Mutex::new(ExtendibleHashTable::new(bucket_size));
        SyncExtendibleHashTable { inner }
    }

    /// Look up the value bound to the key, if any.
    pub fn find(&self, key: &K) -> Option<V> {
        let guard = self.inner.lock().unwrap();
        guard.find(key)
    }

    /// Install the binding, overwriting any prior value for the key.
    pub fn insert(&self, key: K, value: V) {
        let mut guard = self.inner.lock().unwrap();
        guard.insert(key, value)
    }

    /// Remove any binding for the key, reporting whether one existed.
    pub fn remove(&self, key: &K) -> bool {
        let mut guard = self.inner.lock().unwrap();
        guard.remove(key)
    }

    /// Snapshot of the global depth.
    pub fn global_depth(&self) -> usize {
        let guard = self.inner.lock().unwrap();
        guard.global_depth()
    }

    /// Snapshot of the local depth of the bucket the directory slot
    /// routes to.
    pub fn local_depth(&self, dir_index: usize) -> usize {
        let guard = self.inner.lock().unwrap();
        guard.local_depth(dir_index)
    }

    /// Snapshot of the bucket count.
    pub fn num_buckets(&self) -> usize {
        let guard = self.inner.lock().unwrap();
        guard.num_buckets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    /// Scan upward from `start` for a key whose hash has `want` in its
    /// low `mask` bits. DefaultHasher is deterministic within a build,
    /// so the scan is cheap and stable for a test run.
    fn key_with_low_bits(start: i64, mask: usize, want: usize) -> i64 {
        (start..).find(|k| hash_of(k) & mask == want).unwrap()
    }

    #[test]
    fn test_insert_find_remove() -> Result<()> {
        let mut table = ExtendibleHashTable::new(4);

        assert_eq!(None, table.find(&1));

        table.insert(1, "a");
        table.insert(2, "b");
        assert_eq!(Some("a"), table.find(&1));
        assert_eq!(Some("b"), table.find(&2));

        // overwrite keeps a single binding
        table.insert(1, "c");
        assert_eq!(Some("c"), table.find(&1));

        assert!(table.remove(&1));
        assert!(!table.remove(&1));
        assert_eq!(None, table.find(&1));
        assert_eq!(Some("b"), table.find(&2));

        Ok(())
    }

    #[test]
    fn test_split_scenario() -> Result<()> {
        // three entries, two of them sharing the low two hash bits 00 and
        // one with 10. with bucket_size=2 the third insert forces the
        // directory from size 1 to 4: the first split by bit 0 cannot
        // separate the keys, the second split by bit 1 does.
        let k1 = key_with_low_bits(0, 0b11, 0b00);
        let k2 = key_with_low_bits(k1 + 1, 0b11, 0b00);
        let k3 = key_with_low_bits(0, 0b11, 0b10);

        let mut table = ExtendibleHashTable::new(2);
        assert_eq!(0, table.global_depth());
        assert_eq!(1, table.num_buckets());

        table.insert(k1, 1);
        table.insert(k2, 2);
        assert_eq!(0, table.global_depth());

        table.insert(k3, 3);
        assert_eq!(2, table.global_depth());
        assert_eq!(3, table.num_buckets());
        assert_eq!(Some(1), table.find(&k1));
        assert_eq!(Some(2), table.find(&k2));
        assert_eq!(Some(3), table.find(&k3));

        // slots 0 and 2 route by two bits now, slots 1 and 3 still share
        // the depth-1 sibling of the first split.
        assert_eq!(2, table.local_depth(0));
        assert_eq!(2, table.local_depth(2));
        assert_eq!(1, table.local_depth(1));
        assert_eq!(1, table.local_depth(3));

        Ok(())
    }

    #[test]
    fn test_directory_invariants_under_growth() -> Result<()> {
        let mut table = ExtendibleHashTable::new(4);
        for k in 0..256i64 {
            table.insert(k, k * 10);
        }

        assert_eq!(1 << table.global_depth, table.dir.len());
        for (i, &b) in table.dir.iter().enumerate() {
            let bucket = &table.buckets[b];
            assert!(bucket.depth <= table.global_depth);
            assert!(bucket.items.len() <= table.bucket_size);

            let mask = (1 << bucket.depth) - 1;
            // every key in the bucket agrees with the slot on the low
            // local-depth bits
            for (k, _) in &bucket.items {
                assert_eq!(i & mask, hash_of(k) & mask);
            }
            // exactly 2^(global-local) slots reference the bucket
            let refs = table.dir.iter().filter(|&&x| x == b).count();
            assert_eq!(1 << (table.global_depth - bucket.depth), refs);
        }

        for k in 0..256i64 {
            assert_eq!(Some(k * 10), table.find(&k));
        }
        for k in (0..256i64).step_by(2) {
            assert!(table.remove(&k));
        }
        for k in 0..256i64 {
            let want = if k % 2 == 0 { None } else { Some(k * 10) };
            assert_eq!(want, table.find(&k));
        }

        Ok(())
    }

    #[test]
    fn test_sync_table_shared_across_threads() -> Result<()> {
        use std::sync::Arc;

        let table = Arc::new(SyncExtendibleHashTable::new(4));
        let mut handles = vec![];
        for t in 0..4i64 {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                for k in (t * 100)..(t * 100 + 100) {
                    table.insert(k, k + 1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        for k in 0..400i64 {
            assert_eq!(Some(k + 1), table.find(&k));
        }

        Ok(())
    }
}
