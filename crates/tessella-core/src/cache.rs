//! Page Cache Management
//!
//! CPU-side bookkeeping for the fixed grid of physical page slots:
//! - Sparse per-level page tree tracking the state of every virtual page
//! - Fixed pool of 256 cache entries linked into a strict LRU chain
//! - Per-frame request statistics for diagnostics
//!
//! In-flight pages are tracked in the tree only; they consume no physical
//! slot until their load completes and the page is accommodated. Together
//! with the provider's outstanding-request bound this is what throttles an
//! overloaded system.

use crate::page_id::{CachePageCoord, PageId};
use crate::page_table::{TABLE_SIZE_IN_PAGES, TOTAL_TABLE_PAGES};
use crate::MAX_MIP_LEVELS;

/// Index of a cache entry in the fixed pool.
type EntryIndex = u16;

/// Link value meaning "end of chain".
const NO_ENTRY: EntryIndex = EntryIndex::MAX;

/// State of one virtual page in the cache page tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageSlot {
    /// Not cached, no load requested.
    #[default]
    Empty,
    /// A load was requested and has not completed yet.
    InFlight,
    /// Resident in the pool entry with this index.
    Resident(u16),
}

/// Result of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePageStatus {
    /// Page is in cache and ready to go.
    Cached,
    /// Page request still pending completion.
    InFlight,
    /// Not in cache; the caller must fire a load request.
    Unavailable,
}

/// One physical slot of the page cache.
///
/// Entries live for the process lifetime; `cache_coord` is fixed at
/// construction and never changes.
#[derive(Debug, Clone, Copy)]
pub struct CacheEntry {
    page_id: PageId,
    cache_coord: CachePageCoord,
    prev: EntryIndex,
    next: EntryIndex,
}

impl CacheEntry {
    /// The page currently resident in this slot, or the invalid sentinel.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Fixed position of this slot in the cache texture.
    pub fn cache_coord(&self) -> CachePageCoord {
        self.cache_coord
    }
}

/// Sparse per-texture index from (level, x, y) to cache slot state.
///
/// All mip levels share one flattened slot vector with per-level base
/// offsets. The tree references pool entries by index and owns none of them.
pub struct CachePageTree {
    num_levels: usize,
    offsets: [usize; MAX_MIP_LEVELS],
    num_pages_x: [u32; MAX_MIP_LEVELS],
    num_pages_y: [u32; MAX_MIP_LEVELS],
    slots: Vec<PageSlot>,
}

impl CachePageTree {
    /// Build a tree for the given per-level page counts, finest level first.
    pub fn new(pages_x: &[u32], pages_y: &[u32]) -> Self {
        let num_levels = pages_x.len();
        assert!(num_levels > 0 && num_levels <= MAX_MIP_LEVELS);
        assert_eq!(pages_x.len(), pages_y.len());

        let mut offsets = [0usize; MAX_MIP_LEVELS];
        let mut num_pages_x = [0u32; MAX_MIP_LEVELS];
        let mut num_pages_y = [0u32; MAX_MIP_LEVELS];

        let mut total = 0usize;
        for level in 0..num_levels {
            assert!(pages_x[level] > 0 && pages_y[level] > 0);
            offsets[level] = total;
            num_pages_x[level] = pages_x[level];
            num_pages_y[level] = pages_y[level];
            total += (pages_x[level] * pages_y[level]) as usize;
        }

        log::info!("New cache page tree created with a total of {} entries", total);

        Self {
            num_levels,
            offsets,
            num_pages_x,
            num_pages_y,
            slots: vec![PageSlot::Empty; total],
        }
    }

    /// Reset every slot to `Empty`.
    pub fn clear(&mut self) {
        self.slots.fill(PageSlot::Empty);
    }

    /// Slot state at (level, x, y). Out-of-range coordinates are a
    /// programmer error.
    pub fn get(&self, level: u32, x: u32, y: u32) -> PageSlot {
        self.slots[self.index_of(level, x, y)]
    }

    /// Store a slot state at (level, x, y).
    pub fn set(&mut self, level: u32, x: u32, y: u32, slot: PageSlot) {
        let index = self.index_of(level, x, y);
        self.slots[index] = slot;
    }

    /// Number of mip levels tracked.
    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    /// Pages along X at `level`.
    pub fn num_pages_x(&self, level: usize) -> u32 {
        self.num_pages_x[level]
    }

    /// Pages along Y at `level`.
    pub fn num_pages_y(&self, level: usize) -> u32 {
        self.num_pages_y[level]
    }

    /// Total slot count over all levels.
    pub fn total_slots(&self) -> usize {
        self.slots.len()
    }

    /// Every slot state, level 0 first.
    pub fn slots(&self) -> &[PageSlot] {
        &self.slots
    }

    fn index_of(&self, level: u32, x: u32, y: u32) -> usize {
        let level = level as usize;
        assert!(level < self.num_levels);
        assert!(x < self.num_pages_x[level] && y < self.num_pages_y[level]);
        self.offsets[level] + (x + y * self.num_pages_x[level]) as usize
    }
}

/// Per-frame request counters for the cache manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    /// Loads accommodated into a slot.
    pub serviced_requests: u32,
    /// Lookups that started a new load this frame.
    pub new_frame_requests: u32,
    /// Requests refused by the provider and rolled back.
    pub dropped_requests: u32,
    /// Lookups that found the page still in flight.
    pub re_frame_requests: u32,
    /// Every lookup.
    pub total_frame_requests: u32,
    /// Lookups that hit a resident page.
    pub hit_frame_requests: u32,
}

/// The page cache manager: a fixed pool of physical slots with strict LRU
/// replacement, keyed by logical page id through the cache page tree.
pub struct PageCacheMgr {
    stats: CacheStats,
    mru: EntryIndex,
    lru: EntryIndex,
    tree: CachePageTree,
    entries: Vec<CacheEntry>,
}

impl PageCacheMgr {
    /// Width and height of the cache, in pages.
    pub const CACHE_SIZE_IN_PAGES: usize = TABLE_SIZE_IN_PAGES;

    /// Total physical slots.
    pub const TOTAL_CACHE_PAGES: usize = TOTAL_TABLE_PAGES;

    /// Build a cache manager for the given per-level page counts.
    pub fn new(pages_x: &[u32], pages_y: &[u32]) -> Self {
        let tree = CachePageTree::new(pages_x, pages_y);

        let mut entries = vec![
            CacheEntry {
                page_id: PageId::INVALID,
                cache_coord: CachePageCoord::default(),
                prev: NO_ENTRY,
                next: NO_ENTRY,
            };
            Self::TOTAL_CACHE_PAGES
        ];
        for y in 0..Self::CACHE_SIZE_IN_PAGES {
            for x in 0..Self::CACHE_SIZE_IN_PAGES {
                entries[x + y * Self::CACHE_SIZE_IN_PAGES].cache_coord = CachePageCoord {
                    x: x as u8,
                    y: y as u8,
                };
            }
        }

        let mut mgr = Self {
            stats: CacheStats::default(),
            mru: NO_ENTRY,
            lru: NO_ENTRY,
            tree,
            entries,
        };
        mgr.purge_cache();

        log::info!(
            "New page cache manager created, cache size {}x{} pages",
            Self::CACHE_SIZE_IN_PAGES,
            Self::CACHE_SIZE_IN_PAGES
        );
        mgr
    }

    /// Look up a page, marking it in flight if it is absent and promoting it
    /// to most-recently-used if it is resident.
    ///
    /// On `Unavailable` the caller must fire a load request (or call
    /// [`PageCacheMgr::notify_dropped_request`] if the provider refuses).
    pub fn lookup_page(&mut self, id: PageId) -> CachePageStatus {
        let (level, x, y) = (id.mip_level(), id.page_x(), id.page_y());
        debug_assert!(self.valid_page_request(level, x, y), "unsanitized page id: {}", id);

        self.stats.total_frame_requests += 1;

        match self.tree.get(level, x, y) {
            PageSlot::Empty => {
                // Not in cache; mark the request and tell the caller to load.
                self.tree.set(level, x, y, PageSlot::InFlight);
                self.stats.new_frame_requests += 1;
                CachePageStatus::Unavailable
            }
            PageSlot::InFlight => {
                // Still waiting for the load; a coarser mip covers for now.
                self.stats.re_frame_requests += 1;
                CachePageStatus::InFlight
            }
            PageSlot::Resident(entry) => {
                self.stats.hit_frame_requests += 1;
                self.touch(entry);
                CachePageStatus::Cached
            }
        }
    }

    /// True while a previously requested page is still wanted. Workers call
    /// this before their completion is applied, to catch purges.
    pub fn still_want_page(&self, id: PageId) -> bool {
        let (level, x, y) = (id.mip_level(), id.page_x(), id.page_y());
        debug_assert!(self.valid_page_request(level, x, y));
        self.tree.get(level, x, y) == PageSlot::InFlight
    }

    /// Accommodate a freshly loaded page, recycling the least-recently-used
    /// slot. Returns the physical coordinate the payload must be uploaded to.
    pub fn accommodate_page(&mut self, id: PageId) -> CachePageCoord {
        let (level, x, y) = (id.mip_level(), id.page_x(), id.page_y());
        debug_assert!(self.valid_page_request(level, x, y));

        let index = self.alloc_page_entry();
        self.tree.set(level, x, y, PageSlot::Resident(index));
        self.entries[index as usize].page_id = id;

        self.stats.serviced_requests += 1;
        self.entries[index as usize].cache_coord
    }

    /// Roll an in-flight marker back to empty after the provider refused the
    /// request.
    pub fn notify_dropped_request(&mut self, id: PageId) {
        let (level, x, y) = (id.mip_level(), id.page_x(), id.page_y());
        debug_assert!(self.valid_page_request(level, x, y));
        debug_assert_eq!(self.tree.get(level, x, y), PageSlot::InFlight);

        self.tree.set(level, x, y, PageSlot::Empty);
        self.stats.dropped_requests += 1;
    }

    /// Drop every page: clear the tree, invalidate all entries and relink the
    /// pool into one fresh MRU-to-LRU chain. Idempotent.
    pub fn purge_cache(&mut self) {
        self.stats = CacheStats::default();
        self.tree.clear();

        // Chain the pool so that the first row-major entry is handed out
        // first (it becomes the LRU tail).
        let total = self.entries.len();
        for i in 0..total {
            let entry = &mut self.entries[i];
            entry.page_id = PageId::INVALID;
            entry.next = if i > 0 { (i - 1) as EntryIndex } else { NO_ENTRY };
            entry.prev = if i < total - 1 { (i + 1) as EntryIndex } else { NO_ENTRY };
        }
        self.mru = (total - 1) as EntryIndex;
        self.lru = 0;
    }

    /// Clamp an out-of-range page id to the nearest valid page, preserving
    /// the texture index. Feedback pixels occasionally arrive out of range
    /// and are clamped rather than rejected.
    pub fn sanitize_page_id(&self, id: PageId) -> PageId {
        let mut level = id.mip_level();
        let mut x = id.page_x();
        let mut y = id.page_y();

        if level as usize >= self.tree.num_levels() {
            level = self.tree.num_levels() as u32 - 1;
        }
        if x >= self.tree.num_pages_x(level as usize) {
            x = self.tree.num_pages_x(level as usize) - 1;
        }
        if y >= self.tree.num_pages_y(level as usize) {
            y = self.tree.num_pages_y(level as usize) - 1;
        }

        PageId::new(x, y, level, id.texture_index())
    }

    /// The full entry pool, used by indirection table updates.
    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    /// The cache page tree, for inspection.
    pub fn tree(&self) -> &CachePageTree {
        &self.tree
    }

    /// Current frame request counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Reset the frame counters; call at the end of a frame.
    pub fn clear_stats(&mut self) {
        self.stats = CacheStats::default();
    }

    /// Splice an entry to the head of the MRU chain.
    fn touch(&mut self, index: EntryIndex) {
        if index == self.mru {
            return;
        }

        let entry = self.entries[index as usize];
        if entry.next != NO_ENTRY {
            // Unlink from the middle of the chain.
            self.entries[entry.prev as usize].next = entry.next;
            self.entries[entry.next as usize].prev = entry.prev;
        } else {
            // This was the LRU tail.
            debug_assert_eq!(index, self.lru);
            self.entries[entry.prev as usize].next = NO_ENTRY;
            self.lru = entry.prev;
        }

        let old_mru = self.mru;
        self.entries[index as usize].prev = NO_ENTRY;
        self.entries[index as usize].next = old_mru;
        self.entries[old_mru as usize].prev = index;
        self.mru = index;
    }

    /// Recycle the LRU tail, evicting whatever page it held.
    fn alloc_page_entry(&mut self) -> EntryIndex {
        let index = self.lru;

        let old_id = self.entries[index as usize].page_id;
        if old_id.is_valid() {
            // Evict: the old page becomes unavailable again.
            self.tree.set(old_id.mip_level(), old_id.page_x(), old_id.page_y(), PageSlot::Empty);
        }

        let prev = self.entries[index as usize].prev;
        self.entries[prev as usize].next = NO_ENTRY;
        self.lru = prev;

        let old_mru = self.mru;
        self.entries[index as usize].prev = NO_ENTRY;
        self.entries[index as usize].next = old_mru;
        self.entries[old_mru as usize].prev = index;
        self.mru = index;

        index
    }

    fn valid_page_request(&self, level: u32, x: u32, y: u32) -> bool {
        (level as usize) < self.tree.num_levels()
            && x < self.tree.num_pages_x(level as usize)
            && y < self.tree.num_pages_y(level as usize)
    }
}
