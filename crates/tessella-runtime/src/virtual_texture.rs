//! Virtual Textures
//!
//! The per-texture façade: one or more page files (diffuse, normal,
//! specular and friends) with identical layouts, one physical page table
//! per file, one page cache and an indirection table that may be shared
//! with a sibling texture of the same dimensions. `frame_update` applies
//! the completions the provider drained this frame and rebuilds the
//! indirection table.

use std::sync::Arc;

use glam::Vec2;
use parking_lot::RwLock;
use serde::Deserialize;
use smallvec::SmallVec;
use thiserror::Error;

use tessella_core::cache::PageCacheMgr;
use tessella_core::indirection::PageIndirectionTable;
use tessella_core::page_table::{PageTable, PAGE_SIZE_IN_PIXELS, TOTAL_TABLE_PAGES};
use tessella_core::InitError;
use tessella_io::page_file::PageFile;

use crate::provider::FulfilledPageRequestQueue;

/// An indirection table shared between virtual textures of identical
/// layout.
pub type SharedIndirectionTable = Arc<RwLock<PageIndirectionTable>>;

/// Virtual texture construction errors.
#[derive(Error, Debug)]
pub enum VirtualTextureError {
    #[error("a virtual texture needs at least one page file")]
    NoPageFiles,

    #[error("page file {index} reports different dimensions than page file 0")]
    MismatchedPageFiles { index: usize },

    #[error(transparent)]
    Init(#[from] InitError),
}

/// Per-texture behavior switches.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VirtualTextureOptions {
    /// Repaint every cache slot with a gradient when the cache is purged.
    pub debug_fill_on_purge: bool,
}

/// A logical texture far larger than the physical cache, streamed page by
/// page.
pub struct VirtualTexture {
    page_files: SmallVec<[Arc<dyn PageFile>; 4]>,
    page_tables: SmallVec<[PageTable; 4]>,
    indirection_table: SharedIndirectionTable,
    page_cache: PageCacheMgr,
    texture_index: i32,
    num_levels: usize,
    level0_size_pixels: Vec2,
    level0_size_pages: Vec2,
    num_page_uploads: u64,
    num_indirection_table_updates: u64,
    options: VirtualTextureOptions,
}

impl VirtualTexture {
    /// A texture over a single page file with its own indirection table and
    /// default options.
    pub fn new(page_file: Arc<dyn PageFile>) -> Result<Self, VirtualTextureError> {
        Self::with_options(vec![page_file], None, VirtualTextureOptions::default())
    }

    /// A texture over several page files. All files must report identical
    /// per-level dimensions; sub-texture payloads are co-located in the
    /// cache slot of their level-0 sibling. Pass a shared indirection table
    /// to alias the translation with another texture of the same layout.
    pub fn with_options(
        page_files: Vec<Arc<dyn PageFile>>,
        shared_indirection: Option<SharedIndirectionTable>,
        options: VirtualTextureOptions,
    ) -> Result<Self, VirtualTextureError> {
        let first = page_files.first().ok_or(VirtualTextureError::NoPageFiles)?;
        let pages_x = first.num_pages_x().to_vec();
        let pages_y = first.num_pages_y().to_vec();
        let num_levels = first.num_levels();

        for (index, file) in page_files.iter().enumerate().skip(1) {
            if file.num_pages_x() != pages_x.as_slice() || file.num_pages_y() != pages_y.as_slice() {
                return Err(VirtualTextureError::MismatchedPageFiles { index });
            }
        }

        let page_tables = page_files.iter().map(|_| PageTable::new()).collect();
        let indirection_table = match shared_indirection {
            Some(table) => table,
            None => Arc::new(RwLock::new(PageIndirectionTable::new(&pages_x, &pages_y)?)),
        };
        let page_cache = PageCacheMgr::new(&pages_x, &pages_y);

        Ok(Self {
            page_files: page_files.into_iter().collect(),
            page_tables,
            indirection_table,
            page_cache,
            texture_index: -1,
            num_levels,
            level0_size_pixels: Vec2::new(
                (pages_x[0] as usize * PAGE_SIZE_IN_PIXELS) as f32,
                (pages_y[0] as usize * PAGE_SIZE_IN_PIXELS) as f32,
            ),
            level0_size_pages: Vec2::new(pages_x[0] as f32, pages_y[0] as f32),
            num_page_uploads: 0,
            num_indirection_table_updates: 0,
            options,
        })
    }

    /// Apply this frame's completed loads: upload still-wanted payloads into
    /// cache slots and co-locate sub-texture payloads, then rebuild the
    /// indirection table.
    pub fn frame_update(&mut self, completed: &FulfilledPageRequestQueue, update_indirection_table: bool) {
        debug_assert!(self.texture_index >= 0, "virtual texture was never registered");

        if completed.is_empty() {
            // No fulfilled requests ready for upload this frame.
            return;
        }

        for request in completed {
            if request.page_id.texture_index() as i32 != self.texture_index
                || request.file_id != 0
                || !self.page_cache.still_want_page(request.page_id)
            {
                // Someone else's packet, a sub-texture payload handled
                // below, or a completion gone stale (purged meanwhile).
                continue;
            }

            let coord = self.page_cache.accommodate_page(request.page_id);
            self.page_tables[0].upload_page(coord, &request.data);
            self.num_page_uploads += 1;

            // Sub-texture payloads of the same page land in the same slot so
            // a single indirection lookup serves every map.
            for file_id in 1..self.page_tables.len() {
                for sub_request in completed {
                    if sub_request.page_id != request.page_id || sub_request.file_id != file_id as u32 {
                        continue;
                    }
                    self.page_tables[file_id].upload_page(coord, &sub_request.data);
                    self.num_page_uploads += 1;
                }
            }
        }

        if update_indirection_table {
            self.indirection_table.write().update(self.page_cache.entries());
            self.num_indirection_table_updates += 1;
        }
    }

    /// Drop every cached page and rebuild the indirection table. With
    /// `debug_fill_on_purge` set, the page tables are repainted with the
    /// debug gradient as well.
    pub fn purge_cache(&mut self) {
        log::info!("Purging page cache for virtual texture #{}", self.texture_index);

        self.page_cache.purge_cache();

        if self.options.debug_fill_on_purge {
            for table in &mut self.page_tables {
                table.fill_with_debug_data();
                self.num_page_uploads += TOTAL_TABLE_PAGES as u64;
            }
        }

        self.indirection_table.write().update(self.page_cache.entries());
        self.num_indirection_table_updates += 1;
    }

    /// Hot-swap the backing store at `index`, returning the old one. The
    /// caller is expected to purge the cache afterwards.
    pub fn replace_page_file(&mut self, mut new_file: Arc<dyn PageFile>, index: usize) -> Arc<dyn PageFile> {
        std::mem::swap(&mut self.page_files[index], &mut new_file);
        new_file
    }

    /// The page cache manager.
    pub fn cache(&self) -> &PageCacheMgr {
        &self.page_cache
    }

    /// Mutable page cache access for the resolver.
    pub fn cache_mut(&mut self) -> &mut PageCacheMgr {
        &mut self.page_cache
    }

    /// The physical page table backing page file `index`.
    pub fn page_table(&self, index: usize) -> &PageTable {
        &self.page_tables[index]
    }

    /// The indirection table (possibly shared with a sibling texture).
    pub fn indirection_table(&self) -> &SharedIndirectionTable {
        &self.indirection_table
    }

    /// Number of page files (and page tables) of this texture.
    pub fn num_page_files(&self) -> usize {
        self.page_files.len()
    }

    /// Number of mip levels.
    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    /// The stable index assigned at registration, -1 before that.
    pub fn texture_index(&self) -> i32 {
        self.texture_index
    }

    /// Level-0 size in pixels.
    pub fn level0_size_in_pixels(&self) -> Vec2 {
        self.level0_size_pixels
    }

    /// Level-0 size in pages.
    pub fn level0_size_in_pages(&self) -> Vec2 {
        self.level0_size_pages
    }

    /// Pages uploaded into the tables since construction.
    pub fn num_page_uploads(&self) -> u64 {
        self.num_page_uploads
    }

    /// Indirection rebuilds since construction.
    pub fn num_indirection_table_updates(&self) -> u64 {
        self.num_indirection_table_updates
    }

    /// Reset the cache frame counters; call at the end of a frame.
    pub fn clear_stats(&mut self) {
        self.page_cache.clear_stats();
    }

    pub(crate) fn page_files(&self) -> &[Arc<dyn PageFile>] {
        &self.page_files
    }

    pub(crate) fn set_texture_index(&mut self, index: i32) {
        self.texture_index = index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::{Condvar, Mutex};
    use tessella_core::cache::CachePageStatus;
    use tessella_core::job::JobSystem;
    use tessella_core::page_id::{CachePageCoord, PageId};
    use tessella_core::IndirectionTableFormat;
    use tessella_io::page_file::{DebugPageFile, PageRequestPacket};

    use crate::provider::{FulfilledPageRequestQueue, PageProvider, MAX_OUTSTANDING_PAGE_REQUESTS};
    use crate::resolver::PageResolver;

    fn init_library() {
        let _ = tessella_core::init(IndirectionTableFormat::Rgba8888);
    }

    /// A page file whose loads block until the gate opens, keeping requests
    /// outstanding for as long as a test needs.
    struct GatedPageFile {
        inner: DebugPageFile,
        gate: Arc<(Mutex<bool>, Condvar)>,
    }

    impl GatedPageFile {
        fn new(level0_pages_x: u32, level0_pages_y: u32) -> (Self, Arc<(Mutex<bool>, Condvar)>) {
            let gate = Arc::new((Mutex::new(false), Condvar::new()));
            (
                Self {
                    inner: DebugPageFile::new(level0_pages_x, level0_pages_y),
                    gate: gate.clone(),
                },
                gate,
            )
        }

        fn open(gate: &Arc<(Mutex<bool>, Condvar)>) {
            let (lock, condvar) = &**gate;
            *lock.lock() = true;
            condvar.notify_all();
        }
    }

    impl PageFile for GatedPageFile {
        fn load_page(&self, id: PageId, packet: &mut PageRequestPacket) {
            let (lock, condvar) = &*self.gate;
            let mut open = lock.lock();
            while !*open {
                condvar.wait(&mut open);
            }
            drop(open);
            self.inner.load_page(id, packet);
        }

        fn num_pages_x(&self) -> &[u32] {
            self.inner.num_pages_x()
        }

        fn num_pages_y(&self) -> &[u32] {
            self.inner.num_pages_y()
        }
    }

    fn debug_texture(level0_pages: u32) -> VirtualTexture {
        init_library();
        VirtualTexture::new(Arc::new(DebugPageFile::new(level0_pages, level0_pages))).unwrap()
    }

    fn register(
        texture: &mut VirtualTexture,
        resolver: &mut PageResolver,
        provider: &mut PageProvider,
    ) {
        resolver.register_virtual_texture(texture);
        provider.register_virtual_texture(texture);
    }

    #[test]
    fn test_construction_validates_dimensions() {
        init_library();

        let a: Arc<dyn PageFile> = Arc::new(DebugPageFile::new(16, 16));
        let b: Arc<dyn PageFile> = Arc::new(DebugPageFile::new(8, 8));
        let result = VirtualTexture::with_options(vec![a, b], None, VirtualTextureOptions::default());
        assert!(matches!(
            result,
            Err(VirtualTextureError::MismatchedPageFiles { index: 1 })
        ));

        assert!(matches!(
            VirtualTexture::with_options(Vec::new(), None, VirtualTextureOptions::default()),
            Err(VirtualTextureError::NoPageFiles)
        ));

        let texture = debug_texture(16);
        assert_eq!(texture.num_levels(), 5);
        assert_eq!(texture.level0_size_in_pages(), Vec2::new(16.0, 16.0));
        assert_eq!(texture.level0_size_in_pixels(), Vec2::new(2048.0, 2048.0));
        assert_eq!(texture.texture_index(), -1);
    }

    /// Cold start: a single visible page streams in and every table agrees.
    #[test]
    fn test_cold_start_single_page() {
        let mut texture = debug_texture(16);
        let jobs = Arc::new(JobSystem::new(2));
        let mut provider = PageProvider::new(jobs.clone(), true);
        let mut resolver = PageResolver::with_dimensions(4, 4, 16);
        register(&mut texture, &mut resolver, &mut provider);

        let mut textures = [texture];
        let wanted = PageId::new(3, 5, 0, 0);

        resolver.begin_page_id_pass();
        resolver.feedback_mut().set(0, 0, wanted);
        resolver.end_page_id_pass(&mut textures, &provider);

        // The request is now tracked by the cache.
        assert_eq!(resolver.visible_pages(), 1);
        assert!(textures[0].cache().still_want_page(wanted));

        jobs.wait_idle();
        assert_eq!(provider.outstanding_requests(), 0);

        let mut completed = FulfilledPageRequestQueue::new();
        assert_eq!(provider.take_ready_queue(&mut completed), 1);
        assert_eq!(completed[0].page_id, wanted);

        textures[0].frame_update(&completed, true);

        let texture = &mut textures[0];
        assert_eq!(texture.num_page_uploads(), 1);
        assert_eq!(texture.cache_mut().lookup_page(wanted), CachePageStatus::Cached);

        // First allocation lands in the first row-major slot.
        let coord = CachePageCoord { x: 0, y: 0 };
        let indirection = texture.indirection_table().read();
        assert_eq!(indirection.cache_coord_at(0, 3, 5), coord);

        // Coarser levels were upsampled consistently: the propagated cells
        // agree level by level.
        for level in 1..indirection.num_levels() {
            assert_eq!(
                indirection.cache_coord_at(level - 1, 3 >> (level - 1), 5 >> (level - 1)),
                indirection.cache_coord_at(level, 3 >> level, 5 >> level)
            );
        }
    }

    /// Oversubscription: more visible pages than physical slots throttles
    /// the frame budget, and refused requests roll their markers back.
    #[test]
    fn test_overload_clamps_and_drops() {
        init_library();
        let (gated, gate) = GatedPageFile::new(32, 32);
        let mut texture = VirtualTexture::new(Arc::new(gated)).unwrap();

        let jobs = Arc::new(JobSystem::new(2));
        let mut provider = PageProvider::new(jobs.clone(), true);
        // 300-pixel feedback target.
        let mut resolver = PageResolver::with_dimensions(20, 15, 300);
        register(&mut texture, &mut resolver, &mut provider);
        let mut textures = [texture];

        // Frame 1: 256 level-0 pages fill the whole outstanding budget; the
        // gate keeps every load blocked on the workers.
        resolver.begin_page_id_pass();
        for i in 0..256usize {
            let id = PageId::new((i % 32) as u32, (i / 32) as u32, 0, 0);
            resolver.feedback_mut().set(i % 20, i / 20, id);
        }
        resolver.end_page_id_pass(&mut textures, &provider);

        assert_eq!(resolver.visible_pages(), 256);
        assert_eq!(resolver.max_page_requests_per_frame(), 256);
        assert_eq!(provider.outstanding_requests(), MAX_OUTSTANDING_PAGE_REQUESTS);

        // Frame 2: the same 256 pages plus 44 coarser ones; 300 visible in
        // total. The coarser pages sort first, the provider is saturated, so
        // every one of them is refused and rolled back.
        resolver.begin_page_id_pass();
        for i in 0..256usize {
            let id = PageId::new((i % 32) as u32, (i / 32) as u32, 0, 0);
            resolver.feedback_mut().set(i % 20, i / 20, id);
        }
        for i in 0..44usize {
            let id = PageId::new((i % 16) as u32, (i / 16) as u32, 1, 0);
            resolver.feedback_mut().set((256 + i) % 20, (256 + i) / 20, id);
        }
        resolver.end_page_id_pass(&mut textures, &provider);

        assert_eq!(resolver.visible_pages(), 300);
        assert_eq!(resolver.max_page_requests_per_frame(), 256);
        assert_eq!(textures[0].cache().stats().dropped_requests, 44);
        for i in 0..44usize {
            let id = PageId::new((i % 16) as u32, (i / 16) as u32, 1, 0);
            assert!(!textures[0].cache().still_want_page(id));
        }

        // Drain everything and apply: the cache ends up fully populated.
        GatedPageFile::open(&gate);
        jobs.wait_idle();
        assert_eq!(provider.outstanding_requests(), 0);

        let mut completed = FulfilledPageRequestQueue::new();
        assert_eq!(provider.take_ready_queue(&mut completed), 256);
        textures[0].frame_update(&completed, true);

        assert_eq!(textures[0].num_page_uploads(), 256);
        let texture = &mut textures[0];
        for i in 0..256usize {
            let id = PageId::new((i % 32) as u32, (i / 32) as u32, 0, 0);
            assert_eq!(texture.cache_mut().lookup_page(id), CachePageStatus::Cached);
        }
    }

    /// A completion that arrives after a purge is silently skipped.
    #[test]
    fn test_stale_completion_is_skipped() {
        let mut texture = debug_texture(16);
        let jobs = Arc::new(JobSystem::new(1));
        let mut provider = PageProvider::new(jobs, false);
        let mut resolver = PageResolver::with_dimensions(4, 4, 16);
        register(&mut texture, &mut resolver, &mut provider);
        let mut textures = [texture];

        let wanted = PageId::new(2, 2, 0, 0);
        resolver.begin_page_id_pass();
        resolver.feedback_mut().set(0, 0, wanted);
        resolver.end_page_id_pass(&mut textures, &provider);

        let mut completed = FulfilledPageRequestQueue::new();
        assert_eq!(provider.take_ready_queue(&mut completed), 1);

        // Purge before the payload is applied; the request is now stale.
        textures[0].purge_cache();
        assert!(!textures[0].cache().still_want_page(wanted));

        let uploads_before = textures[0].num_page_uploads();
        textures[0].frame_update(&completed, true);
        assert_eq!(textures[0].num_page_uploads(), uploads_before);
        assert_eq!(
            textures[0].cache_mut().lookup_page(wanted),
            CachePageStatus::Unavailable
        );
    }

    /// Sub-texture payloads land in the slot picked for file 0, whatever
    /// order their completions arrive in.
    #[test]
    fn test_multi_subtexture_coherence() {
        init_library();
        let files: Vec<Arc<dyn PageFile>> = (0..3).map(|_| Arc::new(DebugPageFile::new(16, 16)) as _).collect();
        let mut texture =
            VirtualTexture::with_options(files, None, VirtualTextureOptions::default()).unwrap();

        let jobs = Arc::new(JobSystem::new(1));
        let mut provider = PageProvider::new(jobs, false);
        let mut resolver = PageResolver::with_dimensions(4, 4, 16);
        register(&mut texture, &mut resolver, &mut provider);
        let mut textures = [texture];

        let wanted = PageId::new(2, 2, 1, 0);
        resolver.begin_page_id_pass();
        resolver.feedback_mut().set(1, 1, wanted);
        resolver.end_page_id_pass(&mut textures, &provider);

        let mut completed = FulfilledPageRequestQueue::new();
        assert_eq!(provider.take_ready_queue(&mut completed), 3);

        // Completions arrive in arbitrary order; force the worst case.
        completed.rotate_left(2);
        assert_eq!(completed[0].file_id, 2);

        textures[0].frame_update(&completed, true);
        assert_eq!(textures[0].num_page_uploads(), 3);

        // All three page tables carry the payload at the same coordinate.
        let coord = CachePageCoord { x: 0, y: 0 };
        let expected = textures[0].page_table(0).level0_pixel(0, 0);
        assert_eq!(expected[3], 0xFF);
        for file in 0..3 {
            let pixel = textures[0]
                .page_table(file)
                .level0_pixel(coord.x as usize * 128, coord.y as usize * 128);
            assert_eq!(pixel, expected);
        }
    }

    /// Synchronous mode fulfills the request before `add_page_request`
    /// returns and is otherwise identical to the async path.
    #[test]
    fn test_synchronous_equivalence() {
        let mut texture = debug_texture(16);
        let jobs = Arc::new(JobSystem::new(1));
        let mut provider = PageProvider::new(jobs, false);
        assert!(!provider.is_async());

        let mut resolver = PageResolver::with_dimensions(4, 4, 16);
        register(&mut texture, &mut resolver, &mut provider);
        let mut textures = [texture];

        let wanted = PageId::new(3, 5, 0, 0);
        resolver.begin_page_id_pass();
        resolver.feedback_mut().set(0, 0, wanted);
        resolver.end_page_id_pass(&mut textures, &provider);

        // The packet is ready before the pass even ends.
        assert_eq!(provider.outstanding_requests(), 0);
        let mut completed = FulfilledPageRequestQueue::new();
        assert_eq!(provider.take_ready_queue(&mut completed), 1);

        textures[0].frame_update(&completed, true);

        let texture = &mut textures[0];
        assert_eq!(texture.num_page_uploads(), 1);
        assert_eq!(texture.cache_mut().lookup_page(wanted), CachePageStatus::Cached);
        let indirection = texture.indirection_table().read();
        assert_eq!(indirection.cache_coord_at(0, 3, 5), CachePageCoord { x: 0, y: 0 });
    }

    /// Loading only the coarsest mip provides a defined fallback for every
    /// finer query.
    #[test]
    fn test_indirection_fallback_from_coarsest_mip() {
        let mut texture = debug_texture(16);
        let jobs = Arc::new(JobSystem::new(1));
        let mut provider = PageProvider::new(jobs, false);
        let mut resolver = PageResolver::with_dimensions(4, 4, 16);
        register(&mut texture, &mut resolver, &mut provider);
        let mut textures = [texture];

        resolver.add_default_requests(&mut textures, &provider);

        let mut completed = FulfilledPageRequestQueue::new();
        assert_eq!(provider.take_ready_queue(&mut completed), 1);
        assert_eq!(completed[0].page_id, PageId::new(0, 0, 4, 0));

        textures[0].frame_update(&completed, true);

        let indirection = textures[0].indirection_table().read();
        let top = indirection.cache_coord_at(4, 0, 0);
        assert_eq!(indirection.cache_coord_at(0, 5, 7), top);
        assert_eq!(indirection.cache_coord_at(2, 3, 1), top);
    }

    /// Hot-swapping a page file keeps the old handle alive for the caller.
    #[test]
    fn test_replace_page_file() {
        let mut texture = debug_texture(16);
        let replacement: Arc<dyn PageFile> = Arc::new(DebugPageFile::with_debug_info(16, 16, true));
        let old = texture.replace_page_file(replacement, 0);
        assert_eq!(old.num_levels(), 5);
        assert_eq!(texture.num_page_files(), 1);
    }

    /// Purging twice is the same as purging once.
    #[test]
    fn test_purge_is_idempotent_at_texture_level() {
        let mut texture = debug_texture(16);
        texture.set_texture_index(0);

        texture.purge_cache();
        let updates = texture.num_indirection_table_updates();
        texture.purge_cache();
        assert_eq!(texture.num_indirection_table_updates(), updates + 1);
        assert_eq!(texture.cache().stats().serviced_requests, 0);
    }
}
