//! Page Provider
//!
//! Bounded asynchronous loading of requested pages. Every accepted request
//! dispatches one job per page file of the target texture; completed
//! payloads land on a mutex-guarded queue the main thread steals once per
//! frame. Completions become visible in completion order, not request
//! order; stale ones are skipped downstream via the cache's
//! `still_want_page`.
//!
//! Requests cannot be cancelled once dispatched. Backpressure comes from
//! the outstanding-request bound: past it, new requests are refused and the
//! resolver rolls the cache marker back.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use tessella_core::job::JobSystem;
use tessella_core::page_id::PageId;
use tessella_io::page_file::{PageFile, PageRequestPacket};

use crate::virtual_texture::VirtualTexture;

/// Most page requests that may be in flight at any time.
pub const MAX_OUTSTANDING_PAGE_REQUESTS: usize = 256;

/// Completed page loads, in completion order.
pub type FulfilledPageRequestQueue = VecDeque<PageRequestPacket>;

type PageFileSet = SmallVec<[Arc<dyn PageFile>; 4]>;

/// Dispatches page loads and collects their completions.
pub struct PageProvider {
    outstanding: Arc<AtomicUsize>,
    ready: Arc<Mutex<FulfilledPageRequestQueue>>,
    jobs: Arc<JobSystem>,
    // Page file handles per registered texture, indexed by texture index.
    textures: Vec<PageFileSet>,
    synchronous: bool,
}

impl PageProvider {
    /// A provider running loads on the given job system. With `async_loads`
    /// off, every load runs inline on the calling thread instead (used for
    /// profiling and debugging).
    pub fn new(jobs: Arc<JobSystem>, async_loads: bool) -> Self {
        if async_loads {
            log::info!("New asynchronous page provider created");
        } else {
            log::info!("New serial page provider created");
        }
        Self {
            outstanding: Arc::new(AtomicUsize::new(0)),
            ready: Arc::new(Mutex::new(FulfilledPageRequestQueue::new())),
            jobs,
            textures: Vec::new(),
            synchronous: !async_loads,
        }
    }

    /// A provider configured from streaming options.
    pub fn from_options(jobs: Arc<JobSystem>, options: &crate::StreamingOptions) -> Self {
        Self::new(jobs, options.async_loads)
    }

    /// Attempt to queue a load for every page file of the target texture.
    ///
    /// Returns false without side effects when the outstanding-request
    /// budget is spent; the caller must notify the cache of the drop.
    pub fn add_page_request(&self, request_id: PageId) -> bool {
        if self.outstanding.load(Ordering::Acquire) >= MAX_OUTSTANDING_PAGE_REQUESTS {
            log::debug!(
                "Max outstanding page requests limit ({}) reached, dropping request",
                MAX_OUTSTANDING_PAGE_REQUESTS
            );
            return false;
        }

        if self.synchronous {
            self.run_immediate_request(request_id)
        } else {
            self.run_async_request(request_id)
        }
    }

    fn texture_files(&self, request_id: PageId) -> &PageFileSet {
        debug_assert!(!self.textures.is_empty(), "no virtual textures registered");
        let index = (request_id.texture_index() as usize).min(self.textures.len() - 1);
        &self.textures[index]
    }

    fn run_async_request(&self, request_id: PageId) -> bool {
        for (file_id, file) in self.texture_files(request_id).iter().enumerate() {
            let file = Arc::clone(file);
            let ready = Arc::clone(&self.ready);
            let outstanding = Arc::clone(&self.outstanding);

            self.outstanding.fetch_add(1, Ordering::AcqRel);
            self.jobs.submit(move || {
                let mut packet = PageRequestPacket::new(request_id, file_id as u32);
                file.load_page(request_id, &mut packet);

                ready.lock().push_back(packet);
                outstanding.fetch_sub(1, Ordering::AcqRel);
            });
        }
        true
    }

    fn run_immediate_request(&self, request_id: PageId) -> bool {
        for (file_id, file) in self.texture_files(request_id).iter().enumerate() {
            self.outstanding.fetch_add(1, Ordering::AcqRel);

            let mut packet = PageRequestPacket::new(request_id, file_id as u32);
            file.load_page(request_id, &mut packet);

            self.ready.lock().push_back(packet);
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
        }
        true
    }

    /// Steal the current ready queue into `out`, leaving an empty one behind
    /// so workers keep enqueuing while the main thread consumes. Returns the
    /// stolen size.
    pub fn take_ready_queue(&self, out: &mut FulfilledPageRequestQueue) -> usize {
        out.clear();
        std::mem::swap(&mut *self.ready.lock(), out);
        out.len()
    }

    /// Register a texture, assigning its stable texture index. Only the page
    /// file handles are retained; registration order must match the
    /// resolver's.
    pub fn register_virtual_texture(&mut self, texture: &mut VirtualTexture) {
        self.textures.push(texture.page_files().iter().cloned().collect());
        texture.set_texture_index(self.textures.len() as i32 - 1);
    }

    /// Drop every registered texture.
    pub fn unregister_all_virtual_textures(&mut self) {
        self.textures.clear();
    }

    /// True when loads run on worker threads.
    pub fn is_async(&self) -> bool {
        !self.synchronous
    }

    /// Switch between worker-thread and inline loading at runtime.
    pub fn set_async(&mut self, async_loads: bool) {
        self.synchronous = !async_loads;
    }

    /// Requests dispatched but not yet pushed to the ready queue.
    pub fn outstanding_requests(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}
