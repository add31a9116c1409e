//! Page Resolver
//!
//! Feedback pass analysis: turns the per-pixel page-id image into a
//! bounded, prioritized set of load requests. Unique pages are counted,
//! sorted coarsest-mip-first (frequency breaks ties, so the pages covering
//! the most screen area load first within a level) and routed through the
//! owning texture's cache. When the view is oversubscribed the per-frame
//! request budget is clamped to the cache size; the indirection fallback
//! covers the rest with coarser mips.

use ahash::AHashMap;

use tessella_core::cache::CachePageStatus;
use tessella_core::page_id::PageId;
use tessella_core::page_table::TOTAL_TABLE_PAGES;

use crate::provider::PageProvider;
use crate::virtual_texture::VirtualTexture;

/// Default feedback target width in pixels.
pub const DEFAULT_FEEDBACK_WIDTH: usize = 256;

/// Default feedback target height in pixels.
pub const DEFAULT_FEEDBACK_HEIGHT: usize = 128;

/// CPU-side page-id feedback image. One pixel requests one page; the
/// invalid sentinel marks background and non-virtual-texture geometry.
pub struct FeedbackBuffer {
    width: usize,
    height: usize,
    pixels: Vec<PageId>,
}

impl FeedbackBuffer {
    /// A buffer cleared to the sentinel.
    pub fn new(width: usize, height: usize) -> Self {
        assert!(width > 0 && height > 0);
        Self {
            width,
            height,
            pixels: vec![PageId::INVALID; width * height],
        }
    }

    /// Reset every pixel to the sentinel.
    pub fn clear(&mut self) {
        self.pixels.fill(PageId::INVALID);
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Write one requested page.
    pub fn set(&mut self, x: usize, y: usize, id: PageId) {
        self.pixels[y * self.width + x] = id;
    }

    /// All pixels, row-major.
    pub fn pixels(&self) -> &[PageId] {
        &self.pixels
    }

    /// Mutable pixel access for the renderer filling the pass.
    pub fn pixels_mut(&mut self) -> &mut [PageId] {
        &mut self.pixels
    }

    /// Import an RGBA8 read-back (R = page X, G = page Y, B = level,
    /// A = texture index per pixel, little-endian) into the buffer.
    pub fn copy_from_rgba8(&mut self, bytes: &[u8]) {
        assert_eq!(bytes.len(), self.pixels.len() * 4);
        for (pixel, chunk) in self.pixels.iter_mut().zip(bytes.chunks_exact(4)) {
            *pixel = PageId::from_bits(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
    }
}

/// Consumes the feedback image and issues page requests.
pub struct PageResolver {
    feedback: FeedbackBuffer,
    max_page_requests_per_frame: usize,
    configured_max_requests: usize,
    visible_pages: usize,
    page_map: AHashMap<PageId, u32>,
    sorted_pages: Vec<PageId>,
    num_registered: usize,
}

impl PageResolver {
    /// A resolver with the default feedback size; the request budget
    /// defaults to one request per feedback pixel.
    pub fn new() -> Self {
        Self::with_dimensions(
            DEFAULT_FEEDBACK_WIDTH,
            DEFAULT_FEEDBACK_HEIGHT,
            DEFAULT_FEEDBACK_WIDTH * DEFAULT_FEEDBACK_HEIGHT,
        )
    }

    /// A resolver configured from streaming options; the request budget is
    /// one request per feedback pixel.
    pub fn from_options(options: &crate::StreamingOptions) -> Self {
        Self::with_dimensions(
            options.feedback_width,
            options.feedback_height,
            options.feedback_width * options.feedback_height,
        )
    }

    /// A resolver with an explicit feedback size and per-frame request
    /// budget.
    pub fn with_dimensions(width: usize, height: usize, max_frame_requests: usize) -> Self {
        log::info!("Page resolver feedback target initialized, {}x{} pixels", width, height);
        Self {
            feedback: FeedbackBuffer::new(width, height),
            max_page_requests_per_frame: max_frame_requests,
            configured_max_requests: max_frame_requests,
            visible_pages: 0,
            page_map: AHashMap::new(),
            sorted_pages: Vec::new(),
            num_registered: 0,
        }
    }

    /// Clear the feedback target for a new page-id pass. The renderer fills
    /// the buffer between `begin` and `end`.
    pub fn begin_page_id_pass(&mut self) {
        self.feedback.clear();
    }

    /// Analyze the filled feedback buffer and issue load requests through
    /// each texture's cache.
    pub fn end_page_id_pass(&mut self, textures: &mut [VirtualTexture], provider: &PageProvider) {
        self.feedback_buffer_analysis(textures, provider);
    }

    /// The feedback image of the current pass.
    pub fn feedback(&self) -> &FeedbackBuffer {
        &self.feedback
    }

    /// Mutable feedback image; this is what the renderer writes into.
    pub fn feedback_mut(&mut self) -> &mut FeedbackBuffer {
        &mut self.feedback
    }

    /// Register a texture, assigning its stable texture index. Registration
    /// order must match the provider's.
    pub fn register_virtual_texture(&mut self, texture: &mut VirtualTexture) {
        texture.set_texture_index(self.num_registered as i32);
        self.num_registered += 1;
    }

    /// Unique pages seen in the last analyzed frame.
    pub fn visible_pages(&self) -> usize {
        self.visible_pages
    }

    /// The request budget applied to the last analyzed frame.
    pub fn max_page_requests_per_frame(&self) -> usize {
        self.max_page_requests_per_frame
    }

    /// Request the coarsest mip of every registered texture so the
    /// guaranteed fallback is resident.
    ///
    /// Called once at startup. Re-running this every frame would only help
    /// if the coarsest pages were pinned against LRU eviction, which the
    /// cache does not support.
    pub fn add_default_requests(&mut self, textures: &mut [VirtualTexture], provider: &PageProvider) {
        for texture in textures.iter_mut() {
            let max_mip = texture.num_levels() as u32 - 1;
            let texture_id = texture.texture_index().max(0) as u32;
            Self::process_page_request(PageId::new(0, 0, max_mip, texture_id), texture, provider);
        }
    }

    fn feedback_buffer_analysis(&mut self, textures: &mut [VirtualTexture], provider: &PageProvider) {
        debug_assert!(self.page_map.is_empty());
        debug_assert!(self.sorted_pages.is_empty());

        // Frequency table of unique pages. Invalid pixels are the background
        // and parts of the scene not using the virtual texture renderer.
        for &pixel in self.feedback.pixels() {
            if pixel.is_valid() {
                *self.page_map.entry(pixel).or_insert(0) += 1;
            }
        }

        // Coarser mips first so they can hide finer misses; within a level,
        // the most frequently requested pages go first.
        self.sorted_pages.extend(self.page_map.keys().copied());
        self.sorted_pages.sort_unstable_by(|a, b| {
            b.mip_level()
                .cmp(&a.mip_level())
                .then_with(|| self.page_map[b].cmp(&self.page_map[a]))
        });

        self.visible_pages = self.page_map.len();

        if self.visible_pages >= TOTAL_TABLE_PAGES {
            // Oversubscribed view: more pages visible than physical slots.
            // Requesting beyond the cache size only causes thrash, so clamp
            // the budget until the view stabilizes.
            self.max_page_requests_per_frame = TOTAL_TABLE_PAGES;
        } else {
            self.max_page_requests_per_frame = self.configured_max_requests;
        }

        let mut new_requests = 0usize;
        for &request_id in self.sorted_pages.iter() {
            if new_requests >= self.max_page_requests_per_frame {
                break;
            }

            // Feedback pixels occasionally arrive out of range (see the
            // sanitize notes in the cache); clamp before touching the cache.
            let index = (request_id.texture_index() as usize).min(textures.len().saturating_sub(1));
            let texture = &mut textures[index];
            let request_id = texture.cache().sanitize_page_id(request_id);

            new_requests += Self::process_page_request(request_id, texture, provider);
        }

        if new_requests < self.sorted_pages.len() {
            log::debug!(
                "{} page requests were dropped by the resolver this frame",
                self.sorted_pages.len() - new_requests
            );
        }

        self.sorted_pages.clear();
        self.page_map.clear();
    }

    /// Route one request through a texture's cache; fires a provider load
    /// when the page is absent. Returns 1 when the request is satisfied
    /// (cached, in flight, or newly dispatched), 0 when it was dropped.
    fn process_page_request(request_id: PageId, texture: &mut VirtualTexture, provider: &PageProvider) -> usize {
        match texture.cache_mut().lookup_page(request_id) {
            CachePageStatus::Unavailable => {
                if provider.add_page_request(request_id) {
                    return 1;
                }
                // The provider could not fit another request; roll the
                // in-flight marker back so the page can be requested again.
                texture.cache_mut().notify_dropped_request(request_id);
                0
            }
            CachePageStatus::Cached | CachePageStatus::InFlight => 1,
        }
    }
}

impl Default for PageResolver {
    fn default() -> Self {
        Self::new()
    }
}
