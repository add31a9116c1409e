//! Physical Page Table
//!
//! CPU-resident model of the cache texture that receives streamed pages.
//! The table is a fixed 16x16 grid of 128px pages with exactly two mip
//! levels; level 1 is a box-filtered half of every uploaded page. Finer
//! filtering across pages would leak between cache slots that are unrelated
//! in virtual-texture space, so no further levels exist.

use crate::page_id::CachePageCoord;

/// Size in pixels of a single page, border included.
pub const PAGE_SIZE_IN_PIXELS: usize = 128;

/// Half page size, used by the second mip level of the table.
pub const HALF_PAGE_SIZE_IN_PIXELS: usize = PAGE_SIZE_IN_PIXELS / 2;

/// Border on each side of a page.
pub const PAGE_BORDER_SIZE_IN_PIXELS: usize = 4;

/// Usable interior of a page, borders excluded.
pub const PAGE_CONTENT_SIZE_IN_PIXELS: usize = PAGE_SIZE_IN_PIXELS - 2 * PAGE_BORDER_SIZE_IN_PIXELS;

/// Width and height of the cache in pages.
pub const TABLE_SIZE_IN_PAGES: usize = 16;

/// Total physical page slots in the cache.
pub const TOTAL_TABLE_PAGES: usize = TABLE_SIZE_IN_PAGES * TABLE_SIZE_IN_PAGES;

/// Width and height of the cache texture in pixels.
pub const TABLE_SIZE_IN_PIXELS: usize = TABLE_SIZE_IN_PAGES * PAGE_SIZE_IN_PIXELS;

/// Bytes in one RGBA8 page payload.
pub const PAGE_PAYLOAD_BYTES: usize = PAGE_SIZE_IN_PIXELS * PAGE_SIZE_IN_PIXELS * 4;

/// The physical page cache surface, RGBA8 with two mip levels.
pub struct PageTable {
    level0: Vec<u8>,
    level1: Vec<u8>,
    // Scratch buffer for the mip 1 downsample of an uploaded page.
    half_page: Vec<u8>,
}

impl PageTable {
    /// Allocate a zeroed page table surface.
    pub fn new() -> Self {
        log::info!(
            "New page table created, {}x{} pixels, 2 mip levels",
            TABLE_SIZE_IN_PIXELS,
            TABLE_SIZE_IN_PIXELS
        );
        Self {
            level0: vec![0; TABLE_SIZE_IN_PIXELS * TABLE_SIZE_IN_PIXELS * 4],
            level1: vec![0; (TABLE_SIZE_IN_PIXELS / 2) * (TABLE_SIZE_IN_PIXELS / 2) * 4],
            half_page: vec![0; HALF_PAGE_SIZE_IN_PIXELS * HALF_PAGE_SIZE_IN_PIXELS * 4],
        }
    }

    /// Upload one page payload into the slot at `coord`.
    ///
    /// Level 0 receives the payload verbatim; level 1 receives a box-filtered
    /// half-size copy at the matching position.
    pub fn upload_page(&mut self, coord: CachePageCoord, page_data: &[u8]) {
        assert_eq!(page_data.len(), PAGE_PAYLOAD_BYTES);
        assert!((coord.x as usize) < TABLE_SIZE_IN_PAGES);
        assert!((coord.y as usize) < TABLE_SIZE_IN_PAGES);

        blit(
            page_data,
            PAGE_SIZE_IN_PIXELS,
            &mut self.level0,
            TABLE_SIZE_IN_PIXELS,
            coord.x as usize * PAGE_SIZE_IN_PIXELS,
            coord.y as usize * PAGE_SIZE_IN_PIXELS,
        );

        halve_image_box_filter(
            page_data,
            &mut self.half_page,
            PAGE_SIZE_IN_PIXELS,
            PAGE_SIZE_IN_PIXELS,
            4,
        );

        blit(
            &self.half_page,
            HALF_PAGE_SIZE_IN_PIXELS,
            &mut self.level1,
            TABLE_SIZE_IN_PIXELS / 2,
            coord.x as usize * HALF_PAGE_SIZE_IN_PIXELS,
            coord.y as usize * HALF_PAGE_SIZE_IN_PIXELS,
        );
    }

    /// Repaint every slot with a gradient that makes page borders easy to
    /// spot. Used when debugging the streaming pipeline.
    pub fn fill_with_debug_data(&mut self) {
        let mut page = vec![0u8; PAGE_PAYLOAD_BYTES];
        for y in 0..PAGE_SIZE_IN_PIXELS {
            for x in 0..PAGE_SIZE_IN_PIXELS {
                let p = (y * PAGE_SIZE_IN_PIXELS + x) * 4;
                page[p] = (x.min(127) + y.min(127)) as u8;
                page[p + 1] = 10;
                page[p + 2] = 10;
                page[p + 3] = 0xFF;
            }
        }

        for y in 0..TABLE_SIZE_IN_PAGES {
            for x in 0..TABLE_SIZE_IN_PAGES {
                self.upload_page(
                    CachePageCoord {
                        x: x as u8,
                        y: y as u8,
                    },
                    &page,
                );
            }
        }
    }

    /// Raw RGBA8 pixels of mip level 0.
    pub fn level0(&self) -> &[u8] {
        &self.level0
    }

    /// Raw RGBA8 pixels of mip level 1.
    pub fn level1(&self) -> &[u8] {
        &self.level1
    }

    /// The RGBA texel at `(x, y)` of mip level 0.
    pub fn level0_pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let p = (y * TABLE_SIZE_IN_PIXELS + x) * 4;
        [self.level0[p], self.level0[p + 1], self.level0[p + 2], self.level0[p + 3]]
    }

    /// The RGBA texel at `(x, y)` of mip level 1.
    pub fn level1_pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let p = (y * (TABLE_SIZE_IN_PIXELS / 2) + x) * 4;
        [self.level1[p], self.level1[p + 1], self.level1[p + 2], self.level1[p + 3]]
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy a `src_size` square RGBA8 image into a larger surface at the given
/// pixel offset.
fn blit(src: &[u8], src_size: usize, dest: &mut [u8], dest_size: usize, dest_x: usize, dest_y: usize) {
    for row in 0..src_size {
        let src_start = row * src_size * 4;
        let dest_start = ((dest_y + row) * dest_size + dest_x) * 4;
        dest[dest_start..dest_start + src_size * 4].copy_from_slice(&src[src_start..src_start + src_size * 4]);
    }
}

/// Fast 2x2 box-filter downsample. Rounds with +2 before the shift.
fn halve_image_box_filter(src: &[u8], dest: &mut [u8], width: usize, height: usize, components: usize) {
    if width <= 1 || height <= 1 {
        return;
    }

    let half_width = width / 2;
    let half_height = height / 2;

    for y in 0..half_height {
        for x in 0..half_width {
            for k in 0..components {
                let i = ((y * 2) * width + (x * 2)) * components + k;
                let sum = src[i] as u32
                    + src[i + components] as u32
                    + src[i + width * components] as u32
                    + src[i + (width + 1) * components] as u32;
                dest[(y * half_width + x) * components + k] = ((sum + 2) >> 2) as u8;
            }
        }
    }
}
