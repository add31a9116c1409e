//! Page Indirection Tables
//!
//! Per-mip translation from virtual page coordinates to physical cache
//! coordinates plus a level scale. Rebuilt from the cache entries after each
//! frame, coarsest level first; every level is then point-upsampled into the
//! next finer one, so a query at any level always lands on a defined entry
//! even for uncached regions (the coarser data acts as the fallback).
//!
//! Two texel layouts exist. RGB-5:6:5 is half the memory at a slightly
//! higher address translation cost; RGBA-8:8:8:8 is bigger but cheaper to
//! decode. The layout is fixed for the whole library at init time.

use crate::cache::CacheEntry;
use crate::page_id::CachePageCoord;
use crate::page_table::TABLE_SIZE_IN_PAGES;
use crate::{indirection_table_format, IndirectionTableFormat, InitError, MAX_MIP_LEVELS};

/// One RGBA-8:8:8:8 indirection texel.
///
/// Byte order matches the GPU texel: cache X, cache Y, then the low and high
/// bytes of the 16-bit level scale.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryRgba8888 {
    pub cache_page_x: u8,
    pub cache_page_y: u8,
    pub scale_low: u8,
    pub scale_high: u8,
}

impl EntryRgba8888 {
    fn with_scale(scale: u16) -> Self {
        Self {
            cache_page_x: 0,
            cache_page_y: 0,
            scale_low: (scale & 0xFF) as u8,
            scale_high: (scale >> 8) as u8,
        }
    }

    /// The decoded 16-bit level scale.
    pub fn scale(&self) -> u16 {
        self.scale_low as u16 | ((self.scale_high as u16) << 8)
    }
}

/// One RGB-5:6:5 indirection texel: cache X in the top 5 bits, the level
/// log2-scale in the middle 6, cache Y in the low 5.
pub type EntryRgb565 = u16;

/// Shared per-level layout: page counts and base offsets into one flattened
/// entry pool.
struct TableDims {
    num_levels: usize,
    offsets: [usize; MAX_MIP_LEVELS],
    pages_x: [u32; MAX_MIP_LEVELS],
    pages_y: [u32; MAX_MIP_LEVELS],
    total: usize,
}

impl TableDims {
    fn new(pages_x: &[u32], pages_y: &[u32]) -> Self {
        let num_levels = pages_x.len();
        assert!(num_levels > 0 && num_levels <= MAX_MIP_LEVELS);
        assert_eq!(pages_x.len(), pages_y.len());

        let mut dims = Self {
            num_levels,
            offsets: [0; MAX_MIP_LEVELS],
            pages_x: [0; MAX_MIP_LEVELS],
            pages_y: [0; MAX_MIP_LEVELS],
            total: 0,
        };
        for level in 0..num_levels {
            assert!(pages_x[level] > 0 && pages_y[level] > 0);
            dims.offsets[level] = dims.total;
            dims.pages_x[level] = pages_x[level];
            dims.pages_y[level] = pages_y[level];
            dims.total += (pages_x[level] * pages_y[level]) as usize;
        }
        dims
    }

    fn index_of(&self, level: usize, x: u32, y: u32) -> usize {
        debug_assert!(level < self.num_levels);
        debug_assert!(x < self.pages_x[level] && y < self.pages_y[level]);
        self.offsets[level] + (x + y * self.pages_x[level]) as usize
    }
}

/// RGBA-8:8:8:8 indirection table.
pub struct IndirectionTableRgba8888 {
    dims: TableDims,
    entries: Vec<EntryRgba8888>,
}

impl IndirectionTableRgba8888 {
    fn new(pages_x: &[u32], pages_y: &[u32]) -> Self {
        let dims = TableDims::new(pages_x, pages_y);
        let mut entries = vec![EntryRgba8888::default(); dims.total];

        // Default-initialize every level so no cell is ever undefined.
        for level in 0..dims.num_levels {
            let scale = Self::level_scale(&dims, level);
            let start = dims.offsets[level];
            let count = (dims.pages_x[level] * dims.pages_y[level]) as usize;
            for entry in &mut entries[start..start + count] {
                *entry = EntryRgba8888::with_scale(scale);
            }
        }

        log::info!(
            "New RGBA-8:8:8:8 page indirection table created, {} entries over {} levels",
            dims.total,
            dims.num_levels
        );
        Self { dims, entries }
    }

    fn level_scale(dims: &TableDims, level: usize) -> u16 {
        ((dims.pages_x[0] * 16) >> level) as u16
    }

    fn update(&mut self, pages: &[CacheEntry]) {
        for level in (0..self.dims.num_levels).rev() {
            // Write every cache entry that belongs to this level.
            for cache_entry in pages {
                let id = cache_entry.page_id();
                if !id.is_valid() || id.mip_level() as usize != level {
                    continue;
                }

                let index = self.dims.index_of(level, id.page_x(), id.page_y());
                let coord = cache_entry.cache_coord();
                let scale = Self::level_scale(&self.dims, level);
                self.entries[index] = EntryRgba8888 {
                    cache_page_x: coord.x,
                    cache_page_y: coord.y,
                    scale_low: (scale & 0xFF) as u8,
                    scale_high: (scale >> 8) as u8,
                };
            }

            // Upsample into the next finer level; its own entries overwrite
            // these on the next iteration.
            if level != 0 {
                for y in 0..self.dims.pages_y[level - 1] {
                    for x in 0..self.dims.pages_x[level - 1] {
                        let src = self.entries[self.dims.index_of(level, x >> 1, y >> 1)];
                        let dest = self.dims.index_of(level - 1, x, y);
                        self.entries[dest] = src;
                    }
                }
            }
        }
    }

    /// The texel at (level, x, y).
    pub fn entry(&self, level: usize, x: u32, y: u32) -> EntryRgba8888 {
        self.entries[self.dims.index_of(level, x, y)]
    }
}

/// RGB-5:6:5 indirection table.
pub struct IndirectionTableRgb565 {
    dims: TableDims,
    log2_virt_pages_wide: u32,
    entries: Vec<EntryRgb565>,
}

impl IndirectionTableRgb565 {
    fn new(pages_x: &[u32], pages_y: &[u32]) -> Self {
        let dims = TableDims::new(pages_x, pages_y);
        let log2_virt_pages_wide = pages_x[0].ilog2();
        let mut entries = vec![0 as EntryRgb565; dims.total];

        for level in 0..dims.num_levels {
            let default = ((log2_virt_pages_wide - level as u32) as EntryRgb565) << 5;
            let start = dims.offsets[level];
            let count = (dims.pages_x[level] * dims.pages_y[level]) as usize;
            entries[start..start + count].fill(default);
        }

        log::info!(
            "New RGB-5:6:5 page indirection table created, {} entries over {} levels, log2 width {}",
            dims.total,
            dims.num_levels,
            log2_virt_pages_wide
        );
        Self {
            dims,
            log2_virt_pages_wide,
            entries,
        }
    }

    fn pack(&self, coord: CachePageCoord, level: usize) -> EntryRgb565 {
        ((coord.x as u16 * 32 / TABLE_SIZE_IN_PAGES as u16) << 11)
            | (((self.log2_virt_pages_wide - level as u32) as u16) << 5)
            | (coord.y as u16 * 32 / TABLE_SIZE_IN_PAGES as u16)
    }

    fn update(&mut self, pages: &[CacheEntry]) {
        for level in (0..self.dims.num_levels).rev() {
            for cache_entry in pages {
                let id = cache_entry.page_id();
                if !id.is_valid() || id.mip_level() as usize != level {
                    continue;
                }

                let index = self.dims.index_of(level, id.page_x(), id.page_y());
                self.entries[index] = self.pack(cache_entry.cache_coord(), level);
            }

            if level != 0 {
                for y in 0..self.dims.pages_y[level - 1] {
                    for x in 0..self.dims.pages_x[level - 1] {
                        let src = self.entries[self.dims.index_of(level, x >> 1, y >> 1)];
                        let dest = self.dims.index_of(level - 1, x, y);
                        self.entries[dest] = src;
                    }
                }
            }
        }
    }

    /// The packed texel at (level, x, y).
    pub fn entry(&self, level: usize, x: u32, y: u32) -> EntryRgb565 {
        self.entries[self.dims.index_of(level, x, y)]
    }
}

/// A page indirection table in the format selected at library init.
pub enum PageIndirectionTable {
    Rgba8888(IndirectionTableRgba8888),
    Rgb565(IndirectionTableRgb565),
}

impl PageIndirectionTable {
    /// Create a table in the library-wide format. Fails if
    /// [`crate::init`] has not been called yet.
    pub fn new(pages_x: &[u32], pages_y: &[u32]) -> Result<Self, InitError> {
        match indirection_table_format() {
            Some(format) => Ok(Self::with_format(format, pages_x, pages_y)),
            None => Err(InitError::NotInitialized),
        }
    }

    /// Create a table in an explicit format, bypassing the library-wide
    /// selection.
    pub fn with_format(format: IndirectionTableFormat, pages_x: &[u32], pages_y: &[u32]) -> Self {
        match format {
            IndirectionTableFormat::Rgba8888 => Self::Rgba8888(IndirectionTableRgba8888::new(pages_x, pages_y)),
            IndirectionTableFormat::Rgb565 => Self::Rgb565(IndirectionTableRgb565::new(pages_x, pages_y)),
        }
    }

    /// Rebuild every level from the current cache entries, coarsest first,
    /// upsampling each level into the next finer one.
    pub fn update(&mut self, cache_entries: &[CacheEntry]) {
        match self {
            Self::Rgba8888(table) => table.update(cache_entries),
            Self::Rgb565(table) => table.update(cache_entries),
        }
    }

    /// The texel layout of this table.
    pub fn format(&self) -> IndirectionTableFormat {
        match self {
            Self::Rgba8888(_) => IndirectionTableFormat::Rgba8888,
            Self::Rgb565(_) => IndirectionTableFormat::Rgb565,
        }
    }

    fn dims(&self) -> &TableDims {
        match self {
            Self::Rgba8888(table) => &table.dims,
            Self::Rgb565(table) => &table.dims,
        }
    }

    /// Number of mip levels.
    pub fn num_levels(&self) -> usize {
        self.dims().num_levels
    }

    /// Pages along X at `level`.
    pub fn num_pages_x(&self, level: usize) -> u32 {
        self.dims().pages_x[level]
    }

    /// Pages along Y at `level`.
    pub fn num_pages_y(&self, level: usize) -> u32 {
        self.dims().pages_y[level]
    }

    /// Decoded physical cache coordinate referenced by (level, x, y).
    pub fn cache_coord_at(&self, level: usize, x: u32, y: u32) -> CachePageCoord {
        match self {
            Self::Rgba8888(table) => {
                let entry = table.entry(level, x, y);
                CachePageCoord {
                    x: entry.cache_page_x,
                    y: entry.cache_page_y,
                }
            }
            Self::Rgb565(table) => {
                let entry = table.entry(level, x, y);
                CachePageCoord {
                    x: (((entry >> 11) & 0x1F) as usize * TABLE_SIZE_IN_PAGES / 32) as u8,
                    y: ((entry & 0x1F) as usize * TABLE_SIZE_IN_PAGES / 32) as u8,
                }
            }
        }
    }

    /// One level rendered as RGBA8 texels (the 5:6:5 layout is unpacked into
    /// the low bits of each channel). Used for debug image dumps.
    pub fn level_texels_rgba(&self, level: usize) -> Vec<u8> {
        let count = (self.num_pages_x(level) * self.num_pages_y(level)) as usize;
        let mut texels = Vec::with_capacity(count * 4);
        match self {
            Self::Rgba8888(table) => {
                let start = table.dims.offsets[level];
                for entry in &table.entries[start..start + count] {
                    texels.extend_from_slice(&[entry.cache_page_x, entry.cache_page_y, entry.scale_low, entry.scale_high]);
                }
            }
            Self::Rgb565(table) => {
                let start = table.dims.offsets[level];
                for entry in &table.entries[start..start + count] {
                    let r = ((entry & 0x7800) >> 11) as u8;
                    let g = ((entry & 0x07E0) >> 5) as u8;
                    let b = (entry & 0x001F) as u8;
                    texels.extend_from_slice(&[r, g, b, 0xFF]);
                }
            }
        }
        texels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PageCacheMgr;
    use crate::page_id::PageId;

    const PAGES: [u32; 5] = [16, 8, 4, 2, 1];

    #[test]
    fn test_default_entries_cover_every_level() {
        let table = PageIndirectionTable::with_format(IndirectionTableFormat::Rgba8888, &PAGES, &PAGES);
        for level in 0..table.num_levels() {
            for y in 0..table.num_pages_y(level) {
                for x in 0..table.num_pages_x(level) {
                    assert_eq!(table.cache_coord_at(level, x, y), CachePageCoord { x: 0, y: 0 });
                }
            }
        }

        // Scale halves with every level: (16 * 16) >> level.
        if let PageIndirectionTable::Rgba8888(table) = &table {
            assert_eq!(table.entry(0, 0, 0).scale(), 256);
            assert_eq!(table.entry(4, 0, 0).scale(), 16);
        }
    }

    #[test]
    fn test_update_writes_cached_pages() {
        let mut cache = PageCacheMgr::new(&PAGES, &PAGES);
        cache.lookup_page(PageId::new(3, 5, 0, 0));
        let coord = cache.accommodate_page(PageId::new(3, 5, 0, 0));

        let mut table = PageIndirectionTable::with_format(IndirectionTableFormat::Rgba8888, &PAGES, &PAGES);
        table.update(cache.entries());

        assert_eq!(table.cache_coord_at(0, 3, 5), coord);
        // Unrelated cells keep the default slot.
        assert_eq!(table.cache_coord_at(0, 0, 0), CachePageCoord { x: 0, y: 0 });
    }

    #[test]
    fn test_coarse_level_upsamples_into_finer_levels() {
        let mut cache = PageCacheMgr::new(&PAGES, &PAGES);

        // Occupy the first slot so the coarse page lands in a slot that is
        // distinguishable from the default (0, 0) entries.
        let dummy = PageId::new(9, 9, 0, 0);
        cache.lookup_page(dummy);
        cache.accommodate_page(dummy);

        let top = PageId::new(0, 0, 4, 0);
        cache.lookup_page(top);
        let coord = cache.accommodate_page(top);
        assert_eq!(coord, CachePageCoord { x: 1, y: 0 });

        for format in [IndirectionTableFormat::Rgba8888, IndirectionTableFormat::Rgb565] {
            let mut table = PageIndirectionTable::with_format(format, &PAGES, &PAGES);
            table.update(cache.entries());

            // Every level falls back to the single coarsest page.
            assert_eq!(table.cache_coord_at(4, 0, 0), coord);
            assert_eq!(table.cache_coord_at(0, 5, 7), coord);
            assert_eq!(table.cache_coord_at(1, 7, 0), coord);
        }
    }

    #[test]
    fn test_upsample_consistency_between_levels() {
        let mut cache = PageCacheMgr::new(&PAGES, &PAGES);
        for &(x, y, level) in &[(0u32, 0u32, 4u32), (1, 1, 2), (3, 2, 1)] {
            let id = PageId::new(x, y, level, 0);
            cache.lookup_page(id);
            cache.accommodate_page(id);
        }

        let mut table = PageIndirectionTable::with_format(IndirectionTableFormat::Rgba8888, &PAGES, &PAGES);
        table.update(cache.entries());

        // No level-0 page is cached, so level 0 must equal the upsample of
        // level 1 everywhere.
        for y in 0..table.num_pages_y(0) {
            for x in 0..table.num_pages_x(0) {
                assert_eq!(table.cache_coord_at(0, x, y), table.cache_coord_at(1, x / 2, y / 2));
            }
        }

        // Level 1 equals the upsample of level 2 except where its own cached
        // page (3, 2) overwrote the propagated value.
        for y in 0..table.num_pages_y(1) {
            for x in 0..table.num_pages_x(1) {
                if (x, y) == (3, 2) {
                    continue;
                }
                assert_eq!(table.cache_coord_at(1, x, y), table.cache_coord_at(2, x / 2, y / 2));
            }
        }
    }

    #[test]
    fn test_rgb565_packing() {
        let pages = [32u32, 16, 8, 4, 2, 1];
        let mut cache = PageCacheMgr::new(&pages, &pages);

        let dummy = PageId::new(0, 0, 0, 0);
        cache.lookup_page(dummy);
        cache.accommodate_page(dummy);

        let id = PageId::new(4, 6, 1, 0);
        cache.lookup_page(id);
        let coord = cache.accommodate_page(id);
        assert_eq!(coord, CachePageCoord { x: 1, y: 0 });

        let mut table = PageIndirectionTable::with_format(IndirectionTableFormat::Rgb565, &pages, &pages);
        table.update(cache.entries());

        if let PageIndirectionTable::Rgb565(table) = &table {
            let entry = table.entry(1, 4, 6);
            let expected = ((coord.x as u16 * 2) << 11) | ((5 - 1) << 5) | (coord.y as u16 * 2);
            assert_eq!(entry, expected);
        } else {
            unreachable!();
        }
        assert_eq!(table.cache_coord_at(1, 4, 6), coord);
    }
}
