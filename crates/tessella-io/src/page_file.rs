//! Page Files
//!
//! Backing stores that produce the raw RGBA pixels of a single page:
//! - [`VtffPageFile`]: the hot path, one seek and one read per page against
//!   a packed VTFF file
//! - [`DebugPageFile`]: deterministic synthetic pages, no IO
//! - [`UnpackedPageFile`]: one image file per page, decoded on demand
//!
//! Runtime page loads fail soft: on any error the payload is zero-filled
//! and the error is logged, keeping the streaming pipeline alive. The tile
//! renders black instead of stalling the frame loop.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use tessella_core::page_id::PageId;
use tessella_core::page_table::{PAGE_BORDER_SIZE_IN_PIXELS, PAGE_PAYLOAD_BYTES, PAGE_SIZE_IN_PIXELS};

use crate::format::{self, PageDirectory, VtffError, VtffHeader};
use crate::overlay;

/// An in-flight or completed page load.
pub struct PageRequestPacket {
    /// Which page the payload refers to.
    pub page_id: PageId,
    /// Which file within the virtual texture (sub-textures such as normal or
    /// specular maps have their own page files).
    pub file_id: u32,
    /// Exactly one page worth of RGBA8 pixels.
    pub data: Box<[u8]>,
}

impl PageRequestPacket {
    /// A packet with a zeroed payload.
    pub fn new(page_id: PageId, file_id: u32) -> Self {
        Self {
            page_id,
            file_id,
            data: vec![0u8; PAGE_PAYLOAD_BYTES].into_boxed_slice(),
        }
    }
}

/// A page data backing store.
///
/// Implementations must be callable from worker threads; any internal file
/// handle is expected to carry its own lock.
pub trait PageFile: Send + Sync {
    /// Fill `packet.data` with the pixels of `id`. Fails soft: the payload
    /// is zero-filled on error and the pipeline keeps running.
    fn load_page(&self, id: PageId, packet: &mut PageRequestPacket);

    /// Per-level page counts along X, finest level first.
    fn num_pages_x(&self) -> &[u32];

    /// Per-level page counts along Y, finest level first.
    fn num_pages_y(&self) -> &[u32];

    /// Number of mip levels.
    fn num_levels(&self) -> usize {
        self.num_pages_x().len()
    }
}

/// Per-level page counts for a mip chain that halves until either dimension
/// reaches one page.
pub fn mip_chain_dimensions(level0_pages_x: u32, level0_pages_y: u32) -> (Vec<u32>, Vec<u32>) {
    assert!(level0_pages_x > 0 && level0_pages_y > 0);
    let mut pages_x = vec![level0_pages_x];
    let mut pages_y = vec![level0_pages_y];
    let (mut x, mut y) = (level0_pages_x, level0_pages_y);
    while x > 1 && y > 1 {
        x = (x / 2).max(1);
        y = (y / 2).max(1);
        pages_x.push(x);
        pages_y.push(y);
    }
    (pages_x, pages_y)
}

// ======================================================================
// VtffPageFile
// ======================================================================

/// The packed on-disk backing store. The file is opened and its directory
/// parsed once at construction; every subsequent load is one seek plus one
/// read under the file lock, so workers may call it concurrently.
pub struct VtffPageFile {
    file: Mutex<File>,
    header: VtffHeader,
    directory: PageDirectory,
    path: PathBuf,
    add_debug_info: bool,
}

impl VtffPageFile {
    /// Open a page file, parsing and validating the full directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VtffError> {
        Self::with_debug_info(path, false)
    }

    /// Open a page file that stamps the debug overlay onto every loaded
    /// page.
    pub fn with_debug_info(path: impl AsRef<Path>, add_debug_info: bool) -> Result<Self, VtffError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let (header, directory) = format::read_directory(&mut file)?;

        log::info!(
            "VTFF file {} has {} mipmap levels",
            path.display(),
            header.num_mip_levels
        );

        Ok(Self {
            file: Mutex::new(file),
            header,
            directory,
            path,
            add_debug_info,
        })
    }

    /// The validated file header.
    pub fn header(&self) -> &VtffHeader {
        &self.header
    }

    /// The parsed page directory.
    pub fn directory(&self) -> &PageDirectory {
        &self.directory
    }
}

impl PageFile for VtffPageFile {
    fn load_page(&self, id: PageId, packet: &mut PageRequestPacket) {
        packet.page_id = id;

        if !id.is_valid() {
            log::error!("VtffPageFile: invalid page id");
            packet.data.fill(0);
            return;
        }

        let Some(info) = self.directory.get(id) else {
            log::error!("VtffPageFile: {} is out of range for {}", id, self.path.display());
            packet.data.fill(0);
            return;
        };

        {
            let mut file = self.file.lock();

            if let Err(error) = file.seek(SeekFrom::Start(info.file_offset)) {
                log::error!(
                    "VtffPageFile: failed to seek to offset {} in {}: {}",
                    info.file_offset,
                    self.path.display(),
                    error
                );
                packet.data.fill(0);
                return;
            }

            if let Err(error) = file.read_exact(&mut packet.data) {
                log::warn!(
                    "VtffPageFile: failed to read {} bytes from {}: {}",
                    packet.data.len(),
                    self.path.display(),
                    error
                );
                packet.data.fill(0);
                return;
            }
        }

        if self.add_debug_info {
            overlay::add_debug_info_to_page(
                id.page_x(),
                id.page_y(),
                id.mip_level(),
                &mut packet.data,
                true,
                false,
                PAGE_SIZE_IN_PIXELS,
                PAGE_BORDER_SIZE_IN_PIXELS,
            );
        }
    }

    fn num_pages_x(&self) -> &[u32] {
        self.directory.num_pages_x()
    }

    fn num_pages_y(&self) -> &[u32] {
        self.directory.num_pages_y()
    }
}

// ======================================================================
// DebugPageFile
// ======================================================================

/// Synthesizes a deterministic color per page id and performs no IO. Used
/// for diagnostics and soak tests.
pub struct DebugPageFile {
    pages_x: Vec<u32>,
    pages_y: Vec<u32>,
    add_debug_info: bool,
}

impl DebugPageFile {
    /// A debug file with a full mip chain below the given level-0 page
    /// counts.
    pub fn new(level0_pages_x: u32, level0_pages_y: u32) -> Self {
        Self::with_debug_info(level0_pages_x, level0_pages_y, false)
    }

    /// Like [`DebugPageFile::new`], optionally stamping the text overlay.
    pub fn with_debug_info(level0_pages_x: u32, level0_pages_y: u32, add_debug_info: bool) -> Self {
        let (pages_x, pages_y) = mip_chain_dimensions(level0_pages_x, level0_pages_y);
        Self {
            pages_x,
            pages_y,
            add_debug_info,
        }
    }
}

impl PageFile for DebugPageFile {
    fn load_page(&self, id: PageId, packet: &mut PageRequestPacket) {
        packet.page_id = id;

        // Bit-reversed coordinates spread neighboring pages across the color
        // space, making tile boundaries obvious.
        let color = [
            overlay::reverse_byte(id.page_x()),
            overlay::reverse_byte(id.page_y()),
            overlay::reverse_byte((id.mip_level() + id.texture_index()).min(255)),
            0xFF,
        ];
        for pixel in packet.data.chunks_exact_mut(4) {
            pixel.copy_from_slice(&color);
        }

        if self.add_debug_info {
            overlay::add_debug_info_to_page(
                id.page_x(),
                id.page_y(),
                id.mip_level(),
                &mut packet.data,
                true,
                false,
                PAGE_SIZE_IN_PIXELS,
                PAGE_BORDER_SIZE_IN_PIXELS,
            );
        }
    }

    fn num_pages_x(&self) -> &[u32] {
        &self.pages_x
    }

    fn num_pages_y(&self) -> &[u32] {
        &self.pages_y
    }
}

// ======================================================================
// UnpackedPageFile
// ======================================================================

/// Reads one image per page from a directory tree laid out as
/// `<base>/level_<l>/page_<x>_<y>.png`, the layout the builder's image dump
/// produces.
pub struct UnpackedPageFile {
    base_dir: PathBuf,
    pages_x: Vec<u32>,
    pages_y: Vec<u32>,
    add_debug_info: bool,
}

impl UnpackedPageFile {
    /// A page file over an unpacked image dump with the given per-level page
    /// counts.
    pub fn new(base_dir: impl Into<PathBuf>, pages_x: Vec<u32>, pages_y: Vec<u32>) -> Self {
        Self {
            base_dir: base_dir.into(),
            pages_x,
            pages_y,
            add_debug_info: false,
        }
    }

    /// Enable the debug overlay on every loaded page.
    pub fn set_debug_info(&mut self, add_debug_info: bool) {
        self.add_debug_info = add_debug_info;
    }

    fn page_path(&self, id: PageId) -> PathBuf {
        self.base_dir
            .join(format!("level_{}", id.mip_level()))
            .join(format!("page_{}_{}.png", id.page_x(), id.page_y()))
    }
}

impl PageFile for UnpackedPageFile {
    fn load_page(&self, id: PageId, packet: &mut PageRequestPacket) {
        packet.page_id = id;

        let path = self.page_path(id);
        let image = match image::open(&path) {
            Ok(image) => image.to_rgba8(),
            Err(error) => {
                log::error!("UnpackedPageFile: failed to load {}: {}", path.display(), error);
                packet.data.fill(0);
                return;
            }
        };

        let pixels = image.as_raw();
        if pixels.len() < packet.data.len() {
            log::warn!(
                "UnpackedPageFile: page image {} too small ({} bytes)",
                path.display(),
                pixels.len()
            );
            packet.data.fill(0);
            packet.data[..pixels.len()].copy_from_slice(pixels);
        } else {
            packet.data.copy_from_slice(&pixels[..packet.data.len()]);
        }

        if self.add_debug_info {
            overlay::add_debug_info_to_page(
                id.page_x(),
                id.page_y(),
                id.mip_level(),
                &mut packet.data,
                true,
                false,
                PAGE_SIZE_IN_PIXELS,
                PAGE_BORDER_SIZE_IN_PIXELS,
            );
        }
    }

    fn num_pages_x(&self) -> &[u32] {
        &self.pages_x
    }

    fn num_pages_y(&self) -> &[u32] {
        &self.pages_y
    }
}
