//! VTFF File Format
//!
//! Reader and writer for the packed page file format ("Virtual Texture File
//! Format", version 4). The file starts with a fixed header, then per level
//! (finest first) a level record followed by one page record per page in
//! row-major order, then the concatenated page pixel blobs at the offsets
//! the records declare. Everything is little-endian.
//!
//! The directory is read in two passes: the first validates every record,
//! the second populates the in-memory [`PageDirectory`] that gives constant
//! time file lookup per page.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use tessella_core::page_id::PageId;
use tessella_core::page_table::{
    PAGE_BORDER_SIZE_IN_PIXELS, PAGE_CONTENT_SIZE_IN_PIXELS, PAGE_SIZE_IN_PIXELS,
};
use tessella_core::MAX_MIP_LEVELS;

/// First four bytes of every VTFF file ("VTFF" read as a little-endian word).
pub const VTFF_MAGIC: u32 = 0x5654_4646;

/// Current file format version.
pub const VTFF_VERSION: u32 = 4;

/// Pixel formats a page file can declare. Only [`PixelFormat::RgbaU8`] is
/// supported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    RgbU8,
    RgbF32,
    RgbaU8,
    RgbaF32,
}

impl PixelFormat {
    /// Decode the on-disk enum value.
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::RgbU8),
            1 => Some(Self::RgbF32),
            2 => Some(Self::RgbaU8),
            3 => Some(Self::RgbaF32),
            _ => None,
        }
    }

    /// The on-disk enum value.
    pub fn as_u32(self) -> u32 {
        match self {
            Self::RgbU8 => 0,
            Self::RgbF32 => 1,
            Self::RgbaU8 => 2,
            Self::RgbaF32 => 3,
        }
    }
}

/// Errors raised while reading or writing a VTFF file. All of these are
/// fatal at page file construction time.
#[derive(Error, Debug)]
pub enum VtffError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a VTFF file (bad magic 0x{0:08x})")]
    BadMagic(u32),

    #[error("unsupported file version {0}")]
    BadVersion(u32),

    #[error("unsupported pixel format {0}; only 8-bit RGBA page files are supported")]
    UnsupportedPixelFormat(u32),

    #[error("mip level count {0} out of range")]
    BadLevelCount(u32),

    #[error("incompatible page layout: page {page_size}px, content {content_size}px, border {border_size}px")]
    BadPageLayout {
        page_size: u32,
        content_size: u32,
        border_size: u32,
    },

    #[error("level {level}: page count {count} is not a power of two")]
    PageCountNotPow2 { level: u32, count: u32 },

    #[error("level {level}: dimensions {width}x{height} are not divisible by the page size")]
    BadLevelDimensions { level: u32, width: u32, height: u32 },

    #[error("level {level}, page ({x}, {y}): unexpected page size of {size} bytes")]
    BadPageSize { level: u32, x: u32, y: u32, size: u32 },
}

/// The fixed 28-byte file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VtffHeader {
    pub pixel_format: PixelFormat,
    pub num_mip_levels: u32,
    pub page_content_size: u32,
    pub page_size: u32,
    pub border_size: u32,
}

impl VtffHeader {
    /// Serialized size in bytes.
    pub const SIZE_BYTES: u64 = 28;

    /// Read and validate magic and version; the remaining fields are
    /// validated by [`read_directory`].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, VtffError> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != VTFF_MAGIC {
            return Err(VtffError::BadMagic(magic));
        }

        let version = reader.read_u32::<LittleEndian>()?;
        if version != VTFF_VERSION {
            return Err(VtffError::BadVersion(version));
        }

        let pixel_format_raw = reader.read_u32::<LittleEndian>()?;
        let pixel_format =
            PixelFormat::from_u32(pixel_format_raw).ok_or(VtffError::UnsupportedPixelFormat(pixel_format_raw))?;

        Ok(Self {
            pixel_format,
            num_mip_levels: reader.read_u32::<LittleEndian>()?,
            page_content_size: reader.read_u32::<LittleEndian>()?,
            page_size: reader.read_u32::<LittleEndian>()?,
            border_size: reader.read_u32::<LittleEndian>()?,
        })
    }

    /// Serialize, magic and version included.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), VtffError> {
        writer.write_u32::<LittleEndian>(VTFF_MAGIC)?;
        writer.write_u32::<LittleEndian>(VTFF_VERSION)?;
        writer.write_u32::<LittleEndian>(self.pixel_format.as_u32())?;
        writer.write_u32::<LittleEndian>(self.num_mip_levels)?;
        writer.write_u32::<LittleEndian>(self.page_content_size)?;
        writer.write_u32::<LittleEndian>(self.page_size)?;
        writer.write_u32::<LittleEndian>(self.border_size)?;
        Ok(())
    }
}

/// Per-level record: pixel dimensions (borders included) and page counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipLevelInfo {
    pub width: u32,
    pub height: u32,
    pub num_pages_x: u16,
    pub num_pages_y: u16,
}

impl MipLevelInfo {
    /// Serialized size in bytes.
    pub const SIZE_BYTES: u64 = 12;

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, VtffError> {
        Ok(Self {
            width: reader.read_u32::<LittleEndian>()?,
            height: reader.read_u32::<LittleEndian>()?,
            num_pages_x: reader.read_u16::<LittleEndian>()?,
            num_pages_y: reader.read_u16::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), VtffError> {
        writer.write_u32::<LittleEndian>(self.width)?;
        writer.write_u32::<LittleEndian>(self.height)?;
        writer.write_u16::<LittleEndian>(self.num_pages_x)?;
        writer.write_u16::<LittleEndian>(self.num_pages_y)?;
        Ok(())
    }
}

/// Location of one page blob within the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageInfo {
    /// Absolute offset from the start of the file.
    pub file_offset: u64,
    /// Blob size; constant for uncompressed RGBA pages.
    pub size_in_bytes: u32,
}

impl PageInfo {
    /// Serialized size in bytes.
    pub const SIZE_BYTES: u64 = 12;

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, VtffError> {
        Ok(Self {
            file_offset: reader.read_u64::<LittleEndian>()?,
            size_in_bytes: reader.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), VtffError> {
        writer.write_u64::<LittleEndian>(self.file_offset)?;
        writer.write_u32::<LittleEndian>(self.size_in_bytes)?;
        Ok(())
    }
}

/// In-memory page directory: for every (level, x, y), where the page blob
/// lives in the file. One flattened record pool with per-level offsets.
pub struct PageDirectory {
    num_levels: usize,
    offsets: [usize; MAX_MIP_LEVELS],
    num_pages_x: [u32; MAX_MIP_LEVELS],
    num_pages_y: [u32; MAX_MIP_LEVELS],
    pages: Vec<PageInfo>,
}

impl PageDirectory {
    fn new(pages_x: &[u32], pages_y: &[u32]) -> Self {
        let num_levels = pages_x.len();
        assert!(num_levels > 0 && num_levels <= MAX_MIP_LEVELS);

        let mut offsets = [0usize; MAX_MIP_LEVELS];
        let mut num_pages_x = [0u32; MAX_MIP_LEVELS];
        let mut num_pages_y = [0u32; MAX_MIP_LEVELS];
        let mut total = 0usize;
        for level in 0..num_levels {
            offsets[level] = total;
            num_pages_x[level] = pages_x[level];
            num_pages_y[level] = pages_y[level];
            total += (pages_x[level] * pages_y[level]) as usize;
        }

        Self {
            num_levels,
            offsets,
            num_pages_x,
            num_pages_y,
            pages: vec![PageInfo::default(); total],
        }
    }

    fn set(&mut self, level: usize, x: u32, y: u32, info: PageInfo) {
        let index = self.offsets[level] + (x + y * self.num_pages_x[level]) as usize;
        self.pages[index] = info;
    }

    /// Where the page with this id lives, or `None` when the id is out of
    /// range for the file.
    pub fn get(&self, id: PageId) -> Option<PageInfo> {
        let level = id.mip_level() as usize;
        if level >= self.num_levels || id.page_x() >= self.num_pages_x[level] || id.page_y() >= self.num_pages_y[level]
        {
            return None;
        }
        let index = self.offsets[level] + (id.page_x() + id.page_y() * self.num_pages_x[level]) as usize;
        Some(self.pages[index])
    }

    /// Number of mip levels in the file.
    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    /// Per-level page counts along X, finest level first.
    pub fn num_pages_x(&self) -> &[u32] {
        &self.num_pages_x[..self.num_levels]
    }

    /// Per-level page counts along Y, finest level first.
    pub fn num_pages_y(&self) -> &[u32] {
        &self.num_pages_y[..self.num_levels]
    }
}

fn is_power_of_two(value: u32) -> bool {
    value != 0 && (value & (value - 1)) == 0
}

/// Parse and validate a VTFF stream, producing the header and the page
/// directory. Two passes over the directory region: validate, then populate.
pub fn read_directory<R: Read + Seek>(reader: &mut R) -> Result<(VtffHeader, PageDirectory), VtffError> {
    let header = VtffHeader::read_from(reader)?;

    if header.num_mip_levels == 0 || header.num_mip_levels as usize > MAX_MIP_LEVELS {
        return Err(VtffError::BadLevelCount(header.num_mip_levels));
    }
    if header.page_size != PAGE_SIZE_IN_PIXELS as u32
        || header.border_size != PAGE_BORDER_SIZE_IN_PIXELS as u32
        || header.page_content_size != PAGE_CONTENT_SIZE_IN_PIXELS as u32
    {
        return Err(VtffError::BadPageLayout {
            page_size: header.page_size,
            content_size: header.page_content_size,
            border_size: header.border_size,
        });
    }
    if header.pixel_format != PixelFormat::RgbaU8 {
        return Err(VtffError::UnsupportedPixelFormat(header.pixel_format.as_u32()));
    }

    let expected_page_bytes = header.page_size * header.page_size * 4;
    let directory_start = reader.stream_position()?;

    // Pass one: validate every level and page record, collecting dimensions.
    let mut pages_x = Vec::with_capacity(header.num_mip_levels as usize);
    let mut pages_y = Vec::with_capacity(header.num_mip_levels as usize);
    for level in 0..header.num_mip_levels {
        let info = MipLevelInfo::read_from(reader)?;

        if !is_power_of_two(info.num_pages_x as u32) {
            return Err(VtffError::PageCountNotPow2 {
                level,
                count: info.num_pages_x as u32,
            });
        }
        if !is_power_of_two(info.num_pages_y as u32) {
            return Err(VtffError::PageCountNotPow2 {
                level,
                count: info.num_pages_y as u32,
            });
        }
        if info.width % header.page_size != 0 || info.height % header.page_size != 0 {
            return Err(VtffError::BadLevelDimensions {
                level,
                width: info.width,
                height: info.height,
            });
        }

        for y in 0..info.num_pages_y as u32 {
            for x in 0..info.num_pages_x as u32 {
                let page = PageInfo::read_from(reader)?;
                if page.size_in_bytes != expected_page_bytes {
                    return Err(VtffError::BadPageSize {
                        level,
                        x,
                        y,
                        size: page.size_in_bytes,
                    });
                }
            }
        }

        pages_x.push(info.num_pages_x as u32);
        pages_y.push(info.num_pages_y as u32);
    }

    // Pass two: read the records again into the directory.
    reader.seek(SeekFrom::Start(directory_start))?;
    let mut directory = PageDirectory::new(&pages_x, &pages_y);
    for level in 0..header.num_mip_levels as usize {
        let info = MipLevelInfo::read_from(reader)?;
        for y in 0..info.num_pages_y as u32 {
            for x in 0..info.num_pages_x as u32 {
                directory.set(level, x, y, PageInfo::read_from(reader)?);
            }
        }
    }

    Ok((header, directory))
}

/// Pages of one mip level, row-major. Every blob must be exactly
/// `page_size * page_size * 4` bytes.
pub struct LevelPages {
    pub num_pages_x: u32,
    pub num_pages_y: u32,
    pub pages: Vec<Vec<u8>>,
}

/// Write a complete VTFF file: header, directory, then every page blob at
/// the offset its record declares. Levels are expected finest first.
pub fn write_vtff<W: Write>(
    writer: &mut W,
    page_size: u32,
    content_size: u32,
    border_size: u32,
    levels: &[LevelPages],
) -> Result<(), VtffError> {
    assert!(!levels.is_empty());

    let header = VtffHeader {
        pixel_format: PixelFormat::RgbaU8,
        num_mip_levels: levels.len() as u32,
        page_content_size: content_size,
        page_size,
        border_size,
    };
    header.write_to(writer)?;

    let page_size_bytes = page_size * page_size * 4;

    // The blobs start right after the header and the full directory.
    let mut page_data_start = VtffHeader::SIZE_BYTES;
    for level in levels {
        assert_eq!(level.pages.len(), (level.num_pages_x * level.num_pages_y) as usize);
        page_data_start += MipLevelInfo::SIZE_BYTES;
        page_data_start += PageInfo::SIZE_BYTES * level.pages.len() as u64;
    }

    let mut pages_so_far = 0u64;
    for level in levels {
        let info = MipLevelInfo {
            width: level.num_pages_x * page_size,
            height: level.num_pages_y * page_size,
            num_pages_x: level.num_pages_x as u16,
            num_pages_y: level.num_pages_y as u16,
        };
        info.write_to(writer)?;

        for _ in 0..level.pages.len() {
            let page = PageInfo {
                file_offset: page_data_start + pages_so_far * page_size_bytes as u64,
                size_in_bytes: page_size_bytes,
            };
            page.write_to(writer)?;
            pages_so_far += 1;
        }
    }

    for level in levels {
        for page in &level.pages {
            assert_eq!(page.len(), page_size_bytes as usize);
            writer.write_all(page)?;
        }
    }

    Ok(())
}
