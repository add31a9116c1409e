//! Page File Builder
//!
//! Turns a source image into a packed VTFF page file:
//! - load the image and convert it to a float buffer
//! - upsample it to dimensions evenly divisible by the page content size
//! - build the mip chain
//! - cut every level into bordered tiles
//! - write the VTFF output (and optionally dump every tile as a PNG)

use std::path::PathBuf;

use thiserror::Error;

use tessella_core::page_table::{
    PAGE_BORDER_SIZE_IN_PIXELS, PAGE_CONTENT_SIZE_IN_PIXELS, PAGE_SIZE_IN_PIXELS,
};
use tessella_core::MAX_MIP_LEVELS;
use tessella_io::format::{write_vtff, LevelPages, VtffError};
use tessella_io::overlay;

use crate::filters::FilterKind;
use crate::float_image::FloatImage;
use crate::mipmapper::build_mip_chain;

/// Builder errors; all fatal, reported with a diagnostic and a non-zero
/// exit code.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("invalid page geometry: page {page_size}px, content {content_size}px, border {border_size}px")]
    BadGeometry {
        page_size: u32,
        content_size: u32,
        border_size: u32,
    },

    #[error("invalid mip level limit {0}")]
    BadMaxLevels(u32),

    #[error("failed to load the input image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Vtff(#[from] VtffError),
}

/// Everything the builder can be told from the command line.
#[derive(Debug, Clone)]
pub struct PageFileBuilderOptions {
    pub filter: FilterKind,
    pub page_size: u32,
    pub content_size: u32,
    pub border_size: u32,
    pub max_levels: u32,
    pub flip_v_src: bool,
    pub flip_v_tiles: bool,
    pub stop_on_1_mip: bool,
    pub add_debug_info: bool,
    pub dump_images: bool,
}

impl Default for PageFileBuilderOptions {
    fn default() -> Self {
        Self {
            filter: FilterKind::Box,
            page_size: PAGE_SIZE_IN_PIXELS as u32,
            content_size: PAGE_CONTENT_SIZE_IN_PIXELS as u32,
            border_size: PAGE_BORDER_SIZE_IN_PIXELS as u32,
            max_levels: MAX_MIP_LEVELS as u32,
            flip_v_src: false,
            flip_v_tiles: false,
            stop_on_1_mip: false,
            add_debug_info: false,
            dump_images: false,
        }
    }
}

/// The tiles of one generated mip level.
struct MipLevelTiles {
    tiles_x: u32,
    tiles_y: u32,
    tiles: Vec<FloatImage>,
}

impl MipLevelTiles {
    fn tile_at(&self, x: u32, y: u32) -> &FloatImage {
        &self.tiles[(x + y * self.tiles_x) as usize]
    }
}

/// Builds one VTFF page file from one source image.
pub struct PageFileBuilder {
    input: PathBuf,
    output: PathBuf,
    options: PageFileBuilderOptions,
    levels: Vec<MipLevelTiles>,
}

impl PageFileBuilder {
    /// Validate options and prepare a builder.
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        options: PageFileBuilderOptions,
    ) -> Result<Self, BuildError> {
        if options.page_size == 0
            || options.content_size == 0
            || options.content_size + 2 * options.border_size != options.page_size
        {
            return Err(BuildError::BadGeometry {
                page_size: options.page_size,
                content_size: options.content_size,
                border_size: options.border_size,
            });
        }
        if options.max_levels == 0 || options.max_levels > MAX_MIP_LEVELS as u32 {
            return Err(BuildError::BadMaxLevels(options.max_levels));
        }

        Ok(Self {
            input: input.into(),
            output: output.into(),
            options,
            levels: Vec::new(),
        })
    }

    /// Run the full pipeline and write the output file.
    pub fn generate_page_file(&mut self) -> Result<(), BuildError> {
        log::info!("Loading source image {}", self.input.display());
        let source = image::open(&self.input)?.to_rgba8();
        let (width, height) = (source.width() as usize, source.height() as usize);
        let mut float_image = FloatImage::from_rgba8(width, height, source.as_raw());
        drop(source);

        let filter = self.options.filter.create();
        let content_size = self.options.content_size as usize;

        // The source must cut evenly into content-sized tiles at every
        // level; upsample to the nearest size that does.
        if width % content_size != 0 || height % content_size != 0 {
            let new_width = adjust_size(width, content_size);
            let new_height = adjust_size(height, content_size);
            log::info!(
                "Upsampling source image to a size evenly divisible by {}: {}x{}",
                content_size,
                new_width,
                new_height
            );
            float_image = float_image.resize(filter.as_ref(), new_width, new_height);
        }

        let mips = build_mip_chain(float_image, filter.as_ref());

        for (level, source) in mips.iter().take(self.options.max_levels as usize).enumerate() {
            if self.options.stop_on_1_mip
                && (source.width() < content_size || source.height() < content_size)
            {
                break;
            }
            self.levels.push(self.process_level(source, level));
        }

        self.write_page_file()
    }

    /// Cut one mip level into bordered page tiles.
    fn process_level(&self, source: &FloatImage, level: usize) -> MipLevelTiles {
        let content_size = self.options.content_size as i64;
        let border_size = self.options.border_size as i64;
        let page_size = self.options.page_size as usize;

        let tiles_x = (source.width() as f32 / content_size as f32).ceil() as u32;
        let tiles_y = (source.height() as f32 / content_size as f32).ceil() as u32;

        log::debug!(
            "Processing level {} ({}x{} tiles from {}x{} pixels)",
            level,
            tiles_x,
            tiles_y,
            source.width(),
            source.height()
        );

        let mut tiles = Vec::with_capacity((tiles_x * tiles_y) as usize);
        for y in 0..tiles_y as i64 {
            for x in 0..tiles_x as i64 {
                let mut tile = FloatImage::new(source.components(), page_size, page_size);
                source.copy_rect(
                    &mut tile,
                    x * content_size - border_size,
                    y * content_size - border_size,
                    0,
                    0,
                    page_size,
                    page_size,
                    self.options.flip_v_src,
                );
                if self.options.flip_v_tiles {
                    tile.flip_v_in_place();
                }
                tiles.push(tile);
            }
        }

        MipLevelTiles {
            tiles_x,
            tiles_y,
            tiles,
        }
    }

    fn write_page_file(&self) -> Result<(), BuildError> {
        log::info!(
            "Writing VTFF output {} with {} mipmap levels, page size {}px",
            self.output.display(),
            self.levels.len(),
            self.options.page_size
        );

        let level_pages: Vec<LevelPages> = self
            .levels
            .iter()
            .map(|level| LevelPages {
                num_pages_x: level.tiles_x,
                num_pages_y: level.tiles_y,
                pages: level.tiles.iter().map(|tile| tile.to_rgba8()).collect(),
            })
            .collect();

        let file = std::fs::File::create(&self.output)?;
        let mut writer = std::io::BufWriter::new(file);
        write_vtff(
            &mut writer,
            self.options.page_size,
            self.options.content_size,
            self.options.border_size,
            &level_pages,
        )?;

        if self.options.dump_images {
            self.dump_page_images()?;
        }

        Ok(())
    }

    /// Write every tile as `<output stem>/img_dump/level_<l>/page_<x>_<y>.png`,
    /// the layout `UnpackedPageFile` reads back.
    fn dump_page_images(&self) -> Result<(), BuildError> {
        let base_dir = self.output.with_extension("").join("img_dump");
        log::info!("Dumping every page image under {}", base_dir.display());

        let page_size = self.options.page_size as usize;
        for (level, tiles) in self.levels.iter().enumerate() {
            let level_dir = base_dir.join(format!("level_{level}"));
            std::fs::create_dir_all(&level_dir)?;

            for y in 0..tiles.tiles_y {
                for x in 0..tiles.tiles_x {
                    let mut pixels = tiles.tile_at(x, y).to_rgba8();
                    if self.options.add_debug_info {
                        overlay::add_debug_info_to_page(
                            x,
                            y,
                            level as u32,
                            &mut pixels,
                            true,
                            self.options.flip_v_tiles,
                            page_size,
                            self.options.border_size as usize,
                        );
                    }

                    let path = level_dir.join(format!("page_{x}_{y}.png"));
                    image::save_buffer(
                        &path,
                        &pixels,
                        self.options.page_size,
                        self.options.page_size,
                        image::ColorType::Rgba8,
                    )?;
                }
            }
        }

        Ok(())
    }
}

/// Grow `size` until it and its whole mip chain divide evenly into
/// content-sized tiles.
fn adjust_size(size: usize, tile_size: usize) -> usize {
    fn mip_sizes(mut size: usize, tile_size: usize) -> Vec<usize> {
        let mut sizes = Vec::new();
        while size > 0 && size >= tile_size {
            sizes.push(size);
            size /= 2;
        }
        sizes
    }

    if size % tile_size == 0 {
        return size;
    }

    let mut new_size = size;
    while new_size % tile_size != 0 {
        new_size += 1;
    }
    while !mip_sizes(new_size, tile_size).iter().all(|s| s % tile_size == 0) {
        new_size += 1;
        while new_size % tile_size != 0 {
            new_size += 1;
        }
    }

    new_size
}
