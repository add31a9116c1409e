//! Debug Image Dumps
//!
//! Writes the runtime tables to PNG files for inspection. Slow; intended
//! for debugging the streaming pipeline, not for per-frame use.

use std::path::Path;

use tessella_core::indirection::PageIndirectionTable;
use tessella_core::page_table::{PageTable, TABLE_SIZE_IN_PIXELS};

use crate::overlay::reverse_byte;

/// Write mip level 0 of a page table to a PNG file.
pub fn dump_page_table(table: &PageTable, path: impl AsRef<Path>) -> image::ImageResult<()> {
    image::save_buffer(
        path,
        table.level0(),
        TABLE_SIZE_IN_PIXELS as u32,
        TABLE_SIZE_IN_PIXELS as u32,
        image::ColorType::Rgba8,
    )
}

/// Write every level of an indirection table to `<prefix>_<level>.png`.
///
/// With `recolor` the texel bits are bit-reversed first so the mostly-dark
/// slot indices become visible.
pub fn dump_indirection_table(
    table: &PageIndirectionTable,
    path_prefix: impl AsRef<Path>,
    recolor: bool,
) -> image::ImageResult<()> {
    let prefix = path_prefix.as_ref();

    for level in 0..table.num_levels() {
        let mut texels = table.level_texels_rgba(level);

        if recolor {
            for pixel in texels.chunks_exact_mut(4) {
                let r = reverse_byte(pixel[0] as u32);
                let g = reverse_byte(pixel[1] as u32);
                let b = reverse_byte(pixel[2] as u32);
                let a = reverse_byte(pixel[3] as u32);
                pixel[0] = r;
                pixel[1] = g;
                pixel[2] = (b as u32 + a as u32).min(255) as u8;
                pixel[3] = 0xFF;
            }
        }

        let path = prefix.with_file_name(format!(
            "{}_{}.png",
            prefix.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            level
        ));
        image::save_buffer(
            &path,
            &texels,
            table.num_pages_x(level),
            table.num_pages_y(level),
            image::ColorType::Rgba8,
        )?;
        log::info!("Wrote indirection level {} to {}", level, path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessella_core::IndirectionTableFormat;

    #[test]
    fn test_dump_indirection_levels() {
        let pages = [4u32, 2, 1];
        let table = PageIndirectionTable::with_format(IndirectionTableFormat::Rgba8888, &pages, &pages);

        let dir = std::env::temp_dir().join("tessella_dump_test");
        std::fs::create_dir_all(&dir).unwrap();
        let prefix = dir.join("indirection");

        dump_indirection_table(&table, &prefix, true).unwrap();

        for level in 0..3 {
            let path = dir.join(format!("indirection_{level}.png"));
            assert!(path.exists());
            std::fs::remove_file(path).unwrap();
        }
        let _ = std::fs::remove_dir(&dir);
    }
}
