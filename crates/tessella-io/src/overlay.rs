//! Page Debug Overlay
//!
//! Stamps the page coordinates as pixel-font text onto a loaded page and
//! outlines the content area with a one-pixel border. The border makes the
//! page padding easy to spot; the text color doubles as a mip level color
//! code.

/// Glyph height in pixels. Glyphs are column-encoded: one byte per column,
/// bit N set draws the pixel in row N.
const GLYPH_ROWS: usize = 8;

/// The characters the overlay prints. A full font is not needed here.
fn glyph_columns(ch: char) -> &'static [u8] {
    match ch {
        ' ' => &[0x00, 0x00, 0x00],
        ':' => &[0x14],
        '0' => &[0x3E, 0x51, 0x49, 0x45, 0x3E],
        '1' => &[0x00, 0x42, 0x7F, 0x40, 0x00],
        '2' => &[0x62, 0x51, 0x49, 0x49, 0x46],
        '3' => &[0x22, 0x41, 0x49, 0x49, 0x36],
        '4' => &[0x18, 0x14, 0x12, 0x7F, 0x10],
        '5' => &[0x27, 0x49, 0x49, 0x49, 0x31],
        '6' => &[0x3C, 0x4A, 0x49, 0x49, 0x30],
        '7' => &[0x01, 0x71, 0x09, 0x05, 0x03],
        '8' => &[0x36, 0x49, 0x49, 0x49, 0x36],
        '9' => &[0x06, 0x49, 0x49, 0x29, 0x1E],
        'L' => &[0x7F, 0x40, 0x40, 0x40],
        'X' => &[0x63, 0x14, 0x08, 0x14, 0x63],
        'Y' => &[0x07, 0x08, 0x70, 0x08, 0x07],
        _ => &[],
    }
}

/// RGBA text/border colors, keyed by mip level.
const MIP_LEVEL_COLORS: [[u8; 4]; 16] = [
    [255, 255, 165, 255], // light yellow
    [70, 225, 165, 255],  // light green
    [70, 140, 200, 255],  // mild blue
    [70, 110, 40, 255],   // olive green
    [160, 70, 40, 255],   // clay/brown
    [190, 40, 30, 255],   // copper/red
    [255, 0, 0, 255],     // pure red
    [190, 0, 255, 255],   // violet
    [100, 0, 255, 255],   // bluish
    [0, 0, 255, 255],     // pure blue
    [0, 190, 20, 255],    // dark green
    [0, 200, 200, 255],   // teal
    [55, 85, 90, 255],    // grayish-blue
    [80, 40, 40, 255],    // grayish-red
    [0, 80, 40, 255],     // grayish-green
    [0, 0, 0, 255],       // pure black
];

/// The overlay color used for `level` (the last color covers everything
/// beyond the table).
pub fn mip_level_color(level: u32) -> [u8; 4] {
    MIP_LEVEL_COLORS[(level as usize).min(MIP_LEVEL_COLORS.len() - 1)]
}

/// Reverse the bits of a byte (not the same as `!`).
//
// https://graphics.stanford.edu/~seander/bithacks.html#ReverseByteWith64Bits
pub(crate) fn reverse_byte(b: u32) -> u8 {
    ((((b as u64).wrapping_mul(0x8020_0802) & 0x08_8442_2110).wrapping_mul(0x01_0101_0101)) >> 32) as u8
}

/// Draw one glyph into an RGBA8 page at the given pixel position. Returns
/// the number of columns drawn.
fn draw_char(page: &mut [u8], page_size: usize, x: usize, y: usize, ch: char, color: [u8; 4], flip: bool) -> usize {
    let columns = glyph_columns(ch);

    for (i, &bits) in columns.iter().enumerate() {
        for row in 0..GLYPH_ROWS {
            let bit = if flip { GLYPH_ROWS - 1 - row } else { row };
            if bits & (1 << bit) == 0 {
                continue;
            }
            let px = x + i;
            let py = y + row;
            if px >= page_size || py >= page_size {
                continue;
            }
            let offset = (py * page_size + px) * 4;
            page[offset..offset + 4].copy_from_slice(&color);
        }
    }

    columns.len()
}

/// Stamp "L:/X:/Y:" coordinates and (optionally) the content border onto an
/// RGBA8 page.
pub fn add_debug_info_to_page(
    x: u32,
    y: u32,
    level: u32,
    page: &mut [u8],
    draw_page_border: bool,
    flip_text: bool,
    page_size: usize,
    border_size: usize,
) {
    let color = mip_level_color(level);
    let text = format!("L: {level}\nX: {x}\nY: {y}");

    let mut start_x = border_size + 3;
    // Three pixels between lines.
    let mut start_y = (page_size - 1) - border_size - (GLYPH_ROWS + 3);

    for ch in text.chars() {
        if ch == '\n' {
            start_x = border_size + 3;
            start_y = start_y.saturating_sub(GLYPH_ROWS + 3);
            continue;
        }
        let columns = draw_char(page, page_size, start_x, start_y, ch, color, flip_text);
        start_x += columns + 1;
    }

    if draw_page_border {
        let first = border_size;
        let last = page_size - border_size - 1;
        for i in first..=last {
            for &(px, py) in &[(i, first), (i, last), (first, i), (last, i)] {
                let offset = (py * page_size + px) * 4;
                page[offset..offset + 4].copy_from_slice(&color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessella_core::page_table::{PAGE_BORDER_SIZE_IN_PIXELS, PAGE_PAYLOAD_BYTES, PAGE_SIZE_IN_PIXELS};

    #[test]
    fn test_reverse_byte() {
        assert_eq!(reverse_byte(0x00), 0x00);
        assert_eq!(reverse_byte(0xFF), 0xFF);
        assert_eq!(reverse_byte(0x01), 0x80);
        assert_eq!(reverse_byte(0x80), 0x01);
        assert_eq!(reverse_byte(0xA5), 0xA5);
        assert_eq!(reverse_byte(0x12), 0x48);
    }

    #[test]
    fn test_border_is_drawn_on_content_edge() {
        let mut page = vec![0u8; PAGE_PAYLOAD_BYTES];
        add_debug_info_to_page(
            1,
            2,
            0,
            &mut page,
            true,
            false,
            PAGE_SIZE_IN_PIXELS,
            PAGE_BORDER_SIZE_IN_PIXELS,
        );

        let color = mip_level_color(0);
        let first = PAGE_BORDER_SIZE_IN_PIXELS;
        let last = PAGE_SIZE_IN_PIXELS - PAGE_BORDER_SIZE_IN_PIXELS - 1;

        let pixel = |x: usize, y: usize| {
            let o = (y * PAGE_SIZE_IN_PIXELS + x) * 4;
            [page[o], page[o + 1], page[o + 2], page[o + 3]]
        };

        assert_eq!(pixel(first, first), color);
        assert_eq!(pixel(last, first), color);
        assert_eq!(pixel(first, last), color);
        assert_eq!(pixel(last, last), color);

        // The outermost border padding stays untouched.
        assert_eq!(pixel(0, 0), [0, 0, 0, 0]);
        assert_eq!(pixel(first - 1, first), [0, 0, 0, 0]);
    }

    #[test]
    fn test_text_is_stamped() {
        let mut page = vec![0u8; PAGE_PAYLOAD_BYTES];
        add_debug_info_to_page(
            3,
            7,
            1,
            &mut page,
            false,
            false,
            PAGE_SIZE_IN_PIXELS,
            PAGE_BORDER_SIZE_IN_PIXELS,
        );

        // Some pixels must carry the level color now.
        let color = mip_level_color(1);
        let stamped = page.chunks_exact(4).any(|p| p == &color[..]);
        assert!(stamped);
    }

    #[test]
    fn test_level_colors_saturate() {
        assert_eq!(mip_level_color(15), mip_level_color(200));
        assert_ne!(mip_level_color(0), mip_level_color(1));
    }
}
