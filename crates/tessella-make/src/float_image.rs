//! Float Image Buffer
//!
//! Channel-planar f32 image used throughout the builder pipeline. Keeping
//! the channels planar makes the separable polyphase resampling a straight
//! run over contiguous memory. Addressing outside the image clamps to the
//! edge, which is exactly what page border extraction needs.

use crate::filters::{Filter, PolyphaseKernel};

/// A planar floating-point image with 1 to 4 channels.
#[derive(Clone)]
pub struct FloatImage {
    width: usize,
    height: usize,
    components: usize,
    data: Vec<f32>,
}

impl FloatImage {
    /// A zeroed image.
    pub fn new(components: usize, width: usize, height: usize) -> Self {
        assert!(components > 0 && components <= 4);
        assert!(width > 0 && height > 0);
        Self {
            width,
            height,
            components,
            data: vec![0.0; components * width * height],
        }
    }

    /// Import interleaved RGBA8 pixels.
    pub fn from_rgba8(width: usize, height: usize, pixels: &[u8]) -> Self {
        assert_eq!(pixels.len(), width * height * 4);
        let mut image = Self::new(4, width, height);
        for c in 0..4 {
            let channel = image.channel_range(c);
            for (i, value) in pixels.iter().skip(c).step_by(4).enumerate() {
                image.data[channel.start + i] = *value as f32 / 255.0;
            }
        }
        image
    }

    /// Export interleaved RGBA8 pixels, clamping each channel.
    pub fn to_rgba8(&self) -> Vec<u8> {
        assert!(self.components >= 3);
        let pixel_count = self.width * self.height;
        let mut out = vec![0u8; pixel_count * 4];

        for i in 0..pixel_count {
            for c in 0..4 {
                out[i * 4 + c] = if c < self.components {
                    let value = self.data[c * pixel_count + i];
                    ((255.0 * value) as i32).clamp(0, 255) as u8
                } else {
                    0xFF
                };
            }
        }
        out
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn components(&self) -> usize {
        self.components
    }

    /// One channel plane, row-major.
    pub fn channel(&self, c: usize) -> &[f32] {
        let range = self.channel_range(c);
        &self.data[range]
    }

    /// Mutable channel plane.
    pub fn channel_mut(&mut self, c: usize) -> &mut [f32] {
        let range = self.channel_range(c);
        &mut self.data[range]
    }

    fn channel_range(&self, c: usize) -> std::ops::Range<usize> {
        assert!(c < self.components);
        let pixel_count = self.width * self.height;
        c * pixel_count..(c + 1) * pixel_count
    }

    /// Row-major index of (x, y), clamped to the image edges.
    fn clamped_index(&self, x: i64, y: i64) -> usize {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        y * self.width + x
    }

    /// Resample to a new size with the given filter, horizontal pass then
    /// vertical pass.
    pub fn resize(&self, filter: &dyn Filter, new_width: usize, new_height: usize) -> FloatImage {
        let x_kernel = PolyphaseKernel::new(filter, self.width as u32, new_width as u32, 32);
        let y_kernel = PolyphaseKernel::new(filter, self.height as u32, new_height as u32, 32);

        let mut temp = FloatImage::new(self.components, new_width, self.height);
        let mut dest = FloatImage::new(self.components, new_width, new_height);
        let mut column = vec![0.0f32; new_height];

        for c in 0..self.components {
            for y in 0..self.height {
                let row_start = y * new_width;
                let mut row = vec![0.0f32; new_width];
                self.apply_kernel_horizontal(&x_kernel, y as i64, c, &mut row);
                temp.channel_mut(c)[row_start..row_start + new_width].copy_from_slice(&row);
            }

            for x in 0..new_width {
                temp.apply_kernel_vertical(&y_kernel, x as i64, c, &mut column);
                let dest_channel = dest.channel_mut(c);
                for (y, value) in column.iter().enumerate() {
                    dest_channel[y * new_width + x] = *value;
                }
            }
        }

        dest
    }

    fn apply_kernel_horizontal(&self, kernel: &PolyphaseKernel, y: i64, c: usize, output: &mut [f32]) {
        let inverse_scale = self.width as f32 / kernel.length() as f32;
        let width = kernel.width();
        let channel = self.channel(c);

        for (i, out) in output.iter_mut().enumerate() {
            let center = (0.5 + i as f32) * inverse_scale;
            let left = (center - width).floor() as i64;

            let mut sum = 0.0;
            for j in 0..kernel.window_size() {
                let index = self.clamped_index(left + j as i64, y);
                sum += kernel.value_at(i, j) * channel[index];
            }
            *out = sum;
        }
    }

    fn apply_kernel_vertical(&self, kernel: &PolyphaseKernel, x: i64, c: usize, output: &mut [f32]) {
        let inverse_scale = self.height as f32 / kernel.length() as f32;
        let width = kernel.width();
        let channel = self.channel(c);

        for (i, out) in output.iter_mut().enumerate() {
            let center = (0.5 + i as f32) * inverse_scale;
            let left = (center - width).floor() as i64;

            let mut sum = 0.0;
            for j in 0..kernel.window_size() {
                let index = self.clamped_index(x, left + j as i64);
                sum += kernel.value_at(i, j) * channel[index];
            }
            *out = sum;
        }
    }

    /// Copy a rectangle into `dest` at `(dest_x, dest_y)`. Source reads are
    /// clamp-addressed, so the rectangle may hang over the source edges
    /// (page borders rely on this). With `flip_source_v` the source is read
    /// upside down.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_rect(
        &self,
        dest: &mut FloatImage,
        x_offset: i64,
        y_offset: i64,
        dest_x: usize,
        dest_y: usize,
        rect_width: usize,
        rect_height: usize,
        flip_source_v: bool,
    ) {
        assert!(rect_width > 0 && rect_height > 0);
        assert_eq!(self.components, dest.components);
        assert!(dest_x + rect_width <= dest.width);
        assert!(dest_y + rect_height <= dest.height);

        for c in 0..self.components {
            for dy in 0..rect_height {
                let sy = y_offset + dy as i64;
                let sy = if flip_source_v { self.height as i64 - 1 - sy } else { sy };
                for dx in 0..rect_width {
                    let source = self.channel(c)[self.clamped_index(x_offset + dx as i64, sy)];
                    let dest_index = (dest_y + dy) * dest.width + (dest_x + dx);
                    dest.channel_mut(c)[dest_index] = source;
                }
            }
        }
    }

    /// Flip the image upside down in place.
    pub fn flip_v_in_place(&mut self) {
        for c in 0..self.components {
            let width = self.width;
            let height = self.height;
            let channel = self.channel_mut(c);
            for y in 0..height / 2 {
                for x in 0..width {
                    channel.swap(y * width + x, (height - 1 - y) * width + x);
                }
            }
        }
    }
}
