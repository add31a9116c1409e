//! Mip Chain Construction
//!
//! Builds the full halving mip chain of a float image. The chain stops as
//! soon as either dimension reaches one texel; the base image is level 0.

use crate::filters::Filter;
use crate::float_image::FloatImage;

/// Build the mip chain of `base`, halving with `filter` until either
/// dimension reaches one texel. Level 0 is the base image itself.
pub fn build_mip_chain(base: FloatImage, filter: &dyn Filter) -> Vec<FloatImage> {
    let mut target_width = base.width();
    let mut target_height = base.height();

    let mut levels = vec![base];
    while target_width > 1 && target_height > 1 {
        target_width = (target_width / 2).max(1);
        target_height = (target_height / 2).max(1);

        let next = levels
            .last()
            .expect("chain starts with the base level")
            .resize(filter, target_width, target_height);
        levels.push(next);
    }

    levels
}
