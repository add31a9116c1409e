//! Resampling Filters
//!
//! The filter kernels used for mip chain construction and source
//! upsampling, after the NVIDIA Texture Tools filter set. Each filter is a
//! windowed weighting function; the polyphase kernel samples and
//! normalizes it per output column.

use clap::ValueEnum;

const PI: f32 = std::f32::consts::PI;

/// A windowed reconstruction filter.
pub trait Filter {
    /// Half-width of the filter support.
    fn width(&self) -> f32;

    /// The filter weight at `x`.
    fn evaluate(&self, x: f32) -> f32;

    /// Box-sample the filter over one output texel.
    fn sample_box(&self, x: f32, scale: f32, samples: u32) -> f32 {
        let inverse = 1.0 / samples as f32;
        let mut sum = 0.0;
        for s in 0..samples {
            let p = (x + (s as f32 + 0.5) * inverse) * scale;
            sum += self.evaluate(p);
        }
        sum * inverse
    }
}

/// The filters selectable on the builder command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FilterKind {
    #[default]
    #[value(name = "box")]
    Box,
    #[value(name = "tri")]
    Triangle,
    #[value(name = "quad")]
    Quadratic,
    #[value(name = "cubic")]
    Cubic,
    #[value(name = "bspline")]
    BSpline,
    #[value(name = "mitchell")]
    Mitchell,
    #[value(name = "lanczos")]
    Lanczos,
    #[value(name = "sinc")]
    Sinc,
    #[value(name = "kaiser")]
    Kaiser,
}

impl FilterKind {
    /// Instantiate the concrete filter.
    pub fn create(self) -> Box<dyn Filter> {
        match self {
            Self::Box => Box::new(BoxFilter::new()),
            Self::Triangle => Box::new(TriangleFilter::new()),
            Self::Quadratic => Box::new(QuadraticFilter),
            Self::Cubic => Box::new(CubicFilter),
            Self::BSpline => Box::new(BSplineFilter),
            Self::Mitchell => Box::new(MitchellFilter::new()),
            Self::Lanczos => Box::new(LanczosFilter),
            Self::Sinc => Box::new(SincFilter::new(3.0)),
            Self::Kaiser => Box::new(KaiserFilter::new(3.0)),
        }
    }
}

/// sinc(x) = sin(x) / x, series-expanded near zero.
fn sinc(x: f32) -> f32 {
    if x.abs() < 0.0001 {
        1.0 + x * x * (-1.0 / 6.0 + x * x * 1.0 / 120.0)
    } else {
        x.sin() / x
    }
}

/// Bessel function of the first kind, order zero.
fn bessel0(x: f32) -> f32 {
    const EPSILON_RATIO: f32 = 1e-6;

    let xh = 0.5 * x;
    let mut sum = 1.0;
    let mut pow = 1.0;
    let mut ds = 1.0;
    let mut k = 0;

    while ds > sum * EPSILON_RATIO {
        k += 1;
        pow *= xh / k as f32;
        ds = pow * pow;
        sum += ds;
    }

    sum
}

pub struct BoxFilter {
    width: f32,
}

impl BoxFilter {
    pub fn new() -> Self {
        Self { width: 0.5 }
    }
}

impl Filter for BoxFilter {
    fn width(&self) -> f32 {
        self.width
    }

    fn evaluate(&self, x: f32) -> f32 {
        if x.abs() <= self.width {
            1.0
        } else {
            0.0
        }
    }
}

pub struct TriangleFilter {
    width: f32,
}

impl TriangleFilter {
    pub fn new() -> Self {
        Self { width: 1.0 }
    }
}

impl Filter for TriangleFilter {
    fn width(&self) -> f32 {
        self.width
    }

    fn evaluate(&self, x: f32) -> f32 {
        let x = x.abs();
        if x < self.width {
            self.width - x
        } else {
            0.0
        }
    }
}

/// Quadratic (bell) filter.
pub struct QuadraticFilter;

impl Filter for QuadraticFilter {
    fn width(&self) -> f32 {
        1.5
    }

    fn evaluate(&self, x: f32) -> f32 {
        let x = x.abs();
        if x < 0.5 {
            0.75 - x * x
        } else if x < 1.5 {
            let t = x - 1.5;
            0.5 * t * t
        } else {
            0.0
        }
    }
}

/// Cubic: f(t) = 2|t|^3 - 3|t|^2 + 1 on [-1, 1].
pub struct CubicFilter;

impl Filter for CubicFilter {
    fn width(&self) -> f32 {
        1.0
    }

    fn evaluate(&self, x: f32) -> f32 {
        let x = x.abs();
        if x < 1.0 {
            (2.0 * x - 3.0) * x * x + 1.0
        } else {
            0.0
        }
    }
}

/// Cubic B-spline.
pub struct BSplineFilter;

impl Filter for BSplineFilter {
    fn width(&self) -> f32 {
        2.0
    }

    fn evaluate(&self, x: f32) -> f32 {
        let x = x.abs();
        if x < 1.0 {
            (4.0 + x * x * (-6.0 + x * 3.0)) / 6.0
        } else if x < 2.0 {
            let t = 2.0 - x;
            t * t * t / 6.0
        } else {
            0.0
        }
    }
}

/// Mitchell & Netravali's two-parameter cubic, B = C = 1/3.
pub struct MitchellFilter {
    p0: f32,
    p2: f32,
    p3: f32,
    q0: f32,
    q1: f32,
    q2: f32,
    q3: f32,
}

impl MitchellFilter {
    pub fn new() -> Self {
        let mut filter = Self {
            p0: 0.0,
            p2: 0.0,
            p3: 0.0,
            q0: 0.0,
            q1: 0.0,
            q2: 0.0,
            q3: 0.0,
        };
        filter.set_parameters(1.0 / 3.0, 1.0 / 3.0);
        filter
    }

    pub fn set_parameters(&mut self, b: f32, c: f32) {
        self.p0 = (6.0 - 2.0 * b) / 6.0;
        self.p2 = (-18.0 + 12.0 * b + 6.0 * c) / 6.0;
        self.p3 = (12.0 - 9.0 * b - 6.0 * c) / 6.0;
        self.q0 = (8.0 * b + 24.0 * c) / 6.0;
        self.q1 = (-12.0 * b - 48.0 * c) / 6.0;
        self.q2 = (6.0 * b + 30.0 * c) / 6.0;
        self.q3 = (-b - 6.0 * c) / 6.0;
    }
}

impl Filter for MitchellFilter {
    fn width(&self) -> f32 {
        2.0
    }

    fn evaluate(&self, x: f32) -> f32 {
        let x = x.abs();
        if x < 1.0 {
            self.p0 + x * x * (self.p2 + x * self.p3)
        } else if x < 2.0 {
            self.q0 + x * (self.q1 + x * (self.q2 + x * self.q3))
        } else {
            0.0
        }
    }
}

/// Lanczos-3 windowed sinc.
pub struct LanczosFilter;

impl Filter for LanczosFilter {
    fn width(&self) -> f32 {
        3.0
    }

    fn evaluate(&self, x: f32) -> f32 {
        let x = x.abs();
        if x < 3.0 {
            sinc(PI * x) * sinc(PI * x / 3.0)
        } else {
            0.0
        }
    }
}

pub struct SincFilter {
    width: f32,
}

impl SincFilter {
    pub fn new(width: f32) -> Self {
        Self { width }
    }
}

impl Filter for SincFilter {
    fn width(&self) -> f32 {
        self.width
    }

    fn evaluate(&self, x: f32) -> f32 {
        sinc(PI * x)
    }
}

/// Kaiser-windowed sinc, alpha 4.
pub struct KaiserFilter {
    width: f32,
    alpha: f32,
    stretch: f32,
}

impl KaiserFilter {
    pub fn new(width: f32) -> Self {
        Self {
            width,
            alpha: 4.0,
            stretch: 1.0,
        }
    }
}

impl Filter for KaiserFilter {
    fn width(&self) -> f32 {
        self.width
    }

    fn evaluate(&self, x: f32) -> f32 {
        let sinc_value = sinc(PI * x * self.stretch);
        let t = x / self.width;
        if 1.0 - t * t >= 0.0 {
            sinc_value * bessel0(self.alpha * (1.0 - t * t).sqrt()) / bessel0(self.alpha)
        } else {
            0.0
        }
    }
}

/// A 1-D polyphase kernel: per output column, the normalized filter weights
/// over its source window.
pub struct PolyphaseKernel {
    window_size: usize,
    length: usize,
    width: f32,
    data: Vec<f32>,
}

impl PolyphaseKernel {
    /// Build the kernel for resampling `src_length` texels down (or up) to
    /// `dst_length`.
    pub fn new(filter: &dyn Filter, src_length: u32, dst_length: u32, samples: u32) -> Self {
        assert!(samples > 0);

        let mut scale = dst_length as f32 / src_length as f32;
        let inverse_scale = 1.0 / scale;
        let mut samples = samples;

        if scale > 1.0 {
            // Upsampling: reconstruct at unit scale.
            samples = 1;
            scale = 1.0;
        }

        let length = dst_length as usize;
        let width = filter.width() * inverse_scale;
        let window_size = (width * 2.0).ceil() as usize + 1;

        let mut data = vec![0.0f32; window_size * length];

        for i in 0..length {
            let center = (0.5 + i as f32) * inverse_scale;
            let left = (center - width).floor() as i64;

            let mut total = 0.0;
            for j in 0..window_size {
                let sample = filter.sample_box(left as f32 + j as f32 - center, scale, samples);
                data[i * window_size + j] = sample;
                total += sample;
            }

            for j in 0..window_size {
                data[i * window_size + j] /= total;
            }
        }

        Self {
            window_size,
            length,
            width,
            data,
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    /// The normalized weight of window position `x` for output column
    /// `column`.
    pub fn value_at(&self, column: usize, x: usize) -> f32 {
        debug_assert!(column < self.length && x < self.window_size);
        self.data[column * self.window_size + x]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_are_centered() {
        for kind in [
            FilterKind::Box,
            FilterKind::Triangle,
            FilterKind::Quadratic,
            FilterKind::Cubic,
            FilterKind::BSpline,
            FilterKind::Mitchell,
            FilterKind::Lanczos,
            FilterKind::Sinc,
            FilterKind::Kaiser,
        ] {
            let filter = kind.create();
            assert!(filter.evaluate(0.0) > 0.0, "{kind:?} must be positive at the center");
            assert!(filter.width() > 0.0);
            // Past the support the weight vanishes (the pure sinc never
            // reaches zero; its window handles that).
            if kind != FilterKind::Sinc {
                assert_eq!(filter.evaluate(filter.width() + 1.0), 0.0, "{kind:?}");
            }
        }
    }

    #[test]
    fn test_kernel_weights_are_normalized() {
        let filter = FilterKind::Lanczos.create();
        let kernel = PolyphaseKernel::new(filter.as_ref(), 64, 32, 32);
        assert_eq!(kernel.length(), 32);

        for column in 0..kernel.length() {
            let sum: f32 = (0..kernel.window_size()).map(|x| kernel.value_at(column, x)).sum();
            assert!((sum - 1.0).abs() < 1e-4, "column {column} sums to {sum}");
        }
    }

    #[test]
    fn test_box_downsample_kernel_is_uniform() {
        let filter = FilterKind::Box.create();
        let kernel = PolyphaseKernel::new(filter.as_ref(), 8, 4, 32);

        // A 2:1 box kernel averages two texels with equal weight.
        for column in 0..kernel.length() {
            let weights: Vec<f32> = (0..kernel.window_size())
                .map(|x| kernel.value_at(column, x))
                .filter(|w| *w > 0.0)
                .collect();
            assert_eq!(weights.len(), 2);
            for weight in weights {
                assert!((weight - 0.5).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_sinc_series_expansion() {
        assert!((sinc(0.0) - 1.0).abs() < 1e-6);
        assert!((sinc(PI) - 0.0).abs() < 1e-6);
        // Continuity across the series-expansion threshold.
        assert!((sinc(0.00011) - sinc(0.00009)).abs() < 1e-5);
    }

    #[test]
    fn test_bessel0() {
        assert!((bessel0(0.0) - 1.0).abs() < 1e-6);
        // I0(1) is about 1.2660658.
        assert!((bessel0(1.0) - 1.266_065_8).abs() < 1e-4);
    }
}
