// THEORY:
// The `isolation` module converts one raw grayscale frame into a binary
// worm/background mask. It is the only numerically heavy stage of the
// engine, and it is deliberately stateless-per-call: identical frame and
// parameters always produce a bit-identical mask.
//
// The transform is a four-stage chain:
// 1.  **Pre-smoothing**: a Gaussian blur wide enough to suppress sensor
//     noise but narrow enough to keep worm bodies intact ("fine" signal).
// 2.  **Detrending**: the fine signal is blurred again, much wider, to
//     estimate the slowly-varying background illumination; dividing
//     fine/background flattens lamp gradients while dark, thread-like
//     structures survive as local dips.
// 3.  **Adaptive thresholding**: each pixel is compared against the mean of
//     its own neighborhood window; pixels darker than that mean minus a
//     constant become foreground. Inverted output: worms are 255.
// 4.  **Morphological opening**: erosion then dilation removes speckle
//     noise without shrinking surviving blobs.
//
// All intermediate buffers are owned by the `WormIsolator` and reused
// across calls, so the steady state allocates nothing. The returned mask is
// a view into one of those buffers and is only valid until the next call.

use serde::{Deserialize, Serialize};

/// Divisors below this are clamped before the detrend division. A true
/// black background would otherwise produce inf/NaN in the float field.
const DETREND_DIVISOR_FLOOR: f32 = 1e-6;

/// The six tunable knobs of the isolation transform.
///
/// Kernel-width knobs (`presmoothing_w`, `detrend_w`,
/// `adaptive_threshold_kernel`) must be positive odd integers. Out-of-domain
/// values are coerced at the pipeline boundary rather than rejected: an even
/// width behaves exactly like the next odd width up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisionParams {
    /// Gaussian width of the noise-suppression blur, in pixels.
    pub presmoothing_w: i32,
    /// Gaussian width of the background-illumination estimate, in pixels.
    /// Must be much wider than any worm body.
    pub detrend_w: i32,
    /// Scale applied to the fine/background ratio before re-quantization.
    /// 180 maps a flat field to a comfortably mid-gray 8-bit value.
    pub detrend_scale: f64,
    /// Side length of the adaptive-threshold neighborhood window.
    pub adaptive_threshold_kernel: i32,
    /// How far below the neighborhood mean a pixel must fall to count as
    /// foreground.
    pub adaptive_threshold: f64,
    /// Iteration count for the erosion and dilation passes. Zero skips
    /// morphology entirely.
    pub morphologic_depth: u32,
}

impl Default for VisionParams {
    fn default() -> Self {
        Self {
            presmoothing_w: 19,
            detrend_w: 51,
            detrend_scale: 180.0,
            adaptive_threshold_kernel: 21,
            adaptive_threshold: 5.0,
            morphologic_depth: 2,
        }
    }
}

impl VisionParams {
    /// Returns a copy with every kernel-width knob forced into its valid
    /// domain (positive odd).
    pub fn coerced(&self) -> Self {
        Self {
            presmoothing_w: force_odd(self.presmoothing_w),
            detrend_w: force_odd(self.detrend_w),
            adaptive_threshold_kernel: force_odd(self.adaptive_threshold_kernel),
            ..*self
        }
    }
}

fn force_odd(width: i32) -> i32 {
    width.max(1) | 1
}

/// Owns the scratch buffers of the isolation transform for one fixed frame
/// geometry.
pub struct WormIsolator {
    width: usize,
    height: usize,
    /// Fine signal, then the normalized float field.
    work_fine: Vec<f32>,
    /// Background-illumination estimate.
    work_background: Vec<f32>,
    /// Row-major intermediate of the separable blur.
    blur_tmp: Vec<f32>,
    /// 8-bit re-quantization of the normalized field.
    quantized: Vec<u8>,
    /// Summed-area table of `quantized`, (width+1) x (height+1).
    integral: Vec<i64>,
    /// Binary mask, ping-ponged with `morph_tmp` during morphology.
    mask: Vec<u8>,
    morph_tmp: Vec<u8>,
    /// Cached separable kernels so the steady state allocates nothing.
    presmooth_kernel: GaussianKernel,
    detrend_kernel: GaussianKernel,
}

impl WormIsolator {
    pub fn new(width: u32, height: u32) -> Self {
        let n = (width as usize) * (height as usize);
        Self {
            width: width as usize,
            height: height as usize,
            work_fine: vec![0.0; n],
            work_background: vec![0.0; n],
            blur_tmp: vec![0.0; n],
            quantized: vec![0; n],
            integral: vec![0; (width as usize + 1) * (height as usize + 1)],
            mask: vec![0; n],
            morph_tmp: vec![0; n],
            presmooth_kernel: GaussianKernel::default(),
            detrend_kernel: GaussianKernel::default(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width as u32
    }

    pub fn height(&self) -> u32 {
        self.height as u32
    }

    /// Runs the full transform. The returned mask has the same dimensions
    /// as the frame, contains only 0/255, and stays valid until the next
    /// call. The input frame is never mutated.
    pub fn isolate(&mut self, frame: &[u8], params: &VisionParams) -> &[u8] {
        assert_eq!(
            frame.len(),
            self.width * self.height,
            "frame buffer does not match isolator geometry"
        );
        let params = params.coerced();

        for (dst, &src) in self.work_fine.iter_mut().zip(frame) {
            *dst = src as f32;
        }

        // fine = smooth(raw); background = smooth(fine). The background
        // estimate is taken from the pre-smoothed signal, not the raw frame.
        self.presmooth_kernel.rebuild(params.presmoothing_w);
        blur_in_place(
            &mut self.work_fine,
            &mut self.blur_tmp,
            self.width,
            self.height,
            &self.presmooth_kernel,
        );
        self.detrend_kernel.rebuild(params.detrend_w);
        blur_into(
            &self.work_fine,
            &mut self.work_background,
            &mut self.blur_tmp,
            self.width,
            self.height,
            &self.detrend_kernel,
        );

        let scale = params.detrend_scale as f32;
        for i in 0..self.work_fine.len() {
            let background = self.work_background[i].max(DETREND_DIVISOR_FLOOR);
            let normalized = self.work_fine[i] / background * scale;
            self.quantized[i] = normalized.round().clamp(0.0, 255.0) as u8;
        }

        self.adaptive_threshold_inv(params.adaptive_threshold_kernel, params.adaptive_threshold);

        for _ in 0..params.morphologic_depth {
            erode3x3(&self.mask, &mut self.morph_tmp, self.width, self.height);
            std::mem::swap(&mut self.mask, &mut self.morph_tmp);
        }
        for _ in 0..params.morphologic_depth {
            dilate3x3(&self.mask, &mut self.morph_tmp, self.width, self.height);
            std::mem::swap(&mut self.mask, &mut self.morph_tmp);
        }

        &self.mask
    }

    /// The mask produced by the most recent `isolate` call.
    pub fn last_mask(&self) -> &[u8] {
        &self.mask
    }

    /// Local mean thresholding with inverted binary output: a pixel becomes
    /// foreground (255) when it is at least `constant` below the mean of
    /// its surrounding `kernel` x `kernel` window (clipped at the frame
    /// edges). The window mean comes from a summed-area table, so the cost
    /// per pixel is constant regardless of window size.
    fn adaptive_threshold_inv(&mut self, kernel: i32, constant: f64) {
        let (w, h) = (self.width, self.height);
        let stride = w + 1;

        for x in 0..=w {
            self.integral[x] = 0;
        }
        for y in 0..h {
            self.integral[(y + 1) * stride] = 0;
            let mut row_sum = 0i64;
            for x in 0..w {
                row_sum += self.quantized[y * w + x] as i64;
                self.integral[(y + 1) * stride + (x + 1)] =
                    self.integral[y * stride + (x + 1)] + row_sum;
            }
        }

        let r = (kernel / 2) as isize;
        for y in 0..h {
            let y0 = (y as isize - r).max(0) as usize;
            let y1 = ((y as isize + r + 1).min(h as isize)) as usize;
            for x in 0..w {
                let x0 = (x as isize - r).max(0) as usize;
                let x1 = ((x as isize + r + 1).min(w as isize)) as usize;

                let sum = self.integral[y1 * stride + x1]
                    - self.integral[y0 * stride + x1]
                    - self.integral[y1 * stride + x0]
                    + self.integral[y0 * stride + x0];
                let count = ((y1 - y0) * (x1 - x0)) as f64;
                let mean = sum as f64 / count;

                let src = self.quantized[y * w + x] as f64;
                self.mask[y * w + x] = if src <= mean - constant { 255 } else { 0 };
            }
        }
    }
}

/// A normalized 1-D Gaussian, cached together with the width it was built
/// for so repeated frames with unchanged parameters rebuild nothing.
#[derive(Default)]
struct GaussianKernel {
    width: i32,
    weights: Vec<f32>,
}

impl GaussianKernel {
    fn rebuild(&mut self, width: i32) {
        if self.width == width && !self.weights.is_empty() {
            return;
        }
        // Sigma follows the classic OpenCV derivation from kernel size.
        let sigma = 0.3 * ((width as f64 - 1.0) * 0.5 - 1.0) + 0.8;
        let center = (width / 2) as f64;
        self.weights.clear();
        let mut sum = 0.0f64;
        for i in 0..width {
            let d = i as f64 - center;
            let weight = (-d * d / (2.0 * sigma * sigma)).exp();
            self.weights.push(weight as f32);
            sum += weight;
        }
        let inv = (1.0 / sum) as f32;
        for weight in &mut self.weights {
            *weight *= inv;
        }
        self.width = width;
    }

    fn radius(&self) -> isize {
        (self.width / 2) as isize
    }
}

/// Separable Gaussian blur, replicate borders. `tmp` holds the horizontal
/// pass; the vertical pass lands back in `data`.
fn blur_in_place(
    data: &mut [f32],
    tmp: &mut [f32],
    width: usize,
    height: usize,
    kernel: &GaussianKernel,
) {
    blur_horizontal(data, tmp, width, height, kernel);
    blur_vertical(tmp, data, width, height, kernel);
}

/// Same blur, but the source is left untouched and the result lands in `dst`.
fn blur_into(
    src: &[f32],
    dst: &mut [f32],
    tmp: &mut [f32],
    width: usize,
    height: usize,
    kernel: &GaussianKernel,
) {
    blur_horizontal(src, tmp, width, height, kernel);
    blur_vertical(tmp, dst, width, height, kernel);
}

fn blur_horizontal(
    src: &[f32],
    dst: &mut [f32],
    width: usize,
    height: usize,
    kernel: &GaussianKernel,
) {
    let r = kernel.radius();
    for y in 0..height {
        let row = &src[y * width..(y + 1) * width];
        for x in 0..width {
            let mut acc = 0.0f32;
            for (k, &weight) in kernel.weights.iter().enumerate() {
                let sx = (x as isize + k as isize - r).clamp(0, width as isize - 1) as usize;
                acc += row[sx] * weight;
            }
            dst[y * width + x] = acc;
        }
    }
}

fn blur_vertical(
    src: &[f32],
    dst: &mut [f32],
    width: usize,
    height: usize,
    kernel: &GaussianKernel,
) {
    let r = kernel.radius();
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0f32;
            for (k, &weight) in kernel.weights.iter().enumerate() {
                let sy = (y as isize + k as isize - r).clamp(0, height as isize - 1) as usize;
                acc += src[sy * width + x] * weight;
            }
            dst[y * width + x] = acc;
        }
    }
}

/// 3x3 rectangular erosion: a pixel survives only if its whole 8-connected
/// neighborhood (clipped at the edges) is foreground.
fn erode3x3(src: &[u8], dst: &mut [u8], width: usize, height: usize) {
    morph3x3(src, dst, width, height, u8::min);
}

/// 3x3 rectangular dilation: a pixel lights up if anything in its
/// neighborhood is foreground.
fn dilate3x3(src: &[u8], dst: &mut [u8], width: usize, height: usize) {
    morph3x3(src, dst, width, height, u8::max);
}

fn morph3x3(src: &[u8], dst: &mut [u8], width: usize, height: usize, fold: fn(u8, u8) -> u8) {
    for y in 0..height {
        let y0 = y.saturating_sub(1);
        let y1 = (y + 1).min(height - 1);
        for x in 0..width {
            let x0 = x.saturating_sub(1);
            let x1 = (x + 1).min(width - 1);
            let mut value = src[y0 * width + x0];
            for sy in y0..=y1 {
                for sx in x0..=x1 {
                    value = fold(value, src[sy * width + sx]);
                }
            }
            dst[y * width + x] = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random frame so tests never depend on an RNG crate.
    fn synthetic_frame(width: usize, height: usize, seed: u32) -> Vec<u8> {
        let mut state = seed;
        (0..width * height)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn mask_matches_dimensions_and_is_binary() {
        let frame = synthetic_frame(64, 48, 7);
        let mut isolator = WormIsolator::new(64, 48);
        let mask = isolator.isolate(&frame, &VisionParams::default());
        assert_eq!(mask.len(), 64 * 48);
        assert!(mask.iter().all(|&p| p == 0 || p == 255));
    }

    #[test]
    fn isolate_is_deterministic() {
        let frame = synthetic_frame(64, 64, 42);
        let params = VisionParams::default();
        let mut a = WormIsolator::new(64, 64);
        let mut b = WormIsolator::new(64, 64);
        let mask_a = a.isolate(&frame, &params).to_vec();
        let mask_b = b.isolate(&frame, &params).to_vec();
        assert_eq!(mask_a, mask_b);

        // Repeated calls through the same scratch buffers too.
        let mask_c = a.isolate(&frame, &params).to_vec();
        assert_eq!(mask_a, mask_c);
    }

    #[test]
    fn even_kernel_widths_behave_as_next_odd() {
        let frame = synthetic_frame(48, 48, 3);
        let even = VisionParams {
            presmoothing_w: 18,
            detrend_w: 50,
            adaptive_threshold_kernel: 20,
            ..VisionParams::default()
        };
        let odd = VisionParams {
            presmoothing_w: 19,
            detrend_w: 51,
            adaptive_threshold_kernel: 21,
            ..VisionParams::default()
        };
        let mut a = WormIsolator::new(48, 48);
        let mut b = WormIsolator::new(48, 48);
        assert_eq!(a.isolate(&frame, &even), b.isolate(&frame, &odd));
    }

    #[test]
    fn uniform_frame_produces_empty_mask() {
        // A flat field has no local dips, so nothing crosses the adaptive
        // threshold regardless of the zero-divisor clamp.
        let frame = vec![0u8; 100 * 100];
        let mut isolator = WormIsolator::new(100, 100);
        let mask = isolator.isolate(&frame, &VisionParams::default());
        assert!(mask.iter().all(|&p| p == 0));

        let bright = vec![200u8; 100 * 100];
        let mask = isolator.isolate(&bright, &VisionParams::default());
        assert!(mask.iter().all(|&p| p == 0));
    }

    #[test]
    fn dark_disc_on_bright_field_becomes_foreground() {
        // Bright background with a solid dark disc. With no pre-smoothing,
        // a very wide detrend window, and a threshold window that always
        // sees plenty of background, the disc interior must survive as
        // foreground.
        let (w, h) = (100usize, 100usize);
        let mut frame = vec![200u8; w * h];
        for y in 0..h {
            for x in 0..w {
                let (dx, dy) = (x as i32 - 50, y as i32 - 50);
                if dx * dx + dy * dy <= 30 * 30 {
                    frame[y * w + x] = 0;
                }
            }
        }
        let params = VisionParams {
            presmoothing_w: 1,
            detrend_w: 101,
            adaptive_threshold_kernel: 81,
            morphologic_depth: 0,
            ..VisionParams::default()
        };
        let mut isolator = WormIsolator::new(w as u32, h as u32);
        let mask = isolator.isolate(&frame, &params);

        // Every pixel within 10px of the disc center is deep inside the
        // disc and must be classified as worm.
        for y in 40..=60usize {
            for x in 40..=60usize {
                let (dx, dy) = (x as i32 - 50, y as i32 - 50);
                if dx * dx + dy * dy <= 10 * 10 {
                    assert_eq!(mask[y * w + x], 255, "pixel ({x}, {y}) lost");
                }
            }
        }
    }

    #[test]
    fn opening_removes_isolated_speckles() {
        // A single bright threshold hit cannot survive one erosion.
        let (w, h) = (60usize, 60usize);
        let mut frame = vec![200u8; w * h];
        frame[30 * w + 30] = 0; // lone dark pixel
        let params = VisionParams {
            presmoothing_w: 1,
            detrend_w: 101,
            adaptive_threshold_kernel: 21,
            morphologic_depth: 1,
            ..VisionParams::default()
        };
        let mut isolator = WormIsolator::new(w as u32, h as u32);
        let mask = isolator.isolate(&frame, &params);
        assert!(mask.iter().all(|&p| p == 0));
    }

    #[test]
    fn force_odd_coercion() {
        assert_eq!(force_odd(20), 21);
        assert_eq!(force_odd(21), 21);
        assert_eq!(force_odd(1), 1);
        assert_eq!(force_odd(0), 1);
        assert_eq!(force_odd(-4), 1);
    }
}
