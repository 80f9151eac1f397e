/// Point-source detection: zero-sum matched filter, sharpness screening,
/// sub-pixel centroids.

use tracing::debug;

use super::fitting::{fit_point_source, PixelSample};

const FWHM_FACTOR: f32 = 2.3548;

// Sharpness bounds: a single hot pixel lands far above the upper bound,
// extended structure far below the lower one.
const SHARP_LO: f32 = 0.2;
const SHARP_HI: f32 = 1.5;

/// A detected point source.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedSource {
    /// Sub-pixel centroid X, grid-index (0-based) coordinates.
    pub x: f32,
    /// Sub-pixel centroid Y, grid-index (0-based) coordinates.
    pub y: f32,
    /// Background-subtracted peak sample value.
    pub peak: f32,
    /// Sum of positive background-subtracted values in the detection window.
    pub flux: f32,
    /// Matched-filter significance in units of the noise sigma.
    pub significance: f32,
}

/// Detection parameters.
pub(crate) struct DetectionParams {
    /// Threshold as a multiple of the noise sigma.
    pub detection_sigma: f32,
    /// Expected point-spread FWHM in grid units.
    pub fwhm: f32,
    /// Refine centroids with an isotropic Gaussian fit.
    pub gaussian_centroid: bool,
}

impl Default for DetectionParams {
    fn default() -> Self {
        DetectionParams {
            detection_sigma: 5.0,
            fwhm: 3.0,
            gaussian_centroid: true,
        }
    }
}

/// Zero-sum Gaussian matched filter. Normalized so that convolving a source
/// of matching width yields its amplitude, and pure noise of sigma `s` yields
/// convolved noise `s * relerr`.
struct MatchedKernel {
    data: Vec<f32>,
    radius: usize,
    size: usize,
    sigma: f32,
    relerr: f32,
}

impl MatchedKernel {
    fn new(fwhm: f32) -> Self {
        let sigma = (fwhm / FWHM_FACTOR).max(0.5);
        let radius = ((2.0 * sigma).ceil() as usize).max(2);
        let size = 2 * radius + 1;
        let n = (size * size) as f32;

        let inv_2s2 = 1.0 / (2.0 * sigma * sigma);
        let mut gauss = vec![0.0_f32; size * size];
        let mut gsum = 0.0_f32;
        for ky in 0..size {
            for kx in 0..size {
                let dx = kx as f32 - radius as f32;
                let dy = ky as f32 - radius as f32;
                let g = (-inv_2s2 * (dx * dx + dy * dy)).exp();
                gauss[ky * size + kx] = g;
                gsum += g;
            }
        }

        let mean = gsum / n;
        let variance: f32 = gauss.iter().map(|g| (g - mean) * (g - mean)).sum();
        let data = gauss.iter().map(|g| (g - mean) / variance).collect();

        MatchedKernel {
            data,
            radius,
            size,
            sigma,
            relerr: 1.0 / variance.sqrt(),
        }
    }
}

/// Detect point sources in a background-subtracted grid.
///
/// Accepts local maxima of the matched-filter response whose significance
/// exceeds `detection_sigma`, then screens each candidate's sharpness so
/// neither single-pixel spikes nor extended structure survive. Degenerate
/// input (no noise, empty or tiny grid) yields an empty set, never an error.
pub(crate) fn detect_sources(
    subtracted: &[f32],
    width: usize,
    height: usize,
    noise: f32,
    params: &DetectionParams,
) -> Vec<DetectedSource> {
    if noise <= 0.0 || !noise.is_finite() {
        return Vec::new();
    }

    let kernel = MatchedKernel::new(params.fwhm);
    let radius = kernel.radius;
    if width < kernel.size || height < kernel.size {
        return Vec::new();
    }

    // Matched-filter response over the interior (borders stay zero)
    let mut conv = vec![0.0_f32; width * height];
    for y in radius..(height - radius) {
        for x in radius..(width - radius) {
            let mut sum = 0.0_f32;
            for ky in 0..kernel.size {
                let row_off = (y + ky - radius) * width;
                let k_row_off = ky * kernel.size;
                for kx in 0..kernel.size {
                    sum += subtracted[row_off + x + kx - radius] * kernel.data[k_row_off + kx];
                }
            }
            conv[y * width + x] = sum;
        }
    }

    let conv_noise = noise * kernel.relerr;
    let threshold = params.detection_sigma * conv_noise;

    // Local maxima over a kernel-radius footprint, above threshold
    let r = radius as i32;
    let mut candidates = 0usize;
    let mut sources = Vec::new();
    for y in radius..(height - radius) {
        for x in radius..(width - radius) {
            let c = conv[y * width + x];
            if c <= threshold {
                continue;
            }

            let mut is_peak = true;
            'footprint: for dy in -r..=r {
                let row = (y as i32 + dy) as usize * width;
                for dx in -r..=r {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    if conv[row + (x as i32 + dx) as usize] >= c {
                        is_peak = false;
                        break 'footprint;
                    }
                }
            }
            if !is_peak {
                continue;
            }

            candidates += 1;
            if let Some(src) =
                measure_source(subtracted, width, x, y, &kernel, c, conv_noise, params)
            {
                sources.push(src);
            }
        }
    }

    debug!(
        candidates,
        accepted = sources.len(),
        threshold,
        "source detection finished"
    );
    sources
}

fn measure_source(
    subtracted: &[f32],
    width: usize,
    x: usize,
    y: usize,
    kernel: &MatchedKernel,
    amplitude: f32,
    conv_noise: f32,
    params: &DetectionParams,
) -> Option<DetectedSource> {
    let radius = kernel.radius;
    let n = (kernel.size * kernel.size) as f32;
    let peak = subtracted[y * width + x];

    // Sharpness: peak height over the window mean, relative to the fitted
    // amplitude. A width-matched source sits inside [SHARP_LO, SHARP_HI].
    let mut window_sum = 0.0_f32;
    for wy in (y - radius)..=(y + radius) {
        let row = wy * width;
        for wx in (x - radius)..=(x + radius) {
            window_sum += subtracted[row + wx];
        }
    }
    let window_mean = (window_sum - peak) / (n - 1.0);
    let sharpness = (peak - window_mean) / amplitude;
    if !(SHARP_LO..=SHARP_HI).contains(&sharpness) {
        return None;
    }

    // Moment centroid over the window, non-negative weights
    let mut sum_w = 0.0_f64;
    let mut sum_wx = 0.0_f64;
    let mut sum_wy = 0.0_f64;
    let mut flux = 0.0_f64;
    for wy in (y - radius)..=(y + radius) {
        let row = wy * width;
        for wx in (x - radius)..=(x + radius) {
            let w = subtracted[row + wx].max(0.0) as f64;
            sum_w += w;
            sum_wx += w * wx as f64;
            sum_wy += w * wy as f64;
            flux += w;
        }
    }
    if sum_w <= 0.0 {
        return None;
    }
    let mut cx = (sum_wx / sum_w) as f32;
    let mut cy = (sum_wy / sum_w) as f32;

    if params.gaussian_centroid {
        let mut pixels = Vec::with_capacity(kernel.size * kernel.size);
        for wy in (y - radius)..=(y + radius) {
            let row = wy * width;
            for wx in (x - radius)..=(x + radius) {
                pixels.push(PixelSample {
                    x: wx as f64,
                    y: wy as f64,
                    value: subtracted[row + wx] as f64,
                });
            }
        }
        if let Some(fit) = fit_point_source(
            &pixels,
            0.0,
            amplitude as f64,
            cx as f64,
            cy as f64,
            kernel.sigma as f64,
        ) {
            let shift = ((fit.x0 - cx as f64).powi(2) + (fit.y0 - cy as f64).powi(2)).sqrt();
            // A fit that wandered off the window is noise chasing; keep moments
            if shift < 2.0 {
                cx = fit.x0 as f32;
                cy = fit.y0 as f32;
            }
        }
    }

    Some(DetectedSource {
        x: cx,
        y: cy,
        peak,
        flux: flux as f32,
        significance: amplitude / conv_noise,
    })
}
